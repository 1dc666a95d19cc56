//! Synthetic load generator for chat backends.
//!
//! Simulates fleets of rooms and users against a remote chat service over
//! its duplex WebSocket channel, driving the real join/create/message
//! protocol with acknowledgment waits, and measures end-to-end delivery:
//! every sent message carries a unique token, every receiving session
//! records a receipt, and each room audits counts and latencies at teardown.
//!
//! It's an async crate based on the tokio runtime; each room, each user and
//! each keepalive loop runs as its own task, and the channel layer speaks
//! the [WebSocket Protocol RFC](https://datatracker.ietf.org/doc/html/rfc6455)
//! directly over a tokio TcpStream (TLS via rustls for wss endpoints).

pub mod bootstrap;
pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod read;
pub mod room;
pub mod spawner;
pub mod stream;
mod tests;
pub mod tracking;
pub mod user;
pub mod utils;
pub mod write;
