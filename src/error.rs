use crate::command::Command;
use pki_types::InvalidDnsNameError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use url::ParseError;

#[derive(Error, Debug)]
pub enum Error {
    // Lifecycle errors
    #[error("channel to '{endpoint}' not open after {attempts} polling attempts")]
    ConnectTimeout { endpoint: String, attempts: u32 },

    #[error("no '{command}' ack for request '{request_id}' after {attempts} polling attempts")]
    AckTimeout {
        command: Command,
        request_id: String,
        attempts: u32,
    },

    #[error("session cookie missing or blank in bootstrap response")]
    SessionMissing,

    #[error("placement lookup for room '{room}' failed: {reason}")]
    PlacementFailed { room: String, reason: String },

    #[error("failed to create room '{room}': {source}")]
    RoomCreationFailed {
        room: String,
        #[source]
        source: Box<Error>,
    },

    #[error("user '{user}' failed to join room '{room}': {source}")]
    JoinFailed {
        room: String,
        user: String,
        #[source]
        source: Box<Error>,
    },

    #[error("user '{user}' failed to send text message: {source}")]
    SendFailed {
        user: String,
        #[source]
        source: Box<Error>,
    },

    #[error("room '{room}' teardown incomplete: {stragglers} users never reported stopped")]
    TeardownIncomplete { room: String, stragglers: usize },

    // Channel errors
    #[error("channel is not open")]
    ChannelClosed,

    #[error("{op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{op}: {source}")]
    Codec {
        op: &'static str,
        #[source]
        source: serde_json::Error,
    },

    // Handshake errors
    #[error("server didn't upgrade the connection")]
    NoUpgrade,

    #[error("server didn't send a valid Sec-WebSocket-Accept key")]
    InvalidAcceptKey,

    #[error("incomplete HTTP handshake response")]
    IncompleteHandshake,

    #[error("{source}")]
    HttpParse {
        #[from]
        source: httparse::Error,
    },

    // Framing errors
    #[error("invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    #[error("control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("incoming fragmented message but there is one already in progress")]
    FragmentedInProgress,

    #[error("invalid continuation frame: no fragmented message to continue")]
    InvalidContinuationFrame,

    #[error("frame payload exceeds the maximum size")]
    PayloadTooLarge,

    #[error("{source}")]
    FromUtf8 {
        #[from]
        source: FromUtf8Error,
    },

    // URL / endpoint errors
    #[error("invalid scheme in channel URL: '{0}'")]
    InvalidScheme(String),

    #[error("channel URL has no host")]
    UrlNoHost,

    #[error("{source}")]
    UrlParse {
        #[from]
        source: ParseError,
    },

    #[error("{source}")]
    Dns {
        #[from]
        source: InvalidDnsNameError,
    },

    // HTTP collaborator errors
    #[error("http request failed: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    #[error("unexpected http status {status} from '{endpoint}'")]
    HttpStatus { endpoint: String, status: u16 },
}

impl Error {
    pub fn io(op: &'static str, source: io::Error) -> Self {
        Error::Io { op, source }
    }

    pub fn codec(op: &'static str, source: serde_json::Error) -> Self {
        Error::Codec { op, source }
    }

    /// Bootstrap failures keep their own identity through the actor start
    /// paths, so a placement outage stays distinguishable from a dead backend.
    pub fn is_bootstrap(&self) -> bool {
        matches!(self, Error::SessionMissing | Error::PlacementFailed { .. })
    }
}
