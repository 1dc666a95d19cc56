use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use rand::random;
use sha1::{Digest, Sha1};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub(crate) const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub(crate) fn generate_websocket_accept_value(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

pub(crate) fn generate_websocket_key() -> String {
    let random_bytes: [u8; 16] = random();
    BASE64_STANDARD.encode(random_bytes)
}

/// Generates the unique identifiers used for room names, user names, request
/// ids and message tokens.
pub fn generate_unique_id() -> String {
    let buf = random::<[u8; 16]>();
    Uuid::new_v8(buf).to_string()
}

/// Wall-clock milliseconds since the epoch. Send/receive timestamps and the
/// delays derived from them all live on this clock.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
