//! Request id encoding on the peer channel.
//!
//! Broadcast requests carry their id with an `@broadcast` suffix so the
//! receiving side knows no reply is expected.

use uuid::Uuid;

use crate::error::{IpcError, IpcResult};

/// Suffix marking a broadcast request id.
pub const BROADCAST_SUFFIX: &str = "@broadcast";

/// Encode a request id for the wire.
#[must_use]
pub fn encode_request_id(id: Uuid, broadcast: bool) -> String {
    if broadcast {
        format!("{id}{BROADCAST_SUFFIX}")
    } else {
        id.to_string()
    }
}

/// Decode a wire request id into the id and its broadcast flag.
///
/// # Errors
///
/// Returns [`IpcError::InvalidRequestId`] if the id part is not a UUID.
pub fn decode_request_id(raw: &str) -> IpcResult<(Uuid, bool)> {
    let (id, broadcast) = match raw.strip_suffix(BROADCAST_SUFFIX) {
        Some(id) => (id, true),
        None => (raw, false),
    };
    Uuid::parse_str(id)
        .map(|uuid| (uuid, broadcast))
        .map_err(|_| IpcError::InvalidRequestId(raw.to_owned()))
}
