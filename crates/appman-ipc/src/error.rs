//! Error types for the IPC layer.

use std::io;
use std::path::PathBuf;

use appman_core::CoreError;
use thiserror::Error;

use crate::connection::ConnectionId;

/// Errors raised by connections and the peer channel.
#[derive(Debug, Error)]
pub enum IpcError {
    /// I/O failure on a socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Peer endpoint could not be bound.
    #[error("failed to bind {path}: {source}")]
    Bind {
        /// Socket path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A frame exceeded the size limit.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Announced length.
        len: usize,
        /// Limit.
        max: usize,
    },

    /// A frame was not valid JSON for the expected type.
    #[error("malformed frame: {0}")]
    Codec(#[from] serde_json::Error),

    /// A call did not match its interface schema.
    #[error(transparent)]
    Schema(#[from] CoreError),

    /// Unknown interface name.
    #[error("unknown interface '{0}'")]
    UnknownInterface(String),

    /// A malformed request id.
    #[error("invalid request id '{0}'")]
    InvalidRequestId(String),

    /// The connection exists but has not completed its handshake.
    #[error("connection {0} is not ready")]
    NotReady(ConnectionId),

    /// The connection went away.
    #[error("connection {0} lost")]
    ConnectionLost(ConnectionId),
}

/// Result type for IPC operations.
pub type IpcResult<T> = Result<T, IpcError>;
