//! Appman IPC - connections between the manager and application processes.
//!
//! This crate provides:
//! - [`IpcConnection`] over two transports: in-process queues and private
//!   per-runtime Unix sockets (the peer channel)
//! - [`ConnectionIndex`] for O(1) lookup by application id
//! - Length-prefixed JSON framing and statically declared interface schemas
//! - [`UnixSocketEndpoints`], the peer channel implementation of the
//!   runtime layer's endpoint seam
//! - Client ends for launchers, applications and the system UI

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod client;
pub mod connection;
pub mod error;
pub mod frame;
pub mod message;
pub mod peer;
pub mod request_id;

pub use client::{InProcessClient, PeerClient};
pub use connection::{ConnectionId, ConnectionIndex, IpcConnection, TransportKind};
pub use error::{IpcError, IpcResult};
pub use frame::{MAX_FRAME_LEN, read_frame, write_frame};
pub use message::{
    APPLICATION_INTERFACE, ConnectionMessage, INTENT_INTERFACE, INTERFACES, Incoming,
    MANAGER_INTERFACE, PeerMessage, RUNTIME_INTERFACE, schema_for,
};
pub use peer::{IpcEvent, IpcEventReceiver, IpcEventSender, UnixSocketEndpoints, ipc_event_channel};
pub use request_id::{BROADCAST_SUFFIX, decode_request_id, encode_request_id};
