//! Prelude module - commonly used types for convenient import.
//!
//! Use `use appman_ipc::prelude::*;` to import all essential types.

// Errors
pub use crate::{IpcError, IpcResult};

// Connections
pub use crate::{ConnectionId, ConnectionIndex, ConnectionMessage, IpcConnection, TransportKind};

// Transports
pub use crate::{InProcessClient, IpcEvent, IpcEventReceiver, PeerClient, UnixSocketEndpoints};
