//! Signals delivered to the supervisor.
//!
//! Watchers, timers and the peer channel never touch runtime state directly.
//! They post a [`RuntimeSignal`] and the supervisor applies it on its own
//! turn.

use std::sync::Arc;

use appman_core::{ExitStatus, RuntimeId};
use tokio::sync::mpsc;

use crate::peer::PeerLink;

/// Something happened to a runtime.
#[derive(Debug)]
pub enum RuntimeSignal {
    /// The runtime's process terminated.
    ProcessExited {
        /// Runtime handle.
        runtime_id: RuntimeId,
        /// Raw termination status.
        status: ExitStatus,
    },
    /// A process connected to the runtime's private peer endpoint.
    PeerConnected {
        /// Runtime handle.
        runtime_id: RuntimeId,
        /// Pid reported by the socket credentials.
        peer_pid: u32,
        /// Link used to send control calls back.
        link: Arc<dyn PeerLink>,
    },
    /// Handshake step 2: the process finished initializing.
    FinishedInitialization {
        /// Runtime handle.
        runtime_id: RuntimeId,
    },
    /// The peer channel closed.
    PeerDisconnected {
        /// Runtime handle.
        runtime_id: RuntimeId,
    },
    /// A stop grace period ran out.
    GraceExpired {
        /// Runtime handle.
        runtime_id: RuntimeId,
        /// Stop generation the timer belongs to. Stale timers are ignored.
        generation: u64,
    },
}

impl RuntimeSignal {
    /// Runtime this signal targets.
    #[must_use]
    pub fn runtime_id(&self) -> RuntimeId {
        match self {
            Self::ProcessExited { runtime_id, .. }
            | Self::PeerConnected { runtime_id, .. }
            | Self::FinishedInitialization { runtime_id }
            | Self::PeerDisconnected { runtime_id }
            | Self::GraceExpired { runtime_id, .. } => *runtime_id,
        }
    }
}

/// Sending half of the supervisor's signal queue.
pub type SignalSender = mpsc::UnboundedSender<RuntimeSignal>;

/// Receiving half of the supervisor's signal queue.
pub type SignalReceiver = mpsc::UnboundedReceiver<RuntimeSignal>;

/// Create a signal queue.
#[must_use]
pub fn signal_channel() -> (SignalSender, SignalReceiver) {
    mpsc::unbounded_channel()
}
