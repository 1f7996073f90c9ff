//! Seams to the peer channel transport.
//!
//! The runtime layer decides *when* to talk to a process; the IPC layer
//! decides *how*. [`PeerEndpoints`] hands out a private address per runtime
//! and [`PeerLink`] carries control calls once a process has connected.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use appman_core::{ApplicationId, ParameterMap, RuntimeId};
use serde::{Deserialize, Serialize};

use crate::error::RuntimeResult;
use crate::signal::SignalSender;

/// Call sent from the manager to a runtime process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum ControlCall {
    /// Ask the application to quit on its own.
    Quit,
    /// Open a document in the running application.
    OpenDocument {
        /// Document URL.
        document: String,
        /// MIME type, empty if unknown.
        mime_type: String,
    },
    /// Tell a launcher stub which application to load.
    StartApplication {
        /// Base directory inside the container.
        base_dir: String,
        /// Entry point inside the container.
        main_file: String,
        /// Document to open on start.
        document: Option<String>,
        /// Runtime parameters of the application.
        runtime_parameters: ParameterMap,
    },
}

/// Established peer channel to one runtime process.
///
/// A link is reported on connect but carries nothing from the process until
/// the runtime calls [`accept`](PeerLink::accept). A rejected link is
/// closed without ever being accepted.
pub trait PeerLink: Send + Sync + fmt::Debug {
    /// Queue a control call. Returns `false` if the link is gone.
    fn send_control(&self, call: ControlCall) -> bool;

    /// The process passed authentication; start reading its calls.
    fn accept(&self) {}

    /// Both handshake steps completed and the process now speaks for
    /// `application_id`.
    fn bind_application(&self, _application_id: &ApplicationId) {}

    /// Close the link. Idempotent.
    fn close(&self);
}

/// Allocator of per-runtime peer channel endpoints.
pub trait PeerEndpoints: Send + Sync {
    /// Open a private endpoint for `runtime_id`. Connections on it are
    /// reported through `signals`. Returns the address handed to the process.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::PeerEndpoint`](crate::RuntimeError::PeerEndpoint)
    /// if the endpoint cannot be created.
    fn open(&self, runtime_id: RuntimeId, signals: SignalSender) -> RuntimeResult<String>;

    /// Tear down the endpoint of `runtime_id`.
    fn close(&self, runtime_id: RuntimeId);
}

/// Endpoints that only record addresses; nothing listens on them.
#[derive(Debug, Default)]
pub struct DetachedEndpoints {
    open: Mutex<HashMap<RuntimeId, String>>,
}

impl DetachedEndpoints {
    /// Create an empty allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Address currently allocated for a runtime.
    #[must_use]
    pub fn address(&self, runtime_id: RuntimeId) -> Option<String> {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&runtime_id)
            .cloned()
    }
}

impl PeerEndpoints for DetachedEndpoints {
    fn open(&self, runtime_id: RuntimeId, _signals: SignalSender) -> RuntimeResult<String> {
        let address = format!("detached:{runtime_id}");
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(runtime_id, address.clone());
        Ok(address)
    }

    fn close(&self, runtime_id: RuntimeId) {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&runtime_id);
    }
}
