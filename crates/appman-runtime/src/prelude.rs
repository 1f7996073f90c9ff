//! Prelude module - commonly used types for convenient import.
//!
//! Use `use appman_runtime::prelude::*;` to import all essential types.

// Errors
pub use crate::{ContainerError, ContainerResult, RuntimeError, RuntimeResult};

// Backends
pub use crate::{
    ContainerBackend, ContainerRegistry, InProcessBackend, LauncherBackend, NativeBackend,
    RuntimeBackend, RuntimeBackendRegistry,
};

// Lifecycle
pub use crate::{Runtime, RuntimeSupervisor, SharedSupervisor, run};

// Seams
pub use crate::{DetachedEndpoints, PeerEndpoints, PeerLink, ProcessAncestry, ProcfsAncestry};

// Pool and settings
pub use crate::{QuickLaunchSettings, QuickLauncherPool, RuntimeSettings};
