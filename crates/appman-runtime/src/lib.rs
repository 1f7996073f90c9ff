//! Appman Runtime - process lifecycle for the application manager.
//!
//! This crate provides:
//! - Container backends (plain host process, in-process) and their registry
//! - Runtime backends (native binaries, launcher stubs, in-process) and the
//!   [`RuntimeBackendRegistry`]
//! - The [`Runtime`] state machine with its two-step peer handshake
//! - The [`RuntimeSupervisor`] arena that owns every runtime
//! - The [`QuickLauncherPool`] of pre-started runtimes
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use appman_core::{Application, ApplicationId};
//! use appman_events::EventBus;
//! use appman_runtime::prelude::*;
//!
//! # async fn example() -> RuntimeResult<()> {
//! let mut backends = RuntimeBackendRegistry::new();
//! backends.register(Arc::new(NativeBackend))?;
//!
//! let (mut supervisor, signals) = RuntimeSupervisor::new(
//!     Arc::new(backends),
//!     Arc::new(ContainerRegistry::with_builtin()),
//!     Arc::new(DetachedEndpoints::new()),
//!     Arc::new(ProcfsAncestry::default()),
//!     EventBus::new(),
//!     Arc::new(RuntimeSettings::default()),
//! );
//!
//! let app = Application::new(ApplicationId::from_static("com.example.nav"), "native")
//!     .with_code_dir("/apps/nav")
//!     .with_main_file("nav");
//! let id = supervisor.start_application(&app, None, None).await?;
//! tokio::spawn(run(supervisor.into_shared(), signals));
//! # let _ = id;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod ancestry;
pub mod backend;
pub mod container;
pub mod error;
pub mod peer;
pub mod quick_launcher;
pub mod runtime;
pub mod settings;
pub mod signal;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use ancestry::{ProcessAncestry, ProcfsAncestry};
pub use backend::{
    Handshake, IN_PROCESS_SUFFIX, InProcessBackend, LAUNCHER_PREFIX, LaunchSpec, LauncherBackend,
    NativeBackend, RuntimeBackend, RuntimeBackendRegistry,
};
pub use container::{
    Container, ContainerBackend, ContainerProcess, ContainerRegistry, InProcessContainerBackend,
    ProcessContainerBackend, SpawnedProcess,
};
pub use error::{ContainerError, ContainerResult, RuntimeError, RuntimeResult};
pub use peer::{ControlCall, DetachedEndpoints, PeerEndpoints, PeerLink};
pub use quick_launcher::{Acquired, QuickLauncherPool};
pub use runtime::{Runtime, RuntimeContext, classify_exit};
pub use settings::{QuickLaunchSettings, RuntimeSettings};
pub use signal::{RuntimeSignal, SignalReceiver, SignalSender, signal_channel};
pub use supervisor::{RuntimeSupervisor, SharedSupervisor, run};
