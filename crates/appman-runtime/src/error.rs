//! Error types for containers and runtimes.

use std::io;
use std::path::PathBuf;

use appman_core::RuntimeId;
use thiserror::Error;

/// Errors raised by container backends.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The program of a container can only be set once.
    #[error("container program is already set")]
    ProgramAlreadySet,

    /// `start` was called before a program was set.
    #[error("container has no program to start")]
    NoProgram,

    /// The process could not be spawned.
    #[error("failed to start {program}: {source}")]
    StartFailed {
        /// Program that failed to start.
        program: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The host ran out of memory while spawning.
    #[error("out of memory while starting {program}")]
    OutOfMemory {
        /// Program that failed to start.
        program: PathBuf,
    },

    /// Delivering a signal failed.
    #[error("failed to signal pid {pid}: {message}")]
    Signal {
        /// Target pid.
        pid: u32,
        /// Reason.
        message: String,
    },
}

impl ContainerError {
    /// Whether this failure must bring the manager down.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors raised by the runtime layer.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No runtime backend is registered for this name.
    #[error("no runtime backend for '{name}'")]
    UnknownRuntime {
        /// Requested runtime name.
        name: String,
    },

    /// A runtime backend with this id is already registered.
    #[error("runtime backend '{id}' is already registered")]
    DuplicateBackend {
        /// Backend id.
        id: String,
    },

    /// Backend ids must not be empty.
    #[error("runtime backend id must not be empty")]
    EmptyBackendId,

    /// No container backend is registered for this id.
    #[error("no container backend '{id}'")]
    UnknownContainer {
        /// Requested container id.
        id: String,
    },

    /// A container backend with this id is already registered.
    #[error("container backend '{id}' is already registered")]
    DuplicateContainer {
        /// Backend id.
        id: String,
    },

    /// The runtime has no application and is not a quick launcher.
    #[error("runtime {0} has no application to start")]
    NoApplication(RuntimeId),

    /// The application already has a live runtime.
    #[error("application '{0}' already has a runtime")]
    AlreadyHasRuntime(String),

    /// The runtime is shutting down and cannot be started.
    #[error("runtime {0} is shutting down")]
    ShuttingDown(RuntimeId),

    /// Attachment requested on a runtime that is not a launcher-started quick
    /// launcher.
    #[error("runtime {0} is not a quick launcher")]
    NotQuickLauncher(RuntimeId),

    /// The quick launcher already has an application.
    #[error("quick launcher {0} already has an application attached")]
    AlreadyAttached(RuntimeId),

    /// Unknown runtime handle.
    #[error("no runtime {0}")]
    NoSuchRuntime(RuntimeId),

    /// Peer channel endpoint could not be created.
    #[error("peer endpoint for runtime {runtime_id}: {message}")]
    PeerEndpoint {
        /// Runtime the endpoint was for.
        runtime_id: RuntimeId,
        /// Reason.
        message: String,
    },

    /// The launch configuration could not be built.
    #[error("launch configuration: {0}")]
    LaunchConfiguration(String),

    /// The OS entropy source failed while generating a security token.
    #[error("could not generate security token: {0}")]
    Entropy(String),

    /// Container failure.
    #[error(transparent)]
    Container(#[from] ContainerError),
}

impl RuntimeError {
    /// Whether this failure must bring the manager down.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Container(e) => e.is_fatal(),
            Self::Entropy(_) => true,
            _ => false,
        }
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
