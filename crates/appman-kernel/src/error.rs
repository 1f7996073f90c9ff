//! Error types for the manager context.

use appman_core::ApplicationId;
use thiserror::Error;

/// Errors raised while booting or driving the manager.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Configuration could not be turned into working components.
    #[error("configuration error: {0}")]
    Config(String),

    /// The application is not installed.
    #[error("unknown application '{0}'")]
    UnknownApplication(ApplicationId),

    /// Runtime layer failure.
    #[error(transparent)]
    Runtime(#[from] appman_runtime::RuntimeError),

    /// Access policy failure.
    #[error(transparent)]
    Policy(#[from] appman_policy::PolicyError),

    /// Intent failure.
    #[error(transparent)]
    Intent(#[from] appman_intents::IntentError),

    /// Logging setup failure.
    #[error(transparent)]
    Telemetry(#[from] appman_telemetry::TelemetryError),

    /// A failure the manager cannot continue after.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl KernelError {
    /// Whether this failure must bring the manager down.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Runtime(e) => e.is_fatal(),
            Self::Fatal(_) => true,
            _ => false,
        }
    }
}

/// Result type for manager operations.
pub type KernelResult<T> = Result<T, KernelError>;
