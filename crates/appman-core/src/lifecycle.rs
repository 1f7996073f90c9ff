//! Runtime lifecycle states and process exit classification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle to a runtime owned by the supervisor arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeId(u64);

impl RuntimeId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rt-{}", self.0)
    }
}

/// State of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    /// No process.
    #[default]
    NotRunning,
    /// Process spawned, handshake not yet complete.
    StartingUp,
    /// Fully up.
    Running,
    /// Stop requested, waiting for the process to exit.
    ShuttingDown,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotRunning => "not-running",
            Self::StartingUp => "starting-up",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
        };
        f.write_str(name)
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    /// Exited on its own, with any exit code.
    Normal,
    /// Killed by the manager (SIGTERM/SIGKILL).
    ForcedExit,
    /// Killed by any other signal.
    CrashExit,
}

/// Raw termination status as reported by a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Exited with a code.
    Code(i32),
    /// Terminated by a signal number.
    Signal(i32),
}

impl ExitStatus {
    /// Exit code or signal number.
    #[must_use]
    pub fn raw(self) -> i32 {
        match self {
            Self::Code(c) | Self::Signal(c) => c,
        }
    }
}
