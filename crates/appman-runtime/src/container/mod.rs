//! Container backends.
//!
//! A container is the OS-level sandbox a runtime's process lives in. The
//! runtime only sets a program, starts it with arguments and environment,
//! and later terminates or kills it. Exit notification arrives through the
//! receiver returned from [`Container::start`].

mod inprocess;
mod process;

pub use inprocess::InProcessContainerBackend;
pub use process::ProcessContainerBackend;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use appman_core::{Application, ExitStatus};
use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::info;

use crate::error::{ContainerResult, RuntimeError, RuntimeResult};

/// A started process.
pub struct SpawnedProcess {
    /// Control handle.
    pub handle: Box<dyn ContainerProcess>,
    /// Resolves once with the termination status.
    pub exited: oneshot::Receiver<ExitStatus>,
}

impl fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Control handle of a running process.
pub trait ContainerProcess: Send + Sync + fmt::Debug {
    /// Process id as seen by the host.
    fn pid(&self) -> Option<u32>;

    /// Ask the process to terminate (SIGTERM).
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered.
    fn terminate(&self) -> ContainerResult<()>;

    /// Kill the process (SIGKILL).
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered.
    fn kill(&self) -> ContainerResult<()>;
}

/// One sandbox instance.
#[async_trait]
pub trait Container: Send + Sync + fmt::Debug {
    /// Id of the backend that created this container.
    fn backend_id(&self) -> &str;

    /// Set the program to run. Can only be done once.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ProgramAlreadySet`](crate::ContainerError::ProgramAlreadySet)
    /// on the second call.
    fn set_program(&mut self, program: PathBuf) -> ContainerResult<()>;

    /// The program, once set.
    fn program(&self) -> Option<&Path>;

    /// Working directory inside the container.
    fn base_dir(&self) -> &Path;

    /// Translate a host path to the path seen inside the container.
    fn map_host_path(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }

    /// Start the program.
    ///
    /// # Errors
    ///
    /// Returns an error if no program was set or spawning failed.
    async fn start(
        &mut self,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    ) -> ContainerResult<SpawnedProcess>;
}

/// Factory of containers.
pub trait ContainerBackend: Send + Sync + fmt::Debug {
    /// Backend id, e.g. `"process"`.
    fn id(&self) -> &str;

    /// Whether containers can be created ahead of time for the quick
    /// launcher.
    fn supports_quick_launch(&self) -> bool;

    /// Whether this backend runs programs inside the manager process.
    fn is_in_process(&self) -> bool {
        false
    }

    /// Create a container, optionally for a known application.
    ///
    /// # Errors
    ///
    /// Returns an error if the sandbox cannot be prepared.
    fn create(&self, application: Option<&Application>) -> ContainerResult<Box<dyn Container>>;
}

/// Registered container backends, including plugin-supplied ones.
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    backends: HashMap<String, Arc<dyn ContainerBackend>>,
    order: Vec<String>,
}

impl ContainerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in process and in-process backends.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.insert(Arc::new(ProcessContainerBackend::default()));
        registry.insert(Arc::new(InProcessContainerBackend::new()));
        registry
    }

    fn insert(&mut self, backend: Arc<dyn ContainerBackend>) {
        let id = backend.id().to_owned();
        self.order.push(id.clone());
        self.backends.insert(id, backend);
    }

    /// Register a backend.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::DuplicateContainer`] if the id is taken.
    pub fn register(&mut self, backend: Arc<dyn ContainerBackend>) -> RuntimeResult<()> {
        if self.backends.contains_key(backend.id()) {
            return Err(RuntimeError::DuplicateContainer {
                id: backend.id().to_owned(),
            });
        }
        info!(container_id = backend.id(), "Registered container backend");
        self.insert(backend);
        Ok(())
    }

    /// Look up a backend.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn ContainerBackend>> {
        self.backends.get(id).cloned()
    }

    /// First registered in-process backend.
    #[must_use]
    pub fn in_process(&self) -> Option<Arc<dyn ContainerBackend>> {
        self.iter().find(|b| b.is_in_process())
    }

    /// Backends in registration order.
    pub fn iter(&self) -> impl Iterator<Item = Arc<dyn ContainerBackend>> + '_ {
        self.order.iter().filter_map(|id| self.backends.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = ContainerRegistry::with_builtin();
        assert!(registry.get("process").is_some());
        assert!(registry.in_process().is_some());
        let ids: Vec<String> = registry.iter().map(|b| b.id().to_owned()).collect();
        assert_eq!(ids, vec!["process", "inprocess"]);
    }

    #[test]
    fn test_duplicate_container_rejected() {
        let mut registry = ContainerRegistry::with_builtin();
        let err = registry
            .register(Arc::new(ProcessContainerBackend::default()))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateContainer { .. }));
    }
}
