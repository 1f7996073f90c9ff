//! Runtime backends and their registry.
//!
//! A runtime backend decides what to execute for an application (the
//! application binary itself, a launcher stub, or nothing for in-process
//! runtimes) and whether the process has to complete the peer channel
//! handshake before it counts as running.

mod inprocess;
mod native;

pub use inprocess::InProcessBackend;
pub use native::{LAUNCHER_PREFIX, LauncherBackend, NativeBackend};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use appman_core::{Application, RuntimeId};
use tracing::{debug, info};

use crate::container::{Container, ContainerBackend};
use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::{Runtime, RuntimeContext};
use crate::settings::RuntimeSettings;

/// Suffix tried when no backend matches a runtime name exactly.
pub const IN_PROCESS_SUFFIX: &str = "-inprocess";

/// How a runtime's process proves it is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// Running as soon as the process is spawned.
    None,
    /// Running after the process connects to its peer channel and reports
    /// finished initialization.
    PeerChannel,
}

/// What to execute for one runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Program path on the host.
    pub program: PathBuf,
    /// Program arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
    /// Whether the program is a generic launcher stub that loads the
    /// application later.
    pub via_launcher: bool,
}

/// Factory strategy for one runtime type.
pub trait RuntimeBackend: Send + Sync + fmt::Debug {
    /// Backend id matched against [`Application::runtime_name`].
    fn id(&self) -> &str;

    /// Whether runtimes execute inside the manager process.
    fn is_in_process(&self) -> bool {
        false
    }

    /// Whether idle instances can be started before an application is known.
    fn supports_quick_launch(&self) -> bool {
        false
    }

    /// Handshake required before the runtime is running.
    fn handshake(&self) -> Handshake;

    /// Program, arguments and environment for a start. `application` is
    /// `None` for quick launcher instances.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NoApplication`] style errors if the backend
    /// cannot start without an application.
    fn launch_spec(
        &self,
        application: Option<&Application>,
        settings: &RuntimeSettings,
    ) -> RuntimeResult<LaunchSpec>;
}

/// Maps runtime names to backends.
#[derive(Debug, Default)]
pub struct RuntimeBackendRegistry {
    backends: HashMap<String, Arc<dyn RuntimeBackend>>,
    next_id: AtomicU64,
    slow_animations: AtomicBool,
}

impl RuntimeBackendRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its id.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::DuplicateBackend`] if the id is already taken
    /// and [`RuntimeError::EmptyBackendId`] for an empty id. The registry is
    /// unchanged in both cases.
    pub fn register(&mut self, backend: Arc<dyn RuntimeBackend>) -> RuntimeResult<()> {
        let id = backend.id().to_owned();
        if id.is_empty() {
            return Err(RuntimeError::EmptyBackendId);
        }
        if self.backends.contains_key(&id) {
            return Err(RuntimeError::DuplicateBackend { id });
        }
        info!(backend_id = %id, "Registered runtime backend");
        self.backends.insert(id, backend);
        Ok(())
    }

    /// Find the backend for a runtime name, falling back to
    /// `<name>-inprocess`.
    #[must_use]
    pub fn resolve(&self, runtime_name: &str) -> Option<Arc<dyn RuntimeBackend>> {
        self.backends
            .get(runtime_name)
            .or_else(|| {
                self.backends
                    .get(&format!("{runtime_name}{IN_PROCESS_SUFFIX}"))
            })
            .cloned()
    }

    /// Registered backend ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.backends.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All registered backends, sorted by id.
    #[must_use]
    pub fn backends(&self) -> Vec<Arc<dyn RuntimeBackend>> {
        let mut backends: Vec<_> = self.backends.values().cloned().collect();
        backends.sort_by(|a, b| a.id().cmp(b.id()));
        backends
    }

    /// Toggle slow animations for runtimes created from now on.
    pub fn set_slow_animations(&self, enabled: bool) {
        self.slow_animations.store(enabled, Ordering::Relaxed);
    }

    /// Current slow-animation toggle.
    #[must_use]
    pub fn slow_animations(&self) -> bool {
        self.slow_animations.load(Ordering::Relaxed)
    }

    fn allocate_id(&self) -> RuntimeId {
        RuntimeId::new(self.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1))
    }

    /// Create a runtime for an application.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::UnknownRuntime`] if no backend matches the
    /// application's runtime name, or a container error if the sandbox
    /// cannot be created.
    pub fn create(
        &self,
        container: &Arc<dyn ContainerBackend>,
        application: &Application,
        ctx: RuntimeContext,
    ) -> RuntimeResult<Runtime> {
        let backend = self.backend_for(application)?;
        let sandbox = container.create(Some(application))?;
        Ok(self.build(backend, sandbox, application, ctx))
    }

    /// Create a runtime for an application inside a container prepared
    /// ahead of time by the quick launcher.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::UnknownRuntime`] if no backend matches the
    /// application's runtime name.
    pub fn create_in(
        &self,
        sandbox: Box<dyn Container>,
        application: &Application,
        ctx: RuntimeContext,
    ) -> RuntimeResult<Runtime> {
        let backend = self.backend_for(application)?;
        Ok(self.build(backend, sandbox, application, ctx))
    }

    fn backend_for(&self, application: &Application) -> RuntimeResult<Arc<dyn RuntimeBackend>> {
        self.resolve(&application.runtime_name)
            .ok_or_else(|| RuntimeError::UnknownRuntime {
                name: application.runtime_name.clone(),
            })
    }

    fn build(
        &self,
        backend: Arc<dyn RuntimeBackend>,
        sandbox: Box<dyn Container>,
        application: &Application,
        ctx: RuntimeContext,
    ) -> Runtime {
        let id = self.allocate_id();
        debug!(
            runtime_id = %id,
            backend_id = backend.id(),
            container_id = sandbox.backend_id(),
            app_id = %application.id,
            "Created runtime"
        );
        Runtime::new(
            id,
            backend,
            sandbox,
            Some(application.clone()),
            false,
            self.slow_animations(),
            ctx,
        )
    }

    /// Create an unbound quick launcher runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::UnknownRuntime`] if no quick-launch capable
    /// backend matches `runtime_name`.
    pub fn create_quick_launcher(
        &self,
        container: &Arc<dyn ContainerBackend>,
        runtime_name: &str,
        ctx: RuntimeContext,
    ) -> RuntimeResult<Runtime> {
        let backend = self
            .resolve(runtime_name)
            .filter(|b| b.supports_quick_launch() && !b.is_in_process())
            .ok_or_else(|| RuntimeError::UnknownRuntime {
                name: runtime_name.to_owned(),
            })?;

        let sandbox = container.create(None)?;
        let id = self.allocate_id();
        debug!(
            runtime_id = %id,
            backend_id = backend.id(),
            container_id = container.id(),
            "Created quick launcher"
        );
        Ok(Runtime::new(
            id,
            backend,
            sandbox,
            None,
            true,
            self.slow_animations(),
            ctx,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ProcessContainerBackend;
    use appman_core::ApplicationId;

    fn registry() -> RuntimeBackendRegistry {
        let mut registry = RuntimeBackendRegistry::new();
        registry.register(Arc::new(NativeBackend)).unwrap();
        registry
            .register(Arc::new(InProcessBackend::new("qml-inprocess")))
            .unwrap();
        registry
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = registry();
        assert_eq!(registry.resolve("native").unwrap().id(), "native");
        assert_eq!(registry.ids(), vec!["native", "qml-inprocess"]);
    }

    #[test]
    fn test_resolve_falls_back_to_inprocess() {
        let registry = registry();
        assert_eq!(registry.resolve("qml").unwrap().id(), "qml-inprocess");
        assert!(registry.resolve("html").is_none());
    }

    #[test]
    fn test_duplicate_register_leaves_registry_unchanged() {
        let mut registry = registry();
        let err = registry
            .register(Arc::new(InProcessBackend::new("native")))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateBackend { .. }));
        assert!(!registry.resolve("native").unwrap().is_in_process());
        assert_eq!(registry.ids().len(), 2);
    }

    #[test]
    fn test_create_unknown_runtime() {
        let registry = registry();
        let container: Arc<dyn ContainerBackend> = Arc::new(ProcessContainerBackend::default());
        let app = Application::new(ApplicationId::from_static("com.example.a"), "html");
        let err = registry
            .create(&container, &app, RuntimeContext::detached())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownRuntime { name } if name == "html"));
    }

    #[test]
    fn test_create_propagates_slow_animations() {
        let registry = registry();
        registry.set_slow_animations(true);
        let container: Arc<dyn ContainerBackend> = Arc::new(ProcessContainerBackend::default());
        let app = Application::new(ApplicationId::from_static("com.example.a"), "native");
        let rt = registry
            .create(&container, &app, RuntimeContext::detached())
            .unwrap();
        assert!(rt.slow_animations());
        assert_eq!(rt.application().unwrap().id, app.id);
    }
}
