//! Owner of every live runtime.
//!
//! Runtimes live in an arena keyed by [`RuntimeId`]. Nothing outside the
//! supervisor holds a runtime; everything else refers to it by id. Runtimes
//! whose process has ended are queued and removed by [`RuntimeSupervisor::reap`]
//! at the end of each signal-processing turn, after all listeners saw the
//! lifecycle event.

use std::collections::HashMap;
use std::sync::Arc;

use appman_core::{Application, ApplicationId, RuntimeId, RuntimeState};
use appman_events::{AppManEvent, EventBus, EventMetadata};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ancestry::ProcessAncestry;
use crate::backend::RuntimeBackendRegistry;
use crate::container::{Container, ContainerBackend, ContainerRegistry};
use crate::error::{RuntimeError, RuntimeResult};
use crate::peer::PeerEndpoints;
use crate::runtime::{Runtime, RuntimeContext};
use crate::settings::RuntimeSettings;
use crate::signal::{RuntimeSignal, SignalReceiver, signal_channel};

/// Supervisor shared between the kernel, the quick launcher pool and the
/// signal loop.
pub type SharedSupervisor = Arc<Mutex<RuntimeSupervisor>>;

/// Arena of runtimes plus the collaborators needed to start them.
pub struct RuntimeSupervisor {
    backends: Arc<RuntimeBackendRegistry>,
    containers: Arc<ContainerRegistry>,
    endpoints: Arc<dyn PeerEndpoints>,
    ancestry: Arc<dyn ProcessAncestry>,
    ctx: RuntimeContext,
    runtimes: HashMap<RuntimeId, Runtime>,
    by_app: HashMap<ApplicationId, RuntimeId>,
    doomed: Vec<RuntimeId>,
}

impl std::fmt::Debug for RuntimeSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeSupervisor")
            .field("runtimes", &self.runtimes.len())
            .field("doomed", &self.doomed)
            .finish_non_exhaustive()
    }
}

impl RuntimeSupervisor {
    /// Create a supervisor and the receiving end of its signal queue.
    #[must_use]
    pub fn new(
        backends: Arc<RuntimeBackendRegistry>,
        containers: Arc<ContainerRegistry>,
        endpoints: Arc<dyn PeerEndpoints>,
        ancestry: Arc<dyn ProcessAncestry>,
        bus: EventBus,
        settings: Arc<RuntimeSettings>,
    ) -> (Self, SignalReceiver) {
        let (signals, rx) = signal_channel();
        let supervisor = Self {
            backends,
            containers,
            endpoints,
            ancestry,
            ctx: RuntimeContext::new(bus, signals, settings),
            runtimes: HashMap::new(),
            by_app: HashMap::new(),
            doomed: Vec::new(),
        };
        (supervisor, rx)
    }

    /// Wrap into a [`SharedSupervisor`].
    #[must_use]
    pub fn into_shared(self) -> SharedSupervisor {
        Arc::new(Mutex::new(self))
    }

    /// Runtime backend registry.
    #[must_use]
    pub fn backends(&self) -> &Arc<RuntimeBackendRegistry> {
        &self.backends
    }

    /// Container backend registry.
    #[must_use]
    pub fn containers(&self) -> &Arc<ContainerRegistry> {
        &self.containers
    }

    /// Event bus runtimes publish on.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.ctx.bus
    }

    /// Resolved runtime settings.
    #[must_use]
    pub fn settings(&self) -> &Arc<RuntimeSettings> {
        &self.ctx.settings
    }

    fn container_for(&self, runtime_name: &str) -> RuntimeResult<Arc<dyn ContainerBackend>> {
        let in_process = self
            .backends
            .resolve(runtime_name)
            .is_some_and(|b| b.is_in_process());
        let container = if in_process {
            self.containers.in_process()
        } else {
            self.containers.get(&self.ctx.settings.default_container)
        };
        container.ok_or_else(|| RuntimeError::UnknownContainer {
            id: if in_process {
                "<in-process>".to_owned()
            } else {
                self.ctx.settings.default_container.clone()
            },
        })
    }

    /// Start an application, optionally inside a container the quick
    /// launcher prepared. If the application already has a runtime, the
    /// document (if any) is forwarded to it instead.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::UnknownRuntime`] / [`RuntimeError::UnknownContainer`]
    /// if nothing can host the application, or the start error.
    pub async fn start_application(
        &mut self,
        application: &Application,
        document: Option<String>,
        prepared: Option<Box<dyn Container>>,
    ) -> RuntimeResult<RuntimeId> {
        if let Some(id) = self.runtime_for_application(&application.id)
            && let Some(rt) = self.runtimes.get_mut(&id)
            && rt.state() != RuntimeState::ShuttingDown
        {
            if let Some(document) = document {
                rt.open_document(document, "");
            }
            return Ok(id);
        }

        let mut runtime = match prepared {
            Some(sandbox) => self
                .backends
                .create_in(sandbox, application, self.ctx.clone())?,
            None => {
                let container = self.container_for(&application.runtime_name)?;
                self.backends
                    .create(&container, application, self.ctx.clone())?
            },
        };
        if let Some(document) = document {
            runtime.open_document(document, "");
        }

        runtime.start(self.endpoints.as_ref()).await?;

        let id = runtime.id();
        info!(runtime_id = %id, app_id = %application.id, "Started application");
        self.by_app.insert(application.id.clone(), id);
        self.runtimes.insert(id, runtime);
        Ok(id)
    }

    /// Start an unbound quick launcher instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the container or runtime backend is unknown or
    /// the start fails.
    pub async fn spawn_quick_launcher(
        &mut self,
        container_id: &str,
        runtime_name: &str,
    ) -> RuntimeResult<RuntimeId> {
        let container =
            self.containers
                .get(container_id)
                .ok_or_else(|| RuntimeError::UnknownContainer {
                    id: container_id.to_owned(),
                })?;
        let mut runtime =
            self.backends
                .create_quick_launcher(&container, runtime_name, self.ctx.clone())?;
        runtime.start(self.endpoints.as_ref()).await?;

        let id = runtime.id();
        self.runtimes.insert(id, runtime);
        Ok(id)
    }

    /// Attach an application to an idle quick launcher.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::NoSuchRuntime`] for an unknown id.
    /// - [`RuntimeError::AlreadyHasRuntime`] if the application runs elsewhere.
    /// - Attachment errors from [`Runtime::attach_application_to_quick_launcher`].
    pub fn attach(&mut self, id: RuntimeId, application: &Application) -> RuntimeResult<()> {
        if self.runtime_for_application(&application.id).is_some() {
            return Err(RuntimeError::AlreadyHasRuntime(application.id.to_string()));
        }
        let runtime = self
            .runtimes
            .get_mut(&id)
            .ok_or(RuntimeError::NoSuchRuntime(id))?;
        runtime.attach_application_to_quick_launcher(application.clone())?;
        self.by_app.insert(application.id.clone(), id);
        self.ctx.bus.publish(AppManEvent::QuickLauncherAttached {
            metadata: EventMetadata::new("appman-runtime"),
            runtime_id: id,
            application_id: application.id.clone(),
        });
        Ok(())
    }

    /// Stop a runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NoSuchRuntime`] for an unknown id.
    pub fn stop(&mut self, id: RuntimeId, force: bool) -> RuntimeResult<()> {
        self.runtimes
            .get_mut(&id)
            .ok_or(RuntimeError::NoSuchRuntime(id))?
            .stop(force);
        Ok(())
    }

    /// Stop the runtime of an application. Returns `false` if it has none.
    pub fn stop_application(&mut self, app_id: &ApplicationId, force: bool) -> bool {
        match self.runtime_for_application(app_id) {
            Some(id) => self.stop(id, force).is_ok(),
            None => false,
        }
    }

    /// Stop every runtime.
    pub fn stop_all(&mut self, force: bool) {
        info!(count = self.runtimes.len(), force, "Stopping all runtimes");
        for runtime in self.runtimes.values_mut() {
            runtime.stop(force);
        }
    }

    /// Forward a document to a running application.
    pub fn open_document(&mut self, app_id: &ApplicationId, document: &str) -> bool {
        let Some(id) = self.runtime_for_application(app_id) else {
            return false;
        };
        match self.runtimes.get_mut(&id) {
            Some(runtime) => {
                runtime.open_document(document, "");
                true
            },
            None => false,
        }
    }

    /// Apply one signal.
    pub fn handle_signal(&mut self, signal: RuntimeSignal) {
        let id = signal.runtime_id();
        let Some(runtime) = self.runtimes.get_mut(&id) else {
            debug!(runtime_id = %id, ?signal, "Signal for unknown runtime");
            if let RuntimeSignal::PeerConnected { link, .. } = signal {
                link.close();
            }
            return;
        };

        match signal {
            RuntimeSignal::ProcessExited { status, .. } => {
                self.endpoints.close(id);
                if runtime.on_process_exited(status) {
                    self.doomed.push(id);
                }
            },
            RuntimeSignal::PeerConnected { peer_pid, link, .. } => {
                runtime.on_peer_connected(peer_pid, link, self.ancestry.as_ref());
            },
            RuntimeSignal::FinishedInitialization { .. } => runtime.on_finished_initialization(),
            RuntimeSignal::PeerDisconnected { .. } => runtime.on_peer_disconnected(),
            RuntimeSignal::GraceExpired { generation, .. } => runtime.on_grace_expired(generation),
        }
    }

    /// Destroy runtimes whose process ended. Returns how many were removed.
    pub fn reap(&mut self) -> usize {
        let doomed = std::mem::take(&mut self.doomed);
        let count = doomed.len();
        for id in doomed {
            if let Some(runtime) = self.runtimes.remove(&id) {
                if let Some(app) = runtime.application()
                    && self.by_app.get(&app.id) == Some(&id)
                {
                    self.by_app.remove(&app.id);
                }
                debug!(runtime_id = %id, "Reaped runtime");
            }
        }
        count
    }

    /// Drop a runtime owned by the quick launcher pool, killing its process
    /// if it is still alive.
    pub fn discard(&mut self, id: RuntimeId) {
        if let Some(mut runtime) = self.runtimes.remove(&id) {
            if runtime.state() != RuntimeState::NotRunning {
                warn!(runtime_id = %id, "Discarding live runtime");
                runtime.stop(true);
            }
            self.endpoints.close(id);
            if let Some(app) = runtime.application()
                && self.by_app.get(&app.id) == Some(&id)
            {
                self.by_app.remove(&app.id);
            }
        }
    }

    /// Apply every queued signal, then reap. Returns the number of signals.
    pub fn process_pending(&mut self, rx: &mut SignalReceiver) -> usize {
        let mut count: usize = 0;
        while let Ok(signal) = rx.try_recv() {
            self.handle_signal(signal);
            count = count.saturating_add(1);
        }
        self.reap();
        count
    }

    /// Runtime by id.
    #[must_use]
    pub fn runtime(&self, id: RuntimeId) -> Option<&Runtime> {
        self.runtimes.get(&id)
    }

    /// Runtime of an application.
    #[must_use]
    pub fn runtime_for_application(&self, app_id: &ApplicationId) -> Option<RuntimeId> {
        self.by_app.get(app_id).copied()
    }

    /// Whether the application's runtime is up.
    #[must_use]
    pub fn is_running(&self, app_id: &ApplicationId) -> bool {
        self.runtime_for_application(app_id)
            .and_then(|id| self.runtimes.get(&id))
            .is_some_and(|rt| rt.state() == RuntimeState::Running)
    }

    /// Application whose process is `pid` or an ancestor of it.
    #[must_use]
    pub fn application_for_pid(&self, pid: u32) -> Option<ApplicationId> {
        let depth = self.ctx.settings.max_ancestry_depth;
        self.runtimes.values().find_map(|rt| {
            let app = rt.application()?;
            let runtime_pid = rt.pid()?;
            self.ancestry
                .descends_from(pid, runtime_pid, depth)
                .then(|| app.id.clone())
        })
    }

    /// Number of runtimes in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    /// Whether the arena is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }
}

/// Drive the supervisor: apply signals as they arrive and reap after each
/// batch. Returns once every sender is gone.
pub async fn run(supervisor: SharedSupervisor, mut rx: SignalReceiver) {
    while let Some(signal) = rx.recv().await {
        let mut guard = supervisor.lock().await;
        guard.handle_signal(signal);
        guard.process_pending(&mut rx);
    }
    debug!("Runtime signal queue closed");
}
