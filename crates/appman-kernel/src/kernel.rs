//! The manager context: every long-lived component, built once at startup.

use std::path::PathBuf;
use std::sync::Arc;

use appman_config::Config;
use appman_core::{ApplicationDirectory, ApplicationId, ParameterMap, RuntimeId, TimeoutFactor};
use appman_events::EventBus;
use appman_intents::{
    ApplicationStarter, IntentBroker, IntentCatalog, IntentClient, IntentOutcome, IntentSettings,
    SharedBroker,
};
use appman_ipc::{
    ConnectionId, ConnectionIndex, InProcessClient, IpcConnection, IpcEvent, IpcEventSender,
    UnixSocketEndpoints, ipc_event_channel,
};
use appman_policy::{AccessPolicy, CallerResolver, ProcfsCallerResolver};
use appman_runtime::{
    ContainerRegistry, PeerEndpoints, ProcessAncestry, ProcfsAncestry, QuickLaunchSettings,
    QuickLauncherPool, RuntimeBackendRegistry, RuntimeSettings, RuntimeSupervisor,
    SharedSupervisor,
};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::dispatch::{Dispatcher, OPEN_URL_INTENT};
use crate::error::{KernelError, KernelResult};
use crate::launcher::{AppLauncher, FatalState};

/// Everything needed to boot a [`Kernel`].
pub struct KernelOptions {
    config: Config,
    directory: Arc<dyn ApplicationDirectory>,
    backends: RuntimeBackendRegistry,
    containers: ContainerRegistry,
    catalog: IntentCatalog,
    ancestry: Arc<dyn ProcessAncestry>,
    callers: Arc<dyn CallerResolver>,
    endpoints: Option<Arc<dyn PeerEndpoints>>,
}

impl std::fmt::Debug for KernelOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelOptions")
            .field("backends", &self.backends.ids())
            .field("intents", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

impl KernelOptions {
    /// Options with built-in containers, no runtime backends, an empty
    /// intent catalog and procfs-based caller checks.
    #[must_use]
    pub fn new(config: Config, directory: Arc<dyn ApplicationDirectory>) -> Self {
        Self {
            config,
            directory,
            backends: RuntimeBackendRegistry::new(),
            containers: ContainerRegistry::with_builtin(),
            catalog: IntentCatalog::new(),
            ancestry: Arc::new(ProcfsAncestry::default()),
            callers: Arc::new(ProcfsCallerResolver::default()),
            endpoints: None,
        }
    }

    /// Runtime backends.
    #[must_use]
    pub fn with_backends(mut self, backends: RuntimeBackendRegistry) -> Self {
        self.backends = backends;
        self
    }

    /// Container backends.
    #[must_use]
    pub fn with_containers(mut self, containers: ContainerRegistry) -> Self {
        self.containers = containers;
        self
    }

    /// Installed intents.
    #[must_use]
    pub fn with_catalog(mut self, catalog: IntentCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Process ancestry source for peer authentication.
    #[must_use]
    pub fn with_ancestry(mut self, ancestry: Arc<dyn ProcessAncestry>) -> Self {
        self.ancestry = ancestry;
        self
    }

    /// Caller resolution for the access policy.
    #[must_use]
    pub fn with_callers(mut self, callers: Arc<dyn CallerResolver>) -> Self {
        self.callers = callers;
        self
    }

    /// Peer endpoints to use instead of Unix sockets.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Arc<dyn PeerEndpoints>) -> Self {
        self.endpoints = Some(endpoints);
        self
    }
}

/// The application manager.
pub struct Kernel {
    config: Arc<Config>,
    bus: EventBus,
    directory: Arc<dyn ApplicationDirectory>,
    supervisor: SharedSupervisor,
    pool: QuickLauncherPool,
    index: Arc<ConnectionIndex>,
    broker: SharedBroker,
    policy: Arc<AccessPolicy>,
    launcher: Arc<AppLauncher>,
    ipc_events: IpcEventSender,
    intent_settings: IntentSettings,
    fatal: Arc<FatalState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("connections", &self.index.len())
            .field("pool", &self.pool)
            .field("fatal", &self.fatal.reason())
            .finish_non_exhaustive()
    }
}

impl Kernel {
    /// Build every component and start the background loops.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Policy`] if an access policy section is
    /// unusable.
    pub async fn boot(options: KernelOptions) -> KernelResult<Self> {
        let KernelOptions {
            config,
            directory,
            backends,
            containers,
            catalog,
            ancestry,
            callers,
            endpoints,
        } = options;

        let factor = TimeoutFactor::new(config.debug.timeout_factor);
        let bus = EventBus::new();
        let (ipc_events, ipc_rx) = ipc_event_channel();
        let index = Arc::new(ConnectionIndex::new(bus.clone()));

        let endpoints: Arc<dyn PeerEndpoints> = match endpoints {
            Some(endpoints) => endpoints,
            None => {
                let dir = socket_dir(&config);
                debug!(socket_dir = %dir.display(), "Using Unix socket peer endpoints");
                Arc::new(UnixSocketEndpoints::new(
                    dir,
                    Arc::clone(&index),
                    ipc_events.clone(),
                ))
            },
        };

        let policy = Arc::new(AccessPolicy::from_config(&config.access_policy, callers)?);

        let runtime_settings = Arc::new(RuntimeSettings::from_config(&config, factor));
        let backends = Arc::new(backends);
        let containers = Arc::new(containers);
        let (supervisor, signals) = RuntimeSupervisor::new(
            Arc::clone(&backends),
            Arc::clone(&containers),
            endpoints,
            ancestry,
            bus.clone(),
            Arc::clone(&runtime_settings),
        );
        let supervisor = supervisor.into_shared();

        let pool = QuickLauncherPool::new(
            Arc::clone(&supervisor),
            QuickLaunchSettings::from_config(&config, factor),
            runtime_settings.default_container.clone(),
        );

        let fatal = Arc::new(FatalState::default());
        let launcher = Arc::new(AppLauncher::new(
            Arc::clone(&directory),
            Arc::clone(&supervisor),
            pool.clone(),
            Arc::clone(&fatal),
        ));

        let intent_settings = IntentSettings::from_config(&config, factor);
        let (broker, broker_signals) = IntentBroker::new(
            catalog,
            Arc::clone(&index),
            Arc::clone(&directory),
            Arc::clone(&launcher) as Arc<dyn ApplicationStarter>,
            bus.clone(),
            intent_settings.clone(),
        );
        let broker = broker.into_shared();

        let mut tasks = vec![
            tokio::spawn(appman_runtime::run(Arc::clone(&supervisor), signals)),
            tokio::spawn(appman_intents::run(Arc::clone(&broker), broker_signals)),
            pool.watch(bus.subscribe()),
        ];
        let dispatcher = Dispatcher {
            broker: Arc::clone(&broker),
            policy: Arc::clone(&policy),
            directory: Arc::clone(&directory),
            launcher: Arc::clone(&launcher),
        };
        tasks.push(tokio::spawn(
            dispatcher.run(ipc_rx, fatal.shutdown_token().clone()),
        ));

        pool.initialize(&containers, &backends);
        info!(
            backends = ?backends.ids(),
            timeout_factor = factor.get(),
            "Application manager started"
        );

        Ok(Self {
            config: Arc::new(config),
            bus,
            directory,
            supervisor,
            pool,
            index,
            broker,
            policy,
            launcher,
            ipc_events,
            intent_settings,
            fatal,
            tasks: Mutex::new(tasks),
        })
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Lifecycle and intent events.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Installed applications.
    #[must_use]
    pub fn directory(&self) -> &Arc<dyn ApplicationDirectory> {
        &self.directory
    }

    /// Runtime arena.
    #[must_use]
    pub fn supervisor(&self) -> &SharedSupervisor {
        &self.supervisor
    }

    /// Quick launcher pool.
    #[must_use]
    pub fn pool(&self) -> &QuickLauncherPool {
        &self.pool
    }

    /// Live connections.
    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionIndex> {
        &self.index
    }

    /// Intent broker.
    #[must_use]
    pub fn broker(&self) -> &SharedBroker {
        &self.broker
    }

    /// Access policy for manager calls.
    #[must_use]
    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Resolved intent timeouts.
    #[must_use]
    pub fn intent_settings(&self) -> &IntentSettings {
        &self.intent_settings
    }

    /// Start an application or forward `document` to it.
    ///
    /// # Errors
    ///
    /// See [`AppLauncher::launch`].
    pub async fn start_application(
        &self,
        application_id: &ApplicationId,
        document: Option<String>,
    ) -> KernelResult<RuntimeId> {
        self.launcher.launch(application_id, document).await
    }

    /// Stop an application. Returns `false` if it is not running.
    pub async fn stop_application(&self, application_id: &ApplicationId, force: bool) -> bool {
        self.launcher.stop(application_id, force).await
    }

    /// Open a URL through the `openUrl` intent.
    pub async fn open_url(&self, url: &str) -> (Uuid, oneshot::Receiver<IntentOutcome>) {
        let parameters = ParameterMap::from([("url".to_owned(), url.into())]);
        self.broker
            .lock()
            .await
            .request_from_system(OPEN_URL_INTENT, None, parameters)
    }

    /// Register an in-process client for `application_id`. Bootstrapping
    /// connections do not receive requests until marked ready.
    #[must_use]
    pub fn connect_in_process(
        &self,
        application_id: ApplicationId,
        bootstrapping: bool,
    ) -> InProcessClient {
        let (connection, inbox) = IpcConnection::in_process(application_id, bootstrapping);
        self.index.insert(Arc::clone(&connection));
        InProcessClient::new(connection, inbox, self.ipc_events.clone())
    }

    /// [`connect_in_process`](Self::connect_in_process) wrapped in an
    /// intent client.
    #[must_use]
    pub fn intent_client(&self, application_id: ApplicationId) -> IntentClient {
        IntentClient::new(
            self.connect_in_process(application_id, false),
            &self.intent_settings,
        )
    }

    /// Tear down a connection. Requests bound to it fail.
    pub fn disconnect(&self, connection_id: ConnectionId) {
        if self.index.remove(connection_id).is_some() {
            let _ = self
                .ipc_events
                .send(IpcEvent::Disconnected { connection_id });
        }
    }

    /// First fatal failure, if one occurred.
    #[must_use]
    pub fn fatal_error(&self) -> Option<KernelError> {
        self.fatal
            .reason()
            .map(|reason| KernelError::Fatal(reason.to_owned()))
    }

    /// Wait until shutdown is requested or a fatal failure occurs.
    pub async fn wait_for_shutdown(&self) {
        self.fatal.shutdown_token().cancelled().await;
    }

    /// Stop everything: idle quick launchers are killed, runtimes asked to
    /// quit and background loops end.
    pub async fn shutdown(&self, force: bool) {
        info!(force, "Shutting down application manager");
        self.pool.kill_all().await;
        self.supervisor.lock().await.stop_all(force);
        self.fatal.shutdown_token().cancel();
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }
}

fn socket_dir(config: &Config) -> PathBuf {
    config.runtime.peer_socket_dir.clone().unwrap_or_else(|| {
        directories::BaseDirs::new()
            .and_then(|dirs| dirs.runtime_dir().map(|d| d.join("appman")))
            .unwrap_or_else(|| std::env::temp_dir().join("appman"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use appman_runtime::DetachedEndpoints;
    use appman_test::{MockAncestry, test_application, test_config, test_directory};

    async fn boot() -> Kernel {
        let directory = test_directory([test_application("com.example.music", "native")]);
        let options = KernelOptions::new(test_config(None), directory)
            .with_ancestry(Arc::new(MockAncestry::new()))
            .with_endpoints(Arc::new(DetachedEndpoints::new()));
        Kernel::boot(options).await.unwrap()
    }

    #[tokio::test]
    async fn test_in_process_connect_and_disconnect() {
        let kernel = boot().await;
        let mut events = kernel.bus().subscribe();
        let app = ApplicationId::new("com.example.music").unwrap();

        let client = kernel.connect_in_process(app.clone(), false);
        let id = client.connection().id();
        assert!(kernel.connections().ready_for_application(&app).is_some());

        kernel.disconnect(id);
        assert!(kernel.connections().get(id).is_none());
        let lost = events
            .drain()
            .into_iter()
            .any(|e| matches!(e.as_ref(), appman_events::AppManEvent::ConnectionLost { .. }));
        assert!(lost);
    }

    #[tokio::test]
    async fn test_start_without_backend_is_not_fatal() {
        let kernel = boot().await;
        let app = ApplicationId::new("com.example.music").unwrap();

        let err = kernel.start_application(&app, None).await.unwrap_err();
        assert!(matches!(err, KernelError::Runtime(_)));
        assert!(kernel.fatal_error().is_none());

        kernel.shutdown(false).await;
        kernel.wait_for_shutdown().await;
    }

    #[test]
    fn test_socket_dir_prefers_config() {
        let mut config = Config::default();
        config.runtime.peer_socket_dir = Some(PathBuf::from("/run/appman-test"));
        assert_eq!(socket_dir(&config), PathBuf::from("/run/appman-test"));

        config.runtime.peer_socket_dir = None;
        assert!(socket_dir(&config).ends_with("appman"));
    }
}
