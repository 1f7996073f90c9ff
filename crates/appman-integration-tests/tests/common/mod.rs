//! Shared helpers for manager-level tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use appman_config::Config;
use appman_core::{Application, ApplicationId};
use appman_events::{AppManEvent, EventReceiver};
use appman_intents::{IntentCatalog, IntentClient, IntentHandler};
use appman_kernel::{Kernel, KernelOptions};
use appman_policy::CallerResolver;
use appman_runtime::{
    ContainerRegistry, DetachedEndpoints, NativeBackend, RuntimeBackend, RuntimeBackendRegistry,
};
use appman_test::{MockAncestry, MockContainerBackend, test_config, test_directory};
use tokio::task::JoinHandle;

/// A booted manager plus the container backend its runtimes run in.
pub struct TestKernel {
    pub kernel: Kernel,
    pub containers: MockContainerBackend,
}

/// Builder for [`TestKernel`].
pub struct TestKernelBuilder {
    config: Config,
    apps: Vec<Application>,
    catalog: IntentCatalog,
    callers: Option<Arc<dyn CallerResolver>>,
    backends: Vec<Arc<dyn RuntimeBackend>>,
    containers: MockContainerBackend,
}

impl TestKernelBuilder {
    pub fn new() -> Self {
        Self {
            config: test_config(None),
            apps: Vec::new(),
            catalog: IntentCatalog::new(),
            callers: None,
            backends: Vec::new(),
            containers: MockContainerBackend::new("process").exit_on_terminate(),
        }
    }

    pub fn app(mut self, app: Application) -> Self {
        self.apps.push(app);
        self
    }

    pub fn catalog(mut self, catalog: IntentCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Register a runtime backend next to the native one.
    pub fn backend(mut self, backend: Arc<dyn RuntimeBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn callers(mut self, callers: impl CallerResolver + 'static) -> Self {
        self.callers = Some(Arc::new(callers));
        self
    }

    pub fn configure(mut self, f: impl FnOnce(&mut Config)) -> Self {
        f(&mut self.config);
        self
    }

    pub async fn boot(self) -> TestKernel {
        let mut backends = RuntimeBackendRegistry::new();
        backends.register(Arc::new(NativeBackend)).unwrap();
        for backend in self.backends {
            backends.register(backend).unwrap();
        }
        let mut containers = ContainerRegistry::new();
        containers.register(Arc::new(self.containers.clone())).unwrap();

        let mut options = KernelOptions::new(self.config, test_directory(self.apps))
            .with_backends(backends)
            .with_containers(containers)
            .with_catalog(self.catalog)
            .with_ancestry(Arc::new(MockAncestry::new()))
            .with_endpoints(Arc::new(DetachedEndpoints::new()));
        if let Some(callers) = self.callers {
            options = options.with_callers(callers);
        }

        TestKernel {
            kernel: Kernel::boot(options).await.unwrap(),
            containers: self.containers,
        }
    }
}

pub fn app_id(id: &str) -> ApplicationId {
    ApplicationId::new(id).unwrap()
}

/// Connect `app` in-process, serve `intents` with `handler` and keep
/// serving until the connection closes.
pub fn serve(
    kernel: &Kernel,
    app: &str,
    intents: &[&str],
    handler: Arc<dyn IntentHandler>,
) -> JoinHandle<()> {
    let mut client = kernel.intent_client(app_id(app));
    for intent in intents {
        client.register_handler(intent, Arc::clone(&handler));
    }
    tokio::spawn(async move { while client.process_next().await {} })
}

/// Client for `app` that only sends requests.
pub fn requester(kernel: &Kernel, app: &str) -> IntentClient {
    kernel.intent_client(app_id(app))
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

/// Next event matching `pred`, or `None` after two seconds.
pub async fn next_event(
    events: &mut EventReceiver,
    mut pred: impl FnMut(&AppManEvent) -> bool,
) -> Option<Arc<AppManEvent>> {
    tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(event) = events.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}
