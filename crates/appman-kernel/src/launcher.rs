//! Starting applications on behalf of clients and the intent broker.
//!
//! A start first tries the quick launcher pool: a warm runtime gets the
//! application attached, a prepared container hosts a fresh runtime. Without
//! a pooled instance the application is started cold.

use std::sync::{Arc, OnceLock};

use appman_core::{Application, ApplicationDirectory, ApplicationId, RuntimeId};
use appman_intents::ApplicationStarter;
use appman_runtime::{Acquired, QuickLauncherPool, SharedSupervisor};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{KernelError, KernelResult};

/// Records the first fatal failure and requests shutdown.
#[derive(Debug, Default)]
pub struct FatalState {
    reason: OnceLock<String>,
    shutdown: CancellationToken,
}

impl FatalState {
    /// Record `reason` and cancel the shutdown token. Later reasons are
    /// dropped.
    pub fn raise(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(reason = %reason, "Fatal failure, shutting down");
        let _ = self.reason.set(reason);
        self.shutdown.cancel();
    }

    /// First recorded fatal reason.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }

    /// Token cancelled on shutdown.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

/// Starts applications, preferring pooled quick launcher instances.
pub struct AppLauncher {
    directory: Arc<dyn ApplicationDirectory>,
    supervisor: SharedSupervisor,
    pool: QuickLauncherPool,
    fatal: Arc<FatalState>,
}

impl std::fmt::Debug for AppLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppLauncher")
            .field("pool", &self.pool)
            .field("fatal", &self.fatal.reason())
            .finish_non_exhaustive()
    }
}

impl AppLauncher {
    /// Create a launcher.
    #[must_use]
    pub fn new(
        directory: Arc<dyn ApplicationDirectory>,
        supervisor: SharedSupervisor,
        pool: QuickLauncherPool,
        fatal: Arc<FatalState>,
    ) -> Self {
        Self {
            directory,
            supervisor,
            pool,
            fatal,
        }
    }

    /// Start `application_id`, or forward `document` to its running
    /// instance.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::UnknownApplication`] for ids the directory
    /// does not know, or the runtime layer's start error. Fatal start errors
    /// also trigger shutdown.
    pub async fn launch(
        &self,
        application_id: &ApplicationId,
        document: Option<String>,
    ) -> KernelResult<RuntimeId> {
        let application = self
            .directory
            .application(application_id)
            .ok_or_else(|| KernelError::UnknownApplication(application_id.clone()))?;

        let result = self.launch_application(&application, document).await;
        if let Err(e) = &result
            && e.is_fatal()
        {
            self.fatal.raise(e.to_string());
        }
        result
    }

    async fn launch_application(
        &self,
        application: &Application,
        document: Option<String>,
    ) -> KernelResult<RuntimeId> {
        let mut supervisor = self.supervisor.lock().await;
        if supervisor.runtime_for_application(&application.id).is_some() {
            return Ok(supervisor
                .start_application(application, document, None)
                .await?);
        }

        match self.pool.acquire(&application.runtime_name) {
            Some(Acquired::Runtime(id)) => match supervisor.attach(id, application) {
                Ok(()) => {
                    info!(runtime_id = %id, app_id = %application.id, "Started application on quick launcher");
                    if let Some(document) = document {
                        supervisor.open_document(&application.id, &document);
                    }
                    return Ok(id);
                },
                Err(e) => {
                    warn!(runtime_id = %id, app_id = %application.id, error = %e, "Quick launcher attach failed, starting cold");
                    supervisor.discard(id);
                },
            },
            Some(Acquired::Container(container)) => {
                debug!(app_id = %application.id, "Starting application in a prepared container");
                return Ok(supervisor
                    .start_application(application, document, Some(container))
                    .await?);
            },
            None => {},
        }

        Ok(supervisor
            .start_application(application, document, None)
            .await?)
    }

    /// Stop the runtime of `application_id`. Returns `false` if it has none.
    pub async fn stop(&self, application_id: &ApplicationId, force: bool) -> bool {
        self.supervisor
            .lock()
            .await
            .stop_application(application_id, force)
    }
}

#[async_trait]
impl ApplicationStarter for AppLauncher {
    async fn start_application(&self, application_id: &ApplicationId) -> Result<(), String> {
        self.launch(application_id, None)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
