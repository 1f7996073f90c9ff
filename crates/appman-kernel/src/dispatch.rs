//! Handling of client calls arriving over IPC.
//!
//! Intent traffic goes to the broker. Manager calls are checked against the
//! access policy first and always answered with `callFinished`.

use std::sync::Arc;

use appman_core::{ApplicationDirectory, ApplicationId, ParameterMap, Value};
use appman_intents::SharedBroker;
use appman_ipc::{ConnectionMessage, IpcConnection, IpcEvent, IpcEventReceiver};
use appman_policy::AccessPolicy;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::launcher::AppLauncher;

/// Intent id used for `openUrl`.
pub const OPEN_URL_INTENT: &str = "openUrl";

/// Routes [`IpcEvent`]s to the broker and the manager operations.
pub(crate) struct Dispatcher {
    pub(crate) broker: SharedBroker,
    pub(crate) policy: Arc<AccessPolicy>,
    pub(crate) directory: Arc<dyn ApplicationDirectory>,
    pub(crate) launcher: Arc<AppLauncher>,
}

impl Dispatcher {
    /// Handle events until the queue closes or `shutdown` fires.
    pub(crate) async fn run(self, mut events: IpcEventReceiver, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }
        debug!("IPC dispatcher stopped");
    }

    pub(crate) async fn handle(&self, event: IpcEvent) {
        match event {
            IpcEvent::Request {
                connection,
                client_token,
                intent_id,
                application_id,
                parameters,
            } => {
                let result = self.broker.lock().await.request_to_system(
                    &connection,
                    &client_token,
                    &intent_id,
                    &application_id,
                    parameters,
                );
                if let Err(e) = result {
                    warn!(connection_id = %connection.id(), intent_id = %intent_id, error = %e, "Intent request rejected");
                }
            },
            IpcEvent::Reply {
                connection,
                request_id,
                error,
                result,
            } => {
                let outcome = self.broker.lock().await.reply_from_application(
                    &connection,
                    &request_id,
                    error,
                    result,
                );
                if let Err(e) = outcome {
                    debug!(connection_id = %connection.id(), request_id = %request_id, error = %e, "Reply dropped");
                }
            },
            IpcEvent::ManagerCall {
                connection,
                member,
                args,
            } => self.manager_call(connection, member, args).await,
            IpcEvent::Disconnected { connection_id } => {
                self.broker.lock().await.connection_lost(connection_id);
            },
        }
    }

    async fn manager_call(&self, connection: Arc<IpcConnection>, member: String, args: Vec<Value>) {
        let pid = connection.peer_pid().unwrap_or_else(std::process::id);
        let capabilities = connection
            .application_id()
            .map(|app| self.directory.capabilities(app))
            .unwrap_or_default();
        if let Err(e) = self.policy.authorize(pid, &member, &capabilities) {
            finish(&connection, &member, Err(e.to_string()));
            return;
        }

        let arg = |i: usize| args.get(i).and_then(Value::as_str).unwrap_or_default().to_owned();
        match member.as_str() {
            "startApplication" => {
                let Ok(app_id) = ApplicationId::new(arg(0)) else {
                    finish(&connection, &member, Err(format!("invalid application id '{}'", arg(0))));
                    return;
                };
                let document = Some(arg(1)).filter(|d| !d.is_empty());
                let launcher = Arc::clone(&self.launcher);
                tokio::spawn(async move {
                    let result = launcher
                        .launch(&app_id, document)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string());
                    finish(&connection, &member, result);
                });
            },
            "stopApplication" => {
                let force = args.get(1).and_then(Value::as_bool).unwrap_or(false);
                let result = match ApplicationId::new(arg(0)) {
                    Ok(app_id) if self.launcher.stop(&app_id, force).await => Ok(()),
                    Ok(app_id) => Err(format!("application '{app_id}' is not running")),
                    Err(e) => Err(e.to_string()),
                };
                finish(&connection, &member, result);
            },
            "openUrl" => {
                let parameters = ParameterMap::from([("url".to_owned(), Value::String(arg(0)))]);
                let (request_id, outcome) =
                    self.broker
                        .lock()
                        .await
                        .request_from_system(OPEN_URL_INTENT, None, parameters);
                info!(request_id = %request_id, "Opening URL through intent");
                tokio::spawn(async move {
                    let result = match outcome.await {
                        Ok(outcome) if outcome.succeeded => Ok(()),
                        Ok(outcome) => Err(outcome
                            .error
                            .map(|e| e.to_string())
                            .unwrap_or_default()),
                        Err(_) => Err("intent broker stopped".to_owned()),
                    };
                    finish(&connection, &member, result);
                });
            },
            other => finish(&connection, other, Err(format!("unknown operation '{other}'"))),
        }
    }
}

fn finish(connection: &IpcConnection, member: &str, result: Result<(), String>) {
    let (succeeded, message) = match result {
        Ok(()) => (true, String::new()),
        Err(message) => (false, message),
    };
    if !succeeded {
        debug!(connection_id = %connection.id(), member, message = %message, "Manager call failed");
    }
    let reply = ConnectionMessage::CallFinished {
        member: member.to_owned(),
        succeeded,
        message,
    };
    if let Err(e) = connection.send(reply) {
        debug!(connection_id = %connection.id(), error = %e, "Could not report call result");
    }
}
