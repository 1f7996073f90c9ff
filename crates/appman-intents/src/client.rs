//! Client side of the intent protocol for in-process applications.
//!
//! [`IntentClient`] sends requests over an [`InProcessClient`] and serves
//! requests the manager routes to it through registered
//! [`IntentHandler`]s.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use appman_core::{ApplicationId, ParameterMap, Value};
use appman_ipc::{ConnectionMessage, InProcessClient, encode_request_id};
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{IntentError, IntentResult};
use crate::request::ERROR_MESSAGE_KEY;
use crate::settings::IntentSettings;

/// Error text sent back when no handler is registered for an intent.
pub const NO_HANDLER_FOUND: &str = "No matching IntentHandler found.";

/// A request the manager routed to this client.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingIntent {
    /// Request id.
    pub request_id: Uuid,
    /// Intent id.
    pub intent_id: String,
    /// Requester, or `:broadcast:` for broadcasts.
    pub requesting_application_id: ApplicationId,
    /// The application asked to handle it.
    pub application_id: ApplicationId,
    /// Request parameters.
    pub parameters: ParameterMap,
    /// Whether no reply is expected.
    pub broadcast: bool,
}

/// Serves one or more intents.
#[async_trait]
pub trait IntentHandler: Send + Sync {
    /// Handle a request. `Err` text becomes the reply's `errorMessage`.
    async fn handle(&self, intent: IncomingIntent) -> Result<ParameterMap, String>;
}

/// Result of a protected manager call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    /// Member that was called.
    pub member: String,
    /// Whether it succeeded.
    pub succeeded: bool,
    /// Error text, empty on success.
    pub message: String,
}

/// Intent requester and handler on an in-process connection.
pub struct IntentClient {
    inner: InProcessClient,
    handlers: HashMap<String, Arc<dyn IntentHandler>>,
    handler_timeout: Duration,
    reply_timeout: Duration,
    next_token: u64,
    accepted: HashMap<String, Uuid>,
    replies: HashMap<Uuid, (bool, ParameterMap)>,
    calls: VecDeque<CallResult>,
}

impl std::fmt::Debug for IntentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentClient")
            .field("connection", &self.inner.connection().id())
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl IntentClient {
    /// Wrap an in-process client.
    #[must_use]
    pub fn new(inner: InProcessClient, settings: &IntentSettings) -> Self {
        Self {
            inner,
            handlers: HashMap::new(),
            handler_timeout: settings.handler_reply_timeout(),
            reply_timeout: settings.reply_from_system_timeout,
            next_token: 0,
            accepted: HashMap::new(),
            replies: HashMap::new(),
            calls: VecDeque::new(),
        }
    }

    /// The wrapped client.
    #[must_use]
    pub fn inner(&self) -> &InProcessClient {
        &self.inner
    }

    /// Application this client speaks for.
    #[must_use]
    pub fn application_id(&self) -> Option<&ApplicationId> {
        self.inner.connection().application_id()
    }

    /// Register `handler` for `intent_id`. The first registration wins;
    /// returns `false` if one already exists.
    pub fn register_handler(&mut self, intent_id: &str, handler: Arc<dyn IntentHandler>) -> bool {
        if self.handlers.contains_key(intent_id) {
            warn!(intent_id, "Intent handler already registered, ignoring");
            return false;
        }
        self.handlers.insert(intent_id.to_owned(), handler);
        true
    }

    /// Drop the handler for `intent_id`.
    pub fn unregister_handler(&mut self, intent_id: &str) -> bool {
        self.handlers.remove(intent_id).is_some()
    }

    /// Request `intent_id` and wait for the final reply. Requests routed to
    /// this client while waiting are served.
    ///
    /// # Errors
    ///
    /// Returns [`IntentError::RequestFailed`] with the manager's error
    /// text, [`IntentError::SystemReplyTimeout`] if no reply arrives in
    /// time, or [`IntentError::Ipc`] if the connection is gone.
    pub async fn request(
        &mut self,
        intent_id: &str,
        application_id: Option<&ApplicationId>,
        parameters: ParameterMap,
    ) -> IntentResult<ParameterMap> {
        let target = application_id.map(ApplicationId::as_str).unwrap_or_default();
        self.send_request(intent_id, target, parameters).await
    }

    /// Broadcast `intent_id` to every other application that handles it.
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request).
    pub async fn broadcast(&mut self, intent_id: &str, parameters: ParameterMap) -> IntentResult<()> {
        self.send_request(intent_id, appman_core::BROADCAST_REQUESTER, parameters)
            .await
            .map(|_| ())
    }

    /// Invoke a protected manager operation and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns [`IntentError::Ipc`] for schema errors or a lost connection
    /// and [`IntentError::SystemReplyTimeout`] if no result arrives.
    pub async fn call_manager(&mut self, member: &str, args: Vec<Value>) -> IntentResult<CallResult> {
        self.inner.call_manager(member, args)?;
        let deadline = Instant::now()
            .checked_add(self.reply_timeout)
            .unwrap_or_else(Instant::now);
        loop {
            if let Some(pos) = self.calls.iter().position(|c| c.member == member)
                && let Some(result) = self.calls.remove(pos)
            {
                return Ok(result);
            }
            self.pump_until(deadline).await?;
        }
    }

    /// Wait for and handle the next message. Returns `false` once the
    /// connection is gone.
    pub async fn process_next(&mut self) -> bool {
        match self.inner.recv().await {
            Some(message) => {
                self.handle_message(message).await;
                true
            },
            None => false,
        }
    }

    /// Handle every message already queued. Returns how many were handled.
    pub async fn process_queued(&mut self) -> usize {
        let mut count: usize = 0;
        while let Some(message) = self.inner.try_recv() {
            self.handle_message(message).await;
            count = count.saturating_add(1);
        }
        count
    }

    async fn send_request(
        &mut self,
        intent_id: &str,
        target: &str,
        parameters: ParameterMap,
    ) -> IntentResult<ParameterMap> {
        self.next_token = self.next_token.wrapping_add(1);
        let token = format!("t{}", self.next_token);
        self.inner
            .request_to_system(&token, intent_id, target, parameters)?;
        debug!(intent_id, target, token = %token, "Intent request sent");

        let deadline = Instant::now()
            .checked_add(self.reply_timeout)
            .unwrap_or_else(Instant::now);
        loop {
            if let Some(id) = self.accepted.get(&token).copied()
                && let Some((error, result)) = self.replies.remove(&id)
            {
                self.accepted.remove(&token);
                if error {
                    let message = result
                        .get(ERROR_MESSAGE_KEY)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned();
                    return Err(IntentError::RequestFailed(message));
                }
                return Ok(result);
            }
            if let Err(e) = self.pump_until(deadline).await {
                self.accepted.remove(&token);
                return Err(e);
            }
        }
    }

    async fn pump_until(&mut self, deadline: Instant) -> IntentResult<()> {
        match tokio::time::timeout_at(deadline, self.inner.recv()).await {
            Ok(Some(message)) => {
                self.handle_message(message).await;
                Ok(())
            },
            Ok(None) => Err(IntentError::Ipc("connection closed".to_owned())),
            Err(_) => {
                warn!(timeout_ms = self.reply_timeout.as_millis(), "No reply from the manager");
                Err(IntentError::SystemReplyTimeout(self.reply_timeout.as_millis()))
            },
        }
    }

    async fn handle_message(&mut self, message: ConnectionMessage) {
        match message {
            ConnectionMessage::RequestAccepted {
                client_token,
                request_id,
            } => {
                self.accepted.insert(client_token, request_id);
            },
            ConnectionMessage::ReplyFromSystem {
                request_id,
                error,
                result,
            } => {
                self.replies.insert(request_id, (error, result));
            },
            ConnectionMessage::CallFinished {
                member,
                succeeded,
                message,
            } => self.calls.push_back(CallResult {
                member,
                succeeded,
                message,
            }),
            ConnectionMessage::RequestToApplication {
                request_id,
                broadcast,
                intent_id,
                requesting_application_id,
                application_id,
                parameters,
            } => {
                let incoming = IncomingIntent {
                    request_id,
                    intent_id,
                    requesting_application_id,
                    application_id,
                    parameters,
                    broadcast,
                };
                self.serve(incoming).await;
            },
        }
    }

    async fn serve(&self, intent: IncomingIntent) {
        let wire_id = encode_request_id(intent.request_id, intent.broadcast);
        let broadcast = intent.broadcast;
        let intent_id = intent.intent_id.clone();

        let outcome = match self.handlers.get(&intent_id) {
            None => {
                warn!(intent_id = %intent_id, "No handler for routed intent");
                Err(NO_HANDLER_FOUND.to_owned())
            },
            Some(handler) => {
                match tokio::time::timeout(self.handler_timeout, handler.handle(intent)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(format!(
                        "Intent request to application timed out after {} ms",
                        self.handler_timeout.as_millis()
                    )),
                }
            },
        };

        if broadcast {
            if let Err(e) = outcome {
                debug!(intent_id = %intent_id, error = %e, "Broadcast handler failed");
            }
            return;
        }
        let (error, result) = match outcome {
            Ok(result) => (false, result),
            Err(message) => (
                true,
                ParameterMap::from([(ERROR_MESSAGE_KEY.to_owned(), Value::String(message))]),
            ),
        };
        if let Err(e) = self.inner.reply_from_application(&wire_id, error, result) {
            warn!(intent_id = %intent_id, error = %e, "Could not send intent reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use appman_ipc::{IpcConnection, IpcEvent, ipc_event_channel};

    use super::*;

    struct Echo;

    #[async_trait]
    impl IntentHandler for Echo {
        async fn handle(&self, intent: IncomingIntent) -> Result<ParameterMap, String> {
            Ok(intent.parameters)
        }
    }

    struct Stuck;

    #[async_trait]
    impl IntentHandler for Stuck {
        async fn handle(&self, _intent: IncomingIntent) -> Result<ParameterMap, String> {
            std::future::pending().await
        }
    }

    fn client() -> (IntentClient, Arc<IpcConnection>, appman_ipc::IpcEventReceiver) {
        let (conn, inbox) =
            IpcConnection::in_process(ApplicationId::new("com.example.a").unwrap(), false);
        let (events_tx, events_rx) = ipc_event_channel();
        let inner = InProcessClient::new(Arc::clone(&conn), inbox, events_tx);
        (
            IntentClient::new(inner, &IntentSettings::default()),
            conn,
            events_rx,
        )
    }

    fn routed(conn: &IpcConnection, intent_id: &str, broadcast: bool) -> Uuid {
        let id = Uuid::new_v4();
        conn.send(ConnectionMessage::RequestToApplication {
            request_id: id,
            broadcast,
            intent_id: intent_id.to_owned(),
            requesting_application_id: ApplicationId::new("com.example.b").unwrap(),
            application_id: ApplicationId::new("com.example.a").unwrap(),
            parameters: ParameterMap::from([("k".to_owned(), 1_i64.into())]),
        })
        .unwrap();
        id
    }

    #[tokio::test]
    async fn test_first_registration_wins() {
        let (mut client, _conn, _events) = client();
        assert!(client.register_handler("echo", Arc::new(Echo)));
        assert!(!client.register_handler("echo", Arc::new(Stuck)));
        assert!(client.unregister_handler("echo"));
        assert!(!client.unregister_handler("echo"));
    }

    #[tokio::test]
    async fn test_serves_registered_handler() {
        let (mut client, conn, mut events) = client();
        client.register_handler("echo", Arc::new(Echo));
        let id = routed(&conn, "echo", false);

        assert_eq!(client.process_queued().await, 1);
        let Some(IpcEvent::Reply {
            request_id,
            error,
            result,
            ..
        }) = events.try_recv().ok()
        else {
            panic!("expected a reply");
        };
        assert_eq!(request_id, id.to_string());
        assert!(!error);
        assert_eq!(result["k"], Value::Int(1));
    }

    #[tokio::test]
    async fn test_missing_handler_replies_with_error() {
        let (mut client, conn, mut events) = client();
        routed(&conn, "unknown", false);
        client.process_queued().await;

        let Some(IpcEvent::Reply { error, result, .. }) = events.try_recv().ok() else {
            panic!("expected a reply");
        };
        assert!(error);
        assert_eq!(result[ERROR_MESSAGE_KEY], Value::from(NO_HANDLER_FOUND));
    }

    #[tokio::test]
    async fn test_broadcast_gets_no_reply() {
        let (mut client, conn, mut events) = client();
        client.register_handler("refresh", Arc::new(Echo));
        routed(&conn, "refresh", true);
        client.process_queued().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_timeout_replies_before_broker_gives_up() {
        let (mut client, conn, mut events) = client();
        client.register_handler("slow", Arc::new(Stuck));
        routed(&conn, "slow", false);
        client.process_queued().await;

        let Some(IpcEvent::Reply { error, result, .. }) = events.try_recv().ok() else {
            panic!("expected a reply");
        };
        assert!(error);
        assert_eq!(
            result[ERROR_MESSAGE_KEY],
            Value::from("Intent request to application timed out after 4500 ms")
        );
    }

    #[tokio::test]
    async fn test_request_resolves_on_reply() {
        let (mut client, conn, mut events) = client();
        let server = tokio::spawn(async move {
            let Some(IpcEvent::Request { client_token, .. }) = events.recv().await else {
                panic!("expected a request");
            };
            let id = Uuid::new_v4();
            conn.send(ConnectionMessage::RequestAccepted {
                client_token,
                request_id: id,
            })
            .unwrap();
            conn.send(ConnectionMessage::ReplyFromSystem {
                request_id: id,
                error: true,
                result: ParameterMap::from([(
                    ERROR_MESSAGE_KEY.to_owned(),
                    crate::error::NO_MATCHING_HANDLER.into(),
                )]),
            })
            .unwrap();
        });

        let err = client.request("play", None, ParameterMap::new()).await.unwrap_err();
        assert_eq!(
            err,
            IntentError::RequestFailed(crate::error::NO_MATCHING_HANDLER.to_owned())
        );
        server.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out() {
        let (mut client, _conn, _events) = client();
        let err = client.request("play", None, ParameterMap::new()).await.unwrap_err();
        assert_eq!(err, IntentError::SystemReplyTimeout(20_000));
        assert_eq!(
            err.to_string(),
            "No reply received from Intent server after 20000 ms"
        );
    }
}
