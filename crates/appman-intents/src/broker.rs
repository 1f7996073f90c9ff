//! Intent request broker.
//!
//! Requests move through their states on the broker's own turns. Every step
//! that changes a request posts a [`BrokerSignal`]; timers and handler start
//! tasks do the same. Nothing is delivered to a handler from inside the call
//! that created the request, so in-process and peer channel clients observe
//! the same ordering.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use appman_core::{ApplicationDirectory, ApplicationId, ParameterMap, Value};
use appman_events::{AppManEvent, EventBus, EventMetadata};
use appman_ipc::{ConnectionId, ConnectionIndex, ConnectionMessage, IpcConnection, decode_request_id};
use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::IntentCatalog;
use crate::error::{IntentError, IntentResult};
use crate::intent::Intent;
use crate::request::{Direction, ERROR_MESSAGE_KEY, IntentOutcome, IntentRequest, RequestState};
use crate::settings::IntentSettings;

const EVENT_SOURCE: &str = "appman-intents";

/// Finished requests kept for inspection.
const HISTORY_LIMIT: usize = 256;

/// Starts handler applications on the broker's behalf.
#[async_trait]
pub trait ApplicationStarter: Send + Sync {
    /// Start `application_id` unless it is already running. Returns once
    /// the start was initiated; readiness is observed on the connection
    /// index.
    async fn start_application(&self, application_id: &ApplicationId) -> Result<(), String>;
}

/// Work item for the broker's next turn.
#[derive(Debug)]
pub enum BrokerSignal {
    /// Advance a request.
    Process(Uuid),
    /// The disambiguation window closed.
    DisambiguationExpired(Uuid),
    /// The handler of a request has a ready connection.
    HandlerReady(Uuid),
    /// The handler of a request could not be brought up.
    HandlerUnavailable {
        /// Request id.
        request_id: Uuid,
        /// Why.
        error: IntentError,
    },
    /// The reply window closed.
    ReplyExpired(Uuid),
}

/// Sending half of the broker's signal queue.
pub type BrokerSignalSender = mpsc::UnboundedSender<BrokerSignal>;

/// Receiving half of the broker's signal queue.
pub type BrokerSignalReceiver = mpsc::UnboundedReceiver<BrokerSignal>;

/// Broker shared between the IPC dispatcher and its signal loop.
pub type SharedBroker = Arc<Mutex<IntentBroker>>;

#[derive(Debug)]
struct Pending {
    request: IntentRequest,
    timer: Option<AbortHandle>,
    starting: bool,
    reply_to: Option<oneshot::Sender<IntentOutcome>>,
}

impl Pending {
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Routes intent requests to handler applications.
pub struct IntentBroker {
    catalog: IntentCatalog,
    index: Arc<ConnectionIndex>,
    directory: Arc<dyn ApplicationDirectory>,
    starter: Arc<dyn ApplicationStarter>,
    bus: EventBus,
    settings: IntentSettings,
    signals: BrokerSignalSender,
    pending: HashMap<Uuid, Pending>,
    history: VecDeque<IntentRequest>,
    disambiguation_handler: bool,
}

impl std::fmt::Debug for IntentBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentBroker")
            .field("intents", &self.catalog.len())
            .field("pending", &self.pending.len())
            .field("disambiguation_handler", &self.disambiguation_handler)
            .finish_non_exhaustive()
    }
}

impl IntentBroker {
    /// Create a broker and the receiver its signals arrive on.
    #[must_use]
    pub fn new(
        catalog: IntentCatalog,
        index: Arc<ConnectionIndex>,
        directory: Arc<dyn ApplicationDirectory>,
        starter: Arc<dyn ApplicationStarter>,
        bus: EventBus,
        settings: IntentSettings,
    ) -> (Self, BrokerSignalReceiver) {
        let (signals, rx) = mpsc::unbounded_channel();
        let broker = Self {
            catalog,
            index,
            directory,
            starter,
            bus,
            settings,
            signals,
            pending: HashMap::new(),
            history: VecDeque::new(),
            disambiguation_handler: false,
        };
        (broker, rx)
    }

    /// Wrap for sharing.
    #[must_use]
    pub fn into_shared(self) -> SharedBroker {
        Arc::new(Mutex::new(self))
    }

    /// Registered intents.
    #[must_use]
    pub fn catalog(&self) -> &IntentCatalog {
        &self.catalog
    }

    /// Registered intents, for package (de)registration.
    pub fn catalog_mut(&mut self) -> &mut IntentCatalog {
        &mut self.catalog
    }

    /// Resolved timeouts.
    #[must_use]
    pub fn settings(&self) -> &IntentSettings {
        &self.settings
    }

    /// Whether the system UI answers disambiguation requests. Without it
    /// the first candidate is used.
    pub fn set_disambiguation_handler(&mut self, attached: bool) {
        self.disambiguation_handler = attached;
    }

    /// Request or finished request by id.
    #[must_use]
    pub fn request(&self, id: Uuid) -> Option<&IntentRequest> {
        self.pending
            .get(&id)
            .map(|p| &p.request)
            .or_else(|| self.history.iter().rev().find(|r| r.id() == id))
    }

    /// Number of unfinished requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ---------------------------------------------------------------------
    // Intake
    // ---------------------------------------------------------------------

    /// Accept a request from a client connection.
    ///
    /// `application_id` names the handler, is empty for any handler, or is
    /// `:broadcast:` for a broadcast. The requester is told the assigned id
    /// with `requestAccepted`; the final reply follows on a later turn.
    ///
    /// # Errors
    ///
    /// Returns [`IntentError::UnknownRequester`] if the connection is not
    /// registered or not bound to an application.
    pub fn request_to_system(
        &mut self,
        requester: &Arc<IpcConnection>,
        client_token: &str,
        intent_id: &str,
        application_id: &str,
        parameters: ParameterMap,
    ) -> IntentResult<Uuid> {
        let Some(requesting) = requester.application_id().cloned() else {
            warn!(connection_id = %requester.id(), intent_id, "Intent request from unbound connection");
            return Err(IntentError::UnknownRequester);
        };
        if self.index.get(requester.id()).is_none() {
            warn!(app_id = %requesting, intent_id, "Intent request from unknown connection");
            return Err(IntentError::UnknownRequester);
        }

        let (target, broadcast) = parse_target(application_id)?;
        let request = IntentRequest::new(
            Direction::ToSystem,
            requesting,
            intent_id,
            target,
            parameters,
            broadcast,
            Some(requester.id()),
        );
        let id = request.id();
        if let Err(e) = requester.send(ConnectionMessage::RequestAccepted {
            client_token: client_token.to_owned(),
            request_id: id,
        }) {
            warn!(request_id = %id, error = %e, "Could not confirm intent request");
        }
        self.intake(request, None);
        Ok(id)
    }

    /// Issue a request on behalf of the manager. The outcome arrives on the
    /// returned receiver.
    pub fn request_from_system(
        &mut self,
        intent_id: &str,
        application_id: Option<ApplicationId>,
        parameters: ParameterMap,
    ) -> (Uuid, oneshot::Receiver<IntentOutcome>) {
        let (tx, rx) = oneshot::channel();
        let request = IntentRequest::new(
            Direction::ToApplication,
            ApplicationId::system_ui(),
            intent_id,
            application_id,
            parameters,
            false,
            None,
        );
        let id = request.id();
        self.intake(request, Some(tx));
        (id, rx)
    }

    fn intake(&mut self, mut request: IntentRequest, reply_to: Option<oneshot::Sender<IntentOutcome>>) {
        let id = request.id();
        let _span = request.context().span().entered();
        info!(
            app_id = %request.requesting_application_id(),
            handler = ?request.target_application_id(),
            "Intent request received"
        );

        let candidates = self.candidates_for(&request);
        request.set_candidates(candidates.clone());

        if candidates.is_empty() {
            warn!("No matching intent handler");
            request.fail(IntentError::NoMatchingHandler);
        } else if request.is_broadcast() {
            request.set_state(RequestState::Dispatching);
        } else if candidates.len() == 1 || !self.disambiguation_handler {
            self.choose(&mut request, &candidates[0]);
        } else {
            request.set_state(RequestState::Disambiguating);
            self.bus.publish(AppManEvent::DisambiguationRequested {
                metadata: EventMetadata::new(EVENT_SOURCE).with_correlation_id(id),
                request_id: id,
                intent_id: request.intent_id().to_owned(),
                candidates: candidates
                    .iter()
                    .map(|i| i.handling_application_id.clone())
                    .collect(),
            });
        }

        let timer = (request.state() == RequestState::Disambiguating).then(|| {
            self.arm(
                self.settings.disambiguation_timeout,
                BrokerSignal::DisambiguationExpired(id),
            )
        });
        let advance = request.state() != RequestState::Disambiguating;
        self.pending.insert(
            id,
            Pending {
                request,
                timer,
                starting: false,
                reply_to,
            },
        );
        if advance {
            self.enqueue(id);
        }
    }

    fn candidates_for(&self, request: &IntentRequest) -> Vec<Intent> {
        let requesting = request.requesting_application_id();
        let found = match request.target_application_id() {
            Some(app) if !request.is_broadcast() => self
                .catalog
                .find(request.intent_id(), app, request.parameters())
                .into_iter()
                .collect(),
            _ => self
                .catalog
                .lookup(request.intent_id(), request.parameters()),
        };
        found
            .into_iter()
            .filter(|intent| {
                if !intent.visible_to(requesting) {
                    debug!(app_id = %intent.handling_application_id, "Skipping private intent");
                    return false;
                }
                if intent.handle_only_when_running
                    && self
                        .index
                        .for_application(&intent.handling_application_id)
                        .is_none()
                {
                    debug!(app_id = %intent.handling_application_id, "Skipping intent of stopped handler");
                    return false;
                }
                true
            })
            .collect()
    }

    fn may_handle(&self, requesting: &ApplicationId, intent: &Intent) -> bool {
        if intent.required_capabilities.is_empty()
            || requesting.is_system_ui()
            || intent.handling_application_id.is_system_ui()
        {
            return true;
        }
        let held: BTreeSet<String> = self.directory.capabilities(&intent.handling_application_id);
        intent.required_capabilities.is_subset(&held)
    }

    fn choose(&self, request: &mut IntentRequest, intent: &Intent) {
        if !self.may_handle(request.requesting_application_id(), intent) {
            warn!(
                app_id = %intent.handling_application_id,
                required = ?intent.required_capabilities,
                "Handler lacks required capabilities"
            );
            request.fail(IntentError::InsufficientCapability);
            return;
        }
        request.set_target(intent.handling_application_id.clone());
        request.set_state(RequestState::Dispatching);
    }

    // ---------------------------------------------------------------------
    // Disambiguation
    // ---------------------------------------------------------------------

    /// The system UI picked `selected` for a request.
    ///
    /// # Errors
    ///
    /// Returns [`IntentError::NotDisambiguating`] if the request is not
    /// waiting for a choice.
    pub fn acknowledge_disambiguation(&mut self, request_id: Uuid, selected: &Intent) -> IntentResult<()> {
        let mut pending = self.take_disambiguating(request_id)?;
        if pending.request.candidates().contains(selected) {
            self.choose(&mut pending.request, selected);
        } else {
            warn!(request_id = %request_id, app_id = %selected.handling_application_id, "Disambiguated to an intent that was not offered");
            pending.request.fail(IntentError::DisambiguationFailed);
        }
        self.pending.insert(request_id, pending);
        self.enqueue(request_id);
        Ok(())
    }

    /// The system UI declined to pick a handler.
    ///
    /// # Errors
    ///
    /// Returns [`IntentError::NotDisambiguating`] if the request is not
    /// waiting for a choice.
    pub fn reject_disambiguation(&mut self, request_id: Uuid) -> IntentResult<()> {
        let mut pending = self.take_disambiguating(request_id)?;
        pending.request.fail(IntentError::DisambiguationRejected);
        self.pending.insert(request_id, pending);
        self.enqueue(request_id);
        Ok(())
    }

    fn take_disambiguating(&mut self, request_id: Uuid) -> IntentResult<Pending> {
        match self.pending.get(&request_id) {
            Some(p) if p.request.state() == RequestState::Disambiguating => {},
            _ => {
                warn!(request_id = %request_id, "Unexpected disambiguation answer");
                return Err(IntentError::NotDisambiguating(request_id));
            },
        }
        let mut pending = self
            .pending
            .remove(&request_id)
            .ok_or(IntentError::UnknownRequest(request_id))?;
        pending.disarm();
        Ok(pending)
    }

    // ---------------------------------------------------------------------
    // Replies
    // ---------------------------------------------------------------------

    /// A handler answered a request.
    ///
    /// # Errors
    ///
    /// Returns [`IntentError::MalformedRequestId`] for undecodable ids and
    /// [`IntentError::UnknownRequest`] if no reply is expected for the id,
    /// including replies arriving after a timeout.
    pub fn reply_from_application(
        &mut self,
        replier: &IpcConnection,
        wire_request_id: &str,
        error: bool,
        result: ParameterMap,
    ) -> IntentResult<()> {
        let (request_id, broadcast) = decode_request_id(wire_request_id)
            .map_err(|_| IntentError::MalformedRequestId(wire_request_id.to_owned()))?;
        if broadcast {
            debug!(request_id = %request_id, "Ignoring reply to a broadcast");
            return Ok(());
        }

        let Some(pending) = self
            .pending
            .get_mut(&request_id)
            .filter(|p| p.request.state() == RequestState::AwaitingReply)
        else {
            warn!(request_id = %request_id, app_id = ?replier.application_id(), "Got a reply but none was expected");
            return Err(IntentError::UnknownRequest(request_id));
        };
        pending.disarm();

        let request = &mut pending.request;
        if replier.application_id() != request.target_application_id() {
            warn!(
                request_id = %request_id,
                app_id = ?replier.application_id(),
                expected = ?request.target_application_id(),
                "Reply from the wrong application"
            );
            request.fail(IntentError::WrongApplication);
        } else if error {
            let message = result
                .get(ERROR_MESSAGE_KEY)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            debug!(request_id = %request_id, error = %message, "Handler reported an error");
            request.fail(IntentError::HandlerFailed(message));
        } else {
            debug!(request_id = %request_id, "Handler replied");
            request.succeed(result);
        }
        self.enqueue(request_id);
        Ok(())
    }

    /// A connection went away. Requests it was handling fail and report
    /// back; requests it issued are cancelled.
    pub fn connection_lost(&mut self, connection_id: ConnectionId) {
        let mut affected = Vec::new();
        for (id, pending) in &mut self.pending {
            if pending.request.is_finished() {
                continue;
            }
            let owned = pending.request.requester() == Some(connection_id);
            let handled = pending.request.handler_connection() == Some(connection_id);
            if !owned && !handled {
                continue;
            }
            pending.disarm();
            if owned {
                pending.request.detach_requester();
            }
            pending.request.fail(IntentError::ConnectionLost);
            affected.push(*id);
        }
        if !affected.is_empty() {
            info!(connection_id = %connection_id, requests = affected.len(), "Failing requests of a lost connection");
        }
        for id in affected {
            self.enqueue(id);
        }
    }

    // ---------------------------------------------------------------------
    // Signal processing
    // ---------------------------------------------------------------------

    /// Apply one signal.
    pub fn handle_signal(&mut self, signal: BrokerSignal) {
        match signal {
            BrokerSignal::Process(id) => self.process(id),
            BrokerSignal::HandlerReady(id) => self.handler_ready(id),
            BrokerSignal::DisambiguationExpired(id) => {
                self.fail_if(id, RequestState::Disambiguating, IntentError::DisambiguationTimeout);
            },
            BrokerSignal::HandlerUnavailable { request_id, error } => {
                self.fail_if(request_id, RequestState::Dispatching, error);
            },
            BrokerSignal::ReplyExpired(id) => {
                self.fail_if(id, RequestState::AwaitingReply, IntentError::ReplyTimeout);
            },
        }
    }

    /// Apply every queued signal, including ones queued while doing so.
    /// Returns how many were applied.
    pub fn process_pending(&mut self, rx: &mut BrokerSignalReceiver) -> usize {
        let mut count: usize = 0;
        while let Ok(signal) = rx.try_recv() {
            self.handle_signal(signal);
            count = count.saturating_add(1);
        }
        count
    }

    fn fail_if(&mut self, id: Uuid, expected: RequestState, error: IntentError) {
        let Some(pending) = self.pending.get_mut(&id) else {
            return;
        };
        if pending.request.state() != expected {
            return;
        }
        warn!(request_id = %id, error = %error, "Intent request failed");
        pending.disarm();
        pending.request.fail(error);
        self.process(id);
    }

    fn process(&mut self, id: Uuid) {
        let Some(state) = self.pending.get(&id).map(|p| p.request.state()) else {
            return;
        };
        match state {
            RequestState::Dispatching => self.dispatch(id),
            s if s.is_final() => self.finish(id),
            _ => {},
        }
    }

    /// The start task saw the handler connect. The connection may be gone
    /// again by now; no timer guards a started request, so fail it here.
    fn handler_ready(&mut self, id: Uuid) {
        let Some(pending) = self.pending.get(&id) else {
            return;
        };
        if pending.request.state() != RequestState::Dispatching {
            return;
        }
        let connection = pending
            .request
            .target_application_id()
            .and_then(|target| self.index.ready_for_application(target));
        match connection {
            Some(connection) => self.deliver(id, &connection),
            None => {
                debug!(request_id = %id, "Handler disconnected before dispatch");
                self.fail_if(id, RequestState::Dispatching, IntentError::ConnectionLost);
            },
        }
    }

    fn dispatch(&mut self, id: Uuid) {
        let Some(pending) = self.pending.get(&id) else {
            return;
        };
        if pending.request.is_broadcast() {
            self.deliver_broadcast(id);
            return;
        }
        let Some(target) = pending.request.target_application_id().cloned() else {
            return;
        };

        let starting = pending.starting;
        match self.index.ready_for_application(&target) {
            Some(connection) => self.deliver(id, &connection),
            None if starting => {},
            None => self.start_handler(id, target),
        }
    }

    fn deliver(&mut self, id: Uuid, connection: &Arc<IpcConnection>) {
        let reply_timeout = self.settings.reply_from_application_timeout;
        let Some(pending) = self.pending.get_mut(&id) else {
            return;
        };
        let request = &pending.request;
        let _span = request.context().span().entered();
        let Some(target) = request.target_application_id().cloned() else {
            return;
        };
        let message = ConnectionMessage::RequestToApplication {
            request_id: id,
            broadcast: false,
            intent_id: request.intent_id().to_owned(),
            requesting_application_id: request.requesting_application_id().clone(),
            application_id: target.clone(),
            parameters: request.parameters().clone(),
        };

        if let Err(e) = connection.send(message) {
            warn!(app_id = %target, error = %e, "Could not deliver intent request");
            pending.request.fail(IntentError::NoChannel);
            self.finish(id);
            return;
        }
        debug!(app_id = %target, connection_id = %connection.id(), "Intent request delivered");
        pending.request.set_handler_connection(connection.id());
        pending.request.set_state(RequestState::AwaitingReply);
        let timer = self.arm(reply_timeout, BrokerSignal::ReplyExpired(id));
        if let Some(pending) = self.pending.get_mut(&id) {
            pending.timer = Some(timer);
        }
    }

    fn deliver_broadcast(&mut self, id: Uuid) {
        let Some(pending) = self.pending.get(&id) else {
            return;
        };
        let request = &pending.request;
        let _span = request.context().span().entered();
        let sender = request.requesting_application_id();

        let mut reached: Vec<ApplicationId> = Vec::new();
        for intent in request.candidates() {
            let handler = &intent.handling_application_id;
            if handler == sender || reached.contains(handler) {
                continue;
            }
            if !self.may_handle(sender, intent) {
                debug!(app_id = %handler, "Broadcast skipped: missing capabilities");
                continue;
            }
            let Some(connection) = self.index.ready_for_application(handler) else {
                debug!(app_id = %handler, "Broadcast skipped: handler not connected");
                continue;
            };
            let message = ConnectionMessage::RequestToApplication {
                request_id: id,
                broadcast: true,
                intent_id: request.intent_id().to_owned(),
                requesting_application_id: ApplicationId::broadcast(),
                application_id: handler.clone(),
                parameters: request.parameters().clone(),
            };
            match connection.send(message) {
                Ok(()) => reached.push(handler.clone()),
                Err(e) => warn!(app_id = %handler, error = %e, "Broadcast delivery failed"),
            }
        }
        info!(receivers = reached.len(), "Broadcast delivered");

        if let Some(pending) = self.pending.get_mut(&id) {
            pending.request.succeed(ParameterMap::new());
        }
        self.finish(id);
    }

    fn start_handler(&mut self, id: Uuid, target: ApplicationId) {
        let Some(pending) = self.pending.get_mut(&id) else {
            return;
        };
        pending.starting = true;
        info!(request_id = %id, app_id = %target, "Starting intent handler");

        let starter = Arc::clone(&self.starter);
        let index = Arc::clone(&self.index);
        let signals = self.signals.clone();
        let timeout = self.settings.start_application_timeout;
        tokio::spawn(async move {
            let started = tokio::time::timeout(timeout, async {
                starter.start_application(&target).await?;
                Ok::<_, String>(index.wait_ready(&target, timeout).await)
            })
            .await;
            let signal = match started {
                Ok(Ok(Some(_))) => BrokerSignal::HandlerReady(id),
                Ok(Err(reason)) => BrokerSignal::HandlerUnavailable {
                    request_id: id,
                    error: IntentError::StartFailed {
                        application_id: target,
                        reason,
                    },
                },
                Ok(Ok(None)) | Err(_) => BrokerSignal::HandlerUnavailable {
                    request_id: id,
                    error: IntentError::StartTimeout(target),
                },
            };
            let _ = signals.send(signal);
        });
    }

    fn finish(&mut self, id: Uuid) {
        let Some(mut pending) = self.pending.remove(&id) else {
            return;
        };
        pending.disarm();
        let request = pending.request;
        let _span = request.context().span().entered();
        let outcome = request.outcome();

        match request.direction() {
            Direction::ToSystem => {
                let connection = request.requester().and_then(|c| self.index.get(c));
                match connection {
                    Some(connection) => {
                        let reply = ConnectionMessage::ReplyFromSystem {
                            request_id: id,
                            error: !outcome.succeeded,
                            result: outcome.result.clone(),
                        };
                        if let Err(e) = connection.send(reply) {
                            warn!(error = %e, "Could not forward intent reply");
                        }
                    },
                    None => debug!("Requester is gone; dropping intent reply"),
                }
            },
            Direction::ToApplication => {
                if let Some(tx) = pending.reply_to {
                    let _ = tx.send(outcome.clone());
                }
            },
        }

        info!(
            state = %request.state(),
            succeeded = outcome.succeeded,
            elapsed_ms = request.context().elapsed_ms(),
            "Intent request finished"
        );
        self.bus.publish(AppManEvent::IntentRequestFinished {
            metadata: EventMetadata::new(EVENT_SOURCE).with_correlation_id(id),
            request_id: id,
            intent_id: request.intent_id().to_owned(),
            requesting_application_id: request.requesting_application_id().clone(),
            handling_application_id: request.target_application_id().cloned(),
            succeeded: outcome.succeeded,
            error: outcome.error.as_ref().map(ToString::to_string),
        });

        self.history.push_back(request);
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
    }

    fn enqueue(&self, id: Uuid) {
        let _ = self.signals.send(BrokerSignal::Process(id));
    }

    fn arm(&self, after: Duration, signal: BrokerSignal) -> AbortHandle {
        let signals = self.signals.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = signals.send(signal);
        })
        .abort_handle()
    }
}

fn parse_target(application_id: &str) -> IntentResult<(Option<ApplicationId>, bool)> {
    match application_id {
        "" => Ok((None, false)),
        appman_core::BROADCAST_REQUESTER => Ok((None, true)),
        appman_core::SYSTEM_UI => Ok((Some(ApplicationId::system_ui()), false)),
        other => ApplicationId::new(other)
            .map(|id| (Some(id), false))
            .map_err(|e| IntentError::InvalidIntent(e.to_string())),
    }
}

/// Apply broker signals until the queue closes.
pub async fn run(broker: SharedBroker, mut rx: BrokerSignalReceiver) {
    while let Some(signal) = rx.recv().await {
        broker.lock().await.handle_signal(signal);
    }
    debug!("Broker signal queue closed");
}
