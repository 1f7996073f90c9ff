//! Intent requests and their lifecycle.

use std::fmt;

use appman_core::{ApplicationId, ParameterMap, Value};
use appman_ipc::ConnectionId;
use appman_telemetry::RequestContext;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IntentError;
use crate::intent::Intent;

/// Result key carrying the error text of a failed request.
pub const ERROR_MESSAGE_KEY: &str = "errorMessage";

/// Where a request originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Issued by an application over its connection.
    ToSystem,
    /// Issued by the manager itself, towards an application.
    ToApplication,
}

/// Lifecycle of a request.
///
/// `Created -> (Disambiguating) -> Dispatching -> AwaitingReply ->
/// Replied | TimedOut | Failed`. Any non-final state may fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Accepted, not yet routed.
    Created,
    /// Waiting for the system UI to pick a handler.
    Disambiguating,
    /// Handler chosen; being started or about to receive the request.
    Dispatching,
    /// Delivered; waiting for the handler.
    AwaitingReply,
    /// The handler answered.
    Replied,
    /// The handler did not answer in time.
    TimedOut,
    /// Routing or handling failed.
    Failed,
}

impl RequestState {
    /// Whether the request is finished.
    #[must_use]
    pub fn is_final(self) -> bool {
        matches!(self, Self::Replied | Self::TimedOut | Self::Failed)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Disambiguating => "disambiguating",
            Self::Dispatching => "dispatching",
            Self::AwaitingReply => "awaiting_reply",
            Self::Replied => "replied",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Final answer delivered to the manager for requests it issued.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentOutcome {
    /// Request id.
    pub request_id: Uuid,
    /// Whether the handler succeeded.
    pub succeeded: bool,
    /// Result, or `{"errorMessage": ...}` on failure.
    pub result: ParameterMap,
    /// Failure, if any.
    pub error: Option<IntentError>,
}

/// One intent request.
#[derive(Debug, Clone)]
pub struct IntentRequest {
    id: Uuid,
    direction: Direction,
    requesting_application_id: ApplicationId,
    intent_id: String,
    target_application_id: Option<ApplicationId>,
    parameters: ParameterMap,
    broadcast: bool,
    candidates: Vec<Intent>,
    state: RequestState,
    result: Option<ParameterMap>,
    succeeded: bool,
    error: Option<IntentError>,
    requester: Option<ConnectionId>,
    handler_connection: Option<ConnectionId>,
    context: RequestContext,
}

impl IntentRequest {
    pub(crate) fn new(
        direction: Direction,
        requesting_application_id: ApplicationId,
        intent_id: &str,
        target_application_id: Option<ApplicationId>,
        parameters: ParameterMap,
        broadcast: bool,
        requester: Option<ConnectionId>,
    ) -> Self {
        let mut context = RequestContext::new(intent_id, requesting_application_id.as_str());
        if broadcast {
            context = context.broadcast();
        }
        Self {
            id: context.request_id,
            direction,
            requesting_application_id,
            intent_id: intent_id.to_owned(),
            target_application_id,
            parameters,
            broadcast,
            candidates: Vec::new(),
            state: RequestState::Created,
            result: None,
            succeeded: false,
            error: None,
            requester,
            handler_connection: None,
            context,
        }
    }

    /// Request id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Origin.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Requesting application.
    #[must_use]
    pub fn requesting_application_id(&self) -> &ApplicationId {
        &self.requesting_application_id
    }

    /// Intent id.
    #[must_use]
    pub fn intent_id(&self) -> &str {
        &self.intent_id
    }

    /// Handling application, once chosen.
    #[must_use]
    pub fn target_application_id(&self) -> Option<&ApplicationId> {
        self.target_application_id.as_ref()
    }

    /// Request parameters.
    #[must_use]
    pub fn parameters(&self) -> &ParameterMap {
        &self.parameters
    }

    /// Whether this is a broadcast.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    /// Matching intents found at intake.
    #[must_use]
    pub fn candidates(&self) -> &[Intent] {
        &self.candidates
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Whether the request is finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.is_final()
    }

    /// Whether the handler succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    /// Final result.
    #[must_use]
    pub fn result(&self) -> Option<&ParameterMap> {
        self.result.as_ref()
    }

    /// Failure, if any.
    #[must_use]
    pub fn error(&self) -> Option<&IntentError> {
        self.error.as_ref()
    }

    /// Connection the request came from.
    #[must_use]
    pub fn requester(&self) -> Option<ConnectionId> {
        self.requester
    }

    /// Connection the request was delivered on.
    #[must_use]
    pub fn handler_connection(&self) -> Option<ConnectionId> {
        self.handler_connection
    }

    /// Correlation context.
    #[must_use]
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub(crate) fn set_candidates(&mut self, candidates: Vec<Intent>) {
        self.candidates = candidates;
    }

    pub(crate) fn set_target(&mut self, application_id: ApplicationId) {
        self.context.set_handler(application_id.as_str());
        self.target_application_id = Some(application_id);
    }

    pub(crate) fn set_handler_connection(&mut self, id: ConnectionId) {
        self.handler_connection = Some(id);
    }

    pub(crate) fn detach_requester(&mut self) {
        self.requester = None;
    }

    /// Move to a non-final state. Ignored once finished.
    pub(crate) fn set_state(&mut self, state: RequestState) {
        if !self.is_finished() && !state.is_final() {
            self.state = state;
        }
    }

    /// Record a successful reply. Returns `false` if already finished.
    pub(crate) fn succeed(&mut self, result: ParameterMap) -> bool {
        if self.is_finished() {
            return false;
        }
        self.succeeded = true;
        self.result = Some(result);
        self.state = RequestState::Replied;
        true
    }

    /// Record a failure. Returns `false` if already finished.
    pub(crate) fn fail(&mut self, error: IntentError) -> bool {
        if self.is_finished() {
            return false;
        }
        self.succeeded = false;
        self.result = Some(ParameterMap::from([(
            ERROR_MESSAGE_KEY.to_owned(),
            Value::String(error.to_string()),
        )]));
        self.state = if error == IntentError::ReplyTimeout {
            RequestState::TimedOut
        } else {
            RequestState::Failed
        };
        self.error = Some(error);
        true
    }

    pub(crate) fn outcome(&self) -> IntentOutcome {
        IntentOutcome {
            request_id: self.id,
            succeeded: self.succeeded,
            result: self.result.clone().unwrap_or_default(),
            error: self.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn request() -> IntentRequest {
        IntentRequest::new(
            Direction::ToSystem,
            ApplicationId::new("com.example.a").unwrap(),
            "share",
            None,
            ParameterMap::new(),
            false,
            None,
        )
    }

    #[test]
    fn test_finishes_once() {
        let mut r = request();
        assert!(r.succeed(ParameterMap::from([("ok".to_owned(), true.into())])));
        assert!(!r.fail(IntentError::ReplyTimeout));
        assert!(!r.succeed(ParameterMap::new()));
        assert_eq!(r.state(), RequestState::Replied);
        assert!(r.succeeded());
        assert_eq!(r.result().unwrap()["ok"], Value::Bool(true));

        r.set_state(RequestState::Dispatching);
        assert_eq!(r.state(), RequestState::Replied);
    }

    #[test]
    fn test_timeout_state() {
        let mut r = request();
        r.set_state(RequestState::AwaitingReply);
        assert!(r.fail(IntentError::ReplyTimeout));
        assert_eq!(r.state(), RequestState::TimedOut);
        assert_eq!(
            r.result().unwrap()[ERROR_MESSAGE_KEY],
            Value::from("handler did not respond")
        );
    }

    #[test]
    fn test_ids_never_collide() {
        let ids: HashSet<Uuid> = (0..10_000).map(|_| request().id()).collect();
        assert_eq!(ids.len(), 10_000);
    }
}
