//! Error types for the intent catalog and broker.
//!
//! The display text of a variant is what a requesting client sees in the
//! `errorMessage` field of a failed reply.

use appman_core::ApplicationId;
use thiserror::Error;
use uuid::Uuid;

/// Text shared by every "no handler" outcome.
pub const NO_MATCHING_HANDLER: &str = "No matching intent handler registered.";

/// Errors raised by the intent catalog and broker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntentError {
    /// An identical intent is already registered for the package.
    #[error("intent '{intent_id}' is already registered by package '{package_id}'")]
    DuplicateIntent {
        /// Intent id.
        intent_id: String,
        /// Owning package.
        package_id: String,
    },

    /// An intent definition cannot be registered.
    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    /// No registered intent matches the request.
    #[error("{}", NO_MATCHING_HANDLER)]
    NoMatchingHandler,

    /// The chosen handler lacks a required capability. Reported to the
    /// client exactly like [`IntentError::NoMatchingHandler`].
    #[error("{}", NO_MATCHING_HANDLER)]
    InsufficientCapability,

    /// The requesting connection is not bound to a known application.
    #[error("Intent requested by an unknown application")]
    UnknownRequester,

    /// The handler application could not be started.
    #[error("Failed to start handler application {application_id}: {reason}")]
    StartFailed {
        /// Handler application.
        application_id: ApplicationId,
        /// Reason reported by the runtime layer.
        reason: String,
    },

    /// The handler application did not become ready in time.
    #[error("Handler application {0} did not become ready in time")]
    StartTimeout(ApplicationId),

    /// The handler connection disappeared between start and dispatch.
    #[error("No IPC channel to reach target application.")]
    NoChannel,

    /// The handler did not reply in time.
    #[error("handler did not respond")]
    ReplyTimeout,

    /// The system UI did not pick a handler in time.
    #[error("Disambiguation timed out")]
    DisambiguationTimeout,

    /// The system UI rejected the request.
    #[error("Disambiguation was rejected")]
    DisambiguationRejected,

    /// The system UI picked something that was not offered.
    #[error("Failed to disambiguate")]
    DisambiguationFailed,

    /// The reply came from an application other than the chosen handler.
    #[error("Request reply received from wrong application")]
    WrongApplication,

    /// The handler answered with an error.
    #[error("{0}")]
    HandlerFailed(String),

    /// A connection involved in the request went away.
    #[error("Connection to the application was lost")]
    ConnectionLost,

    /// No pending request has this id.
    #[error("no pending intent request {0}")]
    UnknownRequest(Uuid),

    /// The request is not waiting for disambiguation.
    #[error("intent request {0} is not waiting for disambiguation")]
    NotDisambiguating(Uuid),

    /// A request id on the wire could not be decoded.
    #[error("malformed request id '{0}'")]
    MalformedRequestId(String),

    /// The manager reported a failed request to a client.
    #[error("{0}")]
    RequestFailed(String),

    /// A client gave up waiting for the manager's reply.
    #[error("No reply received from Intent server after {0} ms")]
    SystemReplyTimeout(u128),

    /// The client's connection to the manager is gone.
    #[error("IPC error: {0}")]
    Ipc(String),
}

impl From<appman_ipc::IpcError> for IntentError {
    fn from(err: appman_ipc::IpcError) -> Self {
        Self::Ipc(err.to_string())
    }
}

/// Result type for intent operations.
pub type IntentResult<T> = Result<T, IntentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_failure_does_not_leak() {
        assert_eq!(
            IntentError::InsufficientCapability.to_string(),
            IntentError::NoMatchingHandler.to_string()
        );
    }
}
