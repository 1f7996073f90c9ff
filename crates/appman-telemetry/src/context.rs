//! Correlation context for intent requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Context carried through every stage of one intent request.
///
/// The request id doubles as the correlation id in event metadata, so a
/// request's log lines and bus events can be joined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Unique request identifier.
    pub request_id: Uuid,
    /// Intent being requested.
    pub intent_id: String,
    /// Application that issued the request.
    pub requesting_application_id: String,
    /// Application chosen to handle it, once known.
    pub handling_application_id: Option<String>,
    /// Whether this is a broadcast.
    pub broadcast: bool,
    /// When the request was created.
    pub started_at: DateTime<Utc>,
}

impl RequestContext {
    /// Create a context with a fresh request id.
    #[must_use]
    pub fn new(intent_id: impl Into<String>, requesting: impl Into<String>) -> Self {
        Self::with_request_id(Uuid::new_v4(), intent_id, requesting)
    }

    /// Create a context for an existing request id.
    #[must_use]
    pub fn with_request_id(
        request_id: Uuid,
        intent_id: impl Into<String>,
        requesting: impl Into<String>,
    ) -> Self {
        Self {
            request_id,
            intent_id: intent_id.into(),
            requesting_application_id: requesting.into(),
            handling_application_id: None,
            broadcast: false,
            started_at: Utc::now(),
        }
    }

    /// Mark as broadcast.
    #[must_use]
    pub fn broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    /// Record the chosen handler.
    pub fn set_handler(&mut self, application_id: impl Into<String>) {
        self.handling_application_id = Some(application_id.into());
    }

    /// Milliseconds since the request was created.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }

    /// Tracing span for this request.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "intent_request",
            request_id = %self.request_id,
            intent_id = %self.intent_id,
            requesting = %self.requesting_application_id,
            broadcast = self.broadcast,
        )
    }

    /// First eight characters of the request id.
    #[must_use]
    pub fn short_id(&self) -> String {
        self.request_id.simple().to_string().chars().take(8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_fields() {
        let mut ctx = RequestContext::new("share", "com.example.gallery").broadcast();
        assert!(ctx.broadcast);
        assert!(ctx.handling_application_id.is_none());
        ctx.set_handler("com.example.viewer");
        assert_eq!(
            ctx.handling_application_id.as_deref(),
            Some("com.example.viewer")
        );
        assert_eq!(ctx.short_id().len(), 8);
        assert!(ctx.elapsed_ms() >= 0);
    }

    #[test]
    fn test_existing_request_id() {
        let id = Uuid::new_v4();
        let ctx = RequestContext::with_request_id(id, "open", ":sysui:");
        assert_eq!(ctx.request_id, id);
    }
}
