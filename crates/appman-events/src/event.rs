//! Event types for the application manager event bus.

use appman_core::{ApplicationId, ExitKind, RuntimeId, RuntimeState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata attached to every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Correlation ID, set to the intent request id where one applies.
    pub correlation_id: Option<Uuid>,
    /// Source component that generated the event.
    pub source: String,
}

impl EventMetadata {
    /// Create new event metadata.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            correlation_id: None,
            source: source.into(),
        }
    }

    /// Set correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new("unknown")
    }
}

/// All events published by the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppManEvent {
    // ========== Runtime Lifecycle ==========
    /// A runtime changed state.
    RuntimeStateChanged {
        /// Event metadata.
        metadata: EventMetadata,
        /// Runtime handle.
        runtime_id: RuntimeId,
        /// Bound application, if any.
        application_id: Option<ApplicationId>,
        /// New state.
        state: RuntimeState,
    },

    /// A runtime's process terminated. Its lifecycle has ended.
    RuntimeFinished {
        /// Event metadata.
        metadata: EventMetadata,
        /// Runtime handle.
        runtime_id: RuntimeId,
        /// Bound application, if any.
        application_id: Option<ApplicationId>,
        /// Exit code or signal number.
        exit_code: i32,
        /// Classification of the exit.
        exit_kind: ExitKind,
        /// Whether the runtime was an idle quick launcher.
        idle_quick_launcher: bool,
    },

    /// The application interface of a runtime became available. The window
    /// layer uses this to accept surfaces from the process.
    ApplicationInterfaceReady {
        /// Event metadata.
        metadata: EventMetadata,
        /// Runtime handle.
        runtime_id: RuntimeId,
        /// Bound application, if any.
        application_id: Option<ApplicationId>,
    },

    // ========== Quick Launcher ==========
    /// An idle quick launcher was started.
    QuickLauncherReplenished {
        /// Event metadata.
        metadata: EventMetadata,
        /// Runtime handle of the new instance.
        runtime_id: RuntimeId,
        /// Container backend id.
        container_id: String,
        /// Runtime backend id, if the slot is runtime specific.
        runtime_name: Option<String>,
    },

    /// An idle quick launcher was handed to an application.
    QuickLauncherAttached {
        /// Event metadata.
        metadata: EventMetadata,
        /// Runtime handle.
        runtime_id: RuntimeId,
        /// Application now bound.
        application_id: ApplicationId,
    },

    // ========== Intents ==========
    /// Several handlers match and the system UI must choose.
    DisambiguationRequested {
        /// Event metadata.
        metadata: EventMetadata,
        /// Request id.
        request_id: Uuid,
        /// Intent id.
        intent_id: String,
        /// Candidate handler applications in match order.
        candidates: Vec<ApplicationId>,
    },

    /// An intent request reached a final state.
    IntentRequestFinished {
        /// Event metadata.
        metadata: EventMetadata,
        /// Request id.
        request_id: Uuid,
        /// Intent id.
        intent_id: String,
        /// Requesting application.
        requesting_application_id: ApplicationId,
        /// Chosen handler, if one was reached.
        handling_application_id: Option<ApplicationId>,
        /// Whether the request succeeded.
        succeeded: bool,
        /// Error message for failed requests.
        error: Option<String>,
    },

    // ========== IPC ==========
    /// An IPC connection became ready.
    ConnectionReady {
        /// Event metadata.
        metadata: EventMetadata,
        /// Connection id.
        connection_id: u64,
        /// Application behind the connection.
        application_id: ApplicationId,
    },

    /// An IPC connection went away.
    ConnectionLost {
        /// Event metadata.
        metadata: EventMetadata,
        /// Connection id.
        connection_id: u64,
        /// Application behind the connection, if it was resolved.
        application_id: Option<ApplicationId>,
    },
}

impl AppManEvent {
    /// Event metadata.
    #[must_use]
    pub fn metadata(&self) -> &EventMetadata {
        match self {
            Self::RuntimeStateChanged { metadata, .. }
            | Self::RuntimeFinished { metadata, .. }
            | Self::ApplicationInterfaceReady { metadata, .. }
            | Self::QuickLauncherReplenished { metadata, .. }
            | Self::QuickLauncherAttached { metadata, .. }
            | Self::DisambiguationRequested { metadata, .. }
            | Self::IntentRequestFinished { metadata, .. }
            | Self::ConnectionReady { metadata, .. }
            | Self::ConnectionLost { metadata, .. } => metadata,
        }
    }

    /// Stable snake-case name of the event variant.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            // Runtime Lifecycle
            Self::RuntimeStateChanged { .. } => "runtime_state_changed",
            Self::RuntimeFinished { .. } => "runtime_finished",
            Self::ApplicationInterfaceReady { .. } => "application_interface_ready",
            // Quick Launcher
            Self::QuickLauncherReplenished { .. } => "quick_launcher_replenished",
            Self::QuickLauncherAttached { .. } => "quick_launcher_attached",
            // Intents
            Self::DisambiguationRequested { .. } => "disambiguation_requested",
            Self::IntentRequestFinished { .. } => "intent_request_finished",
            // IPC
            Self::ConnectionReady { .. } => "connection_ready",
            Self::ConnectionLost { .. } => "connection_lost",
        }
    }

    /// Runtime this event concerns, if any.
    #[must_use]
    pub fn runtime_id(&self) -> Option<RuntimeId> {
        match self {
            Self::RuntimeStateChanged { runtime_id, .. }
            | Self::RuntimeFinished { runtime_id, .. }
            | Self::ApplicationInterfaceReady { runtime_id, .. }
            | Self::QuickLauncherReplenished { runtime_id, .. }
            | Self::QuickLauncherAttached { runtime_id, .. } => Some(*runtime_id),
            _ => None,
        }
    }
}
