//! Orchestrator events delivered to notifiers, loggers, and subscribers.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notification priority tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    /// A human must act now.
    Urgent,
    /// A human should act soon (review, merge).
    Action,
    /// Something went wrong but automation may recover.
    Warning,
    /// Informational only; never dispatched to notifiers.
    Info,
}

impl EventPriority {
    /// Stable snake-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::Action => "action",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

impl Display for EventPriority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known event type names.
pub mod types {
    /// Session started working.
    pub const SESSION_WORKING: &str = "session.working";
    /// Agent asked for input.
    pub const SESSION_NEEDS_INPUT: &str = "session.needs_input";
    /// Agent is stuck.
    pub const SESSION_STUCK: &str = "session.stuck";
    /// Agent errored.
    pub const SESSION_ERRORED: &str = "session.errored";
    /// Runtime or agent process is gone.
    pub const SESSION_KILLED: &str = "session.killed";
    /// Operator terminated the session.
    pub const SESSION_TERMINATED: &str = "session.terminated";
    /// Pull request opened.
    pub const PR_CREATED: &str = "pr.created";
    /// CI failing on the pull request.
    pub const CI_FAILING: &str = "ci.failing";
    /// Review requested.
    pub const REVIEW_PENDING: &str = "review.pending";
    /// Reviewer requested changes.
    pub const REVIEW_CHANGES_REQUESTED: &str = "review.changes_requested";
    /// Reviewer approved.
    pub const REVIEW_APPROVED: &str = "review.approved";
    /// Pull request has merge conflicts.
    pub const MERGE_CONFLICTS: &str = "merge.conflicts";
    /// Pull request is ready to merge.
    pub const MERGE_READY: &str = "merge.ready";
    /// Pull request merged.
    pub const MERGE_COMPLETED: &str = "merge.completed";
    /// An automated reaction ran.
    pub const REACTION_TRIGGERED: &str = "reaction.triggered";
    /// An automated reaction gave up and handed over to a human.
    pub const REACTION_ESCALATED: &str = "reaction.escalated";
    /// Every session reached a terminal status.
    pub const ALL_COMPLETE: &str = "summary.all_complete";
}

/// An immutable orchestrator event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorEvent {
    /// Fresh identifier per event.
    pub id: String,
    /// Dotted event type, e.g. `ci.failing`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Priority tier the event is dispatched under.
    pub priority: EventPriority,
    /// Session the event concerns (`system` for fleet-wide events).
    pub session_id: String,
    /// Project the event concerns (`all` for fleet-wide events).
    pub project_id: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Human-readable message.
    pub message: String,
    /// Structured payload.
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl OrchestratorEvent {
    /// Construct an event with a fresh identifier and the current time.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        priority: EventPriority,
        session_id: impl Into<String>,
        project_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            priority,
            session_id: session_id.into(),
            project_id: project_id.into(),
            timestamp: Utc::now(),
            message: message.into(),
            data: serde_json::Map::new(),
        }
    }

    /// Attach a payload entry.
    #[must_use]
    pub fn with_data(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.to_owned(), value.into());
        self
    }
}
