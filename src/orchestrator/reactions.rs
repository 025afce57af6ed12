//! Reaction policy: status → event type → reaction key, priority inference,
//! and escalation.
//!
//! Everything here is pure so the lifecycle manager's decisions can be
//! tested without a polling loop.

use chrono::{DateTime, Utc};

use crate::models::event::{types, EventPriority};
use crate::models::reaction::{parse_duration, EscalateAfter, ReactionConfig};
use crate::models::session::SessionStatus;

/// Reaction fired once when every session is terminal.
pub const ALL_COMPLETE: &str = "all-complete";

/// Event type announcing a transition into `status`.
#[must_use]
pub fn event_type_for_status(status: SessionStatus) -> Option<&'static str> {
    match status {
        SessionStatus::Spawning => None,
        SessionStatus::Working => Some(types::SESSION_WORKING),
        SessionStatus::PrOpen => Some(types::PR_CREATED),
        SessionStatus::CiFailed => Some(types::CI_FAILING),
        SessionStatus::ReviewPending => Some(types::REVIEW_PENDING),
        SessionStatus::ChangesRequested => Some(types::REVIEW_CHANGES_REQUESTED),
        SessionStatus::Approved => Some(types::REVIEW_APPROVED),
        SessionStatus::Mergeable => Some(types::MERGE_READY),
        SessionStatus::Merged => Some(types::MERGE_COMPLETED),
        SessionStatus::NeedsInput => Some(types::SESSION_NEEDS_INPUT),
        SessionStatus::Stuck => Some(types::SESSION_STUCK),
        SessionStatus::Errored => Some(types::SESSION_ERRORED),
        SessionStatus::Killed => Some(types::SESSION_KILLED),
        SessionStatus::Terminated => Some(types::SESSION_TERMINATED),
    }
}

/// Reaction key handling an event type, if any.
#[must_use]
pub fn reaction_key_for_event(event_type: &str) -> Option<&'static str> {
    match event_type {
        types::CI_FAILING => Some("ci-failed"),
        types::REVIEW_CHANGES_REQUESTED => Some("changes-requested"),
        types::MERGE_CONFLICTS => Some("merge-conflicts"),
        types::MERGE_READY => Some("approved-and-green"),
        types::SESSION_STUCK => Some("agent-stuck"),
        types::SESSION_NEEDS_INPUT => Some("agent-needs-input"),
        types::SESSION_KILLED => Some("agent-exited"),
        types::ALL_COMPLETE => Some(ALL_COMPLETE),
        _ => None,
    }
}

/// Reaction key tied to a status, if any.
#[must_use]
pub fn reaction_key_for_status(status: SessionStatus) -> Option<&'static str> {
    event_type_for_status(status).and_then(reaction_key_for_event)
}

/// Priority for an event without an explicit one, from keywords in its type.
#[must_use]
pub fn infer_priority(event_type: &str) -> EventPriority {
    const URGENT: [&str; 3] = ["stuck", "needs_input", "errored"];
    const ACTION: [&str; 4] = ["approved", "ready", "merged", "completed"];
    const WARNING: [&str; 3] = ["fail", "changes_requested", "conflicts"];

    if URGENT.iter().any(|k| event_type.contains(k)) {
        EventPriority::Urgent
    } else if ACTION.iter().any(|k| event_type.contains(k)) {
        EventPriority::Action
    } else if WARNING.iter().any(|k| event_type.contains(k)) {
        EventPriority::Warning
    } else {
        EventPriority::Info
    }
}

/// Attempt counter for one (session, reaction key) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactionTracker {
    /// Attempts so far, including the current one.
    pub attempts: u32,
    /// When the reaction first fired for the current status.
    pub first_triggered_at: DateTime<Utc>,
}

impl ReactionTracker {
    /// Tracker for a first attempt at `now`.
    #[must_use]
    pub fn first(now: DateTime<Utc>) -> Self {
        Self {
            attempts: 1,
            first_triggered_at: now,
        }
    }
}

/// Whether a reaction has used up its automation budget.
///
/// Escalates when attempts exceed `retries`, when attempts exceed a
/// numeric `escalate_after`, or when more than a duration `escalate_after`
/// has passed since the first trigger. A zero duration (including an
/// unparseable one) never escalates on time.
#[must_use]
pub fn should_escalate(
    tracker: &ReactionTracker,
    config: &ReactionConfig,
    now: DateTime<Utc>,
) -> bool {
    if config.retries.is_some_and(|retries| tracker.attempts > retries) {
        return true;
    }

    match &config.escalate_after {
        Some(EscalateAfter::Attempts(limit)) => tracker.attempts > *limit,
        Some(EscalateAfter::Duration(raw)) => {
            let limit = parse_duration(raw);
            if limit.is_zero() {
                return false;
            }
            (now - tracker.first_triggered_at)
                .to_std()
                .is_ok_and(|elapsed| elapsed > limit)
        }
        None => false,
    }
}
