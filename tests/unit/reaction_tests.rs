//! Unit tests for the reaction policy: status → event → reaction key
//! mapping, priority inference, duration parsing, and escalation.

use std::time::Duration;

use agent_fleet::models::event::{types, EventPriority};
use agent_fleet::models::reaction::{parse_duration, EscalateAfter, ReactionConfig};
use agent_fleet::models::session::SessionStatus;
use agent_fleet::orchestrator::reactions::{
    event_type_for_status, infer_priority, reaction_key_for_event, reaction_key_for_status,
    should_escalate, ReactionTracker,
};
use chrono::{TimeDelta, Utc};

// ── mappings ──────────────────────────────────────────────────────────────────

#[test]
fn spawning_has_no_event() {
    assert!(event_type_for_status(SessionStatus::Spawning).is_none());
}

#[test]
fn every_other_status_has_an_event() {
    for status in SessionStatus::ALL {
        if status != SessionStatus::Spawning {
            assert!(event_type_for_status(status).is_some(), "{status} has no event");
        }
    }
}

#[test]
fn reaction_keys_for_statuses() {
    let cases = [
        (SessionStatus::CiFailed, Some("ci-failed")),
        (SessionStatus::ChangesRequested, Some("changes-requested")),
        (SessionStatus::Mergeable, Some("approved-and-green")),
        (SessionStatus::Stuck, Some("agent-stuck")),
        (SessionStatus::NeedsInput, Some("agent-needs-input")),
        (SessionStatus::Killed, Some("agent-exited")),
        (SessionStatus::Working, None),
        (SessionStatus::PrOpen, None),
        (SessionStatus::Merged, None),
    ];
    for (status, key) in cases {
        assert_eq!(reaction_key_for_status(status), key, "{status}");
    }
}

#[test]
fn conflict_and_summary_events_have_reactions() {
    assert_eq!(
        reaction_key_for_event(types::MERGE_CONFLICTS),
        Some("merge-conflicts")
    );
    assert_eq!(reaction_key_for_event(types::ALL_COMPLETE), Some("all-complete"));
    assert_eq!(reaction_key_for_event("something.else"), None);
}

// ── priority ──────────────────────────────────────────────────────────────────

#[test]
fn priority_inference_by_keyword() {
    let cases = [
        (types::SESSION_STUCK, EventPriority::Urgent),
        (types::SESSION_NEEDS_INPUT, EventPriority::Urgent),
        (types::SESSION_ERRORED, EventPriority::Urgent),
        (types::REVIEW_APPROVED, EventPriority::Action),
        (types::MERGE_READY, EventPriority::Action),
        (types::MERGE_COMPLETED, EventPriority::Action),
        (types::CI_FAILING, EventPriority::Warning),
        (types::REVIEW_CHANGES_REQUESTED, EventPriority::Warning),
        (types::MERGE_CONFLICTS, EventPriority::Warning),
        (types::SESSION_WORKING, EventPriority::Info),
        (types::PR_CREATED, EventPriority::Info),
    ];
    for (event_type, expected) in cases {
        assert_eq!(infer_priority(event_type), expected, "{event_type}");
    }
}

#[test]
fn urgent_keywords_take_precedence() {
    assert_eq!(infer_priority("agent.stuck_after_fail"), EventPriority::Urgent);
}

// ── durations ─────────────────────────────────────────────────────────────────

#[test]
fn parses_duration_units() {
    assert_eq!(parse_duration("90s"), Duration::from_secs(90));
    assert_eq!(parse_duration("10m"), Duration::from_secs(600));
    assert_eq!(parse_duration("2h"), Duration::from_secs(7200));
}

#[test]
fn unparseable_duration_is_zero() {
    for raw in ["", "10", "m", "1d", "-5m", "ten minutes"] {
        assert!(parse_duration(raw).is_zero(), "{raw:?}");
    }
}

// ── escalation ────────────────────────────────────────────────────────────────

fn tracker(attempts: u32, age: TimeDelta) -> (ReactionTracker, chrono::DateTime<Utc>) {
    let now = Utc::now();
    (
        ReactionTracker {
            attempts,
            first_triggered_at: now - age,
        },
        now,
    )
}

#[test]
fn escalates_once_attempts_exceed_retries() {
    let config = ReactionConfig {
        retries: Some(2),
        ..ReactionConfig::default()
    };
    let (two, now) = tracker(2, TimeDelta::zero());
    assert!(!should_escalate(&two, &config, now));
    let (three, now) = tracker(3, TimeDelta::zero());
    assert!(should_escalate(&three, &config, now));
}

#[test]
fn zero_retries_escalates_on_first_attempt() {
    let config = ReactionConfig {
        retries: Some(0),
        ..ReactionConfig::default()
    };
    let (first, now) = tracker(1, TimeDelta::zero());
    assert!(should_escalate(&first, &config, now));
}

#[test]
fn numeric_escalate_after_counts_attempts() {
    let config = ReactionConfig {
        escalate_after: Some(EscalateAfter::Attempts(1)),
        ..ReactionConfig::default()
    };
    let (first, now) = tracker(1, TimeDelta::zero());
    assert!(!should_escalate(&first, &config, now));
    let (second, now) = tracker(2, TimeDelta::zero());
    assert!(should_escalate(&second, &config, now));
}

#[test]
fn duration_escalate_after_counts_elapsed_time() {
    let config = ReactionConfig {
        escalate_after: Some(EscalateAfter::Duration("10m".into())),
        ..ReactionConfig::default()
    };
    let (fresh, now) = tracker(5, TimeDelta::minutes(9));
    assert!(!should_escalate(&fresh, &config, now));
    let (stale, now) = tracker(1, TimeDelta::minutes(11));
    assert!(should_escalate(&stale, &config, now));
}

#[test]
fn unparseable_duration_never_escalates_on_time() {
    let config = ReactionConfig {
        escalate_after: Some(EscalateAfter::Duration("whenever".into())),
        ..ReactionConfig::default()
    };
    let (old, now) = tracker(1, TimeDelta::days(30));
    assert!(!should_escalate(&old, &config, now));
}

#[test]
fn no_limits_never_escalates() {
    let (many, now) = tracker(1_000, TimeDelta::days(1));
    assert!(!should_escalate(&many, &ReactionConfig::default(), now));
}

// ── config merging ────────────────────────────────────────────────────────────

#[test]
fn merged_over_prefers_overlay_fields() {
    let base = ReactionConfig {
        auto: Some(true),
        message: Some("base".into()),
        retries: Some(3),
        ..ReactionConfig::default()
    };
    let overlay = ReactionConfig {
        auto: Some(false),
        ..ReactionConfig::default()
    };
    let merged = overlay.merged_over(&base);
    assert_eq!(merged.auto, Some(false));
    assert_eq!(merged.message.as_deref(), Some("base"));
    assert_eq!(merged.retries, Some(3));
}

#[test]
fn auto_defaults_to_enabled() {
    assert!(ReactionConfig::default().is_auto());
}
