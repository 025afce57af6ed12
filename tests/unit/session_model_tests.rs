//! Unit tests for the session model: status names, terminal and
//! restorable sets, PR URL parsing, and rebuilding from metadata.

use std::collections::BTreeMap;
use std::path::PathBuf;

use agent_fleet::models::session::{
    keys, ActivityState, PrInfo, RuntimeHandle, Session, SessionStatus,
};

fn record(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

// ── status names ──────────────────────────────────────────────────────────────

#[test]
fn status_round_trips_through_its_name() {
    for status in SessionStatus::ALL {
        let parsed: SessionStatus = status.as_str().parse().expect("known status");
        assert_eq!(parsed, status);
    }
}

#[test]
fn unknown_status_name_is_rejected() {
    assert!("paused".parse::<SessionStatus>().is_err());
}

#[test]
fn status_serializes_as_snake_case() {
    let json = serde_json::to_string(&SessionStatus::ChangesRequested).expect("serialize");
    assert_eq!(json, "\"changes_requested\"");
}

#[test]
fn only_merged_and_killed_are_terminal() {
    let terminal: Vec<_> = SessionStatus::ALL
        .into_iter()
        .filter(|s| s.is_terminal())
        .collect();
    assert_eq!(terminal, [SessionStatus::Merged, SessionStatus::Killed]);
}

#[test]
fn restorable_statuses() {
    assert!(SessionStatus::Killed.is_restorable());
    assert!(SessionStatus::Terminated.is_restorable());
    assert!(SessionStatus::Errored.is_restorable());
    assert!(!SessionStatus::Merged.is_restorable());
    assert!(!SessionStatus::Working.is_restorable());
    assert!(!SessionStatus::Spawning.is_restorable());
}

#[test]
fn activity_display_is_snake_case() {
    assert_eq!(ActivityState::WaitingInput.to_string(), "waiting_input");
    assert_eq!(ActivityState::Exited.to_string(), "exited");
}

// ── PR URLs ───────────────────────────────────────────────────────────────────

#[test]
fn parses_github_pull_url() {
    let pr = PrInfo::from_url("https://github.com/acme/app/pull/42", "feat/x", "main")
        .expect("pull url");
    assert_eq!(pr.number, 42);
    assert_eq!(pr.owner, "acme");
    assert_eq!(pr.repo, "app");
    assert_eq!(pr.branch, "feat/x");
    assert_eq!(pr.base_branch, "main");
}

#[test]
fn parses_gitlab_merge_request_with_group_path() {
    let pr = PrInfo::from_url(
        "https://gitlab.example.com/group/sub/app/-/merge_requests/7",
        "b",
        "main",
    )
    .expect("merge request url");
    assert_eq!(pr.number, 7);
    assert_eq!(pr.owner, "group/sub");
    assert_eq!(pr.repo, "app");
}

#[test]
fn non_pr_url_is_none() {
    assert!(PrInfo::from_url("https://github.com/acme/app/issues/3", "b", "main").is_none());
    assert!(PrInfo::from_url("not a url", "b", "main").is_none());
}

// ── from_metadata ─────────────────────────────────────────────────────────────

#[test]
fn rebuilds_session_from_full_record() {
    let handle = RuntimeHandle::new("app-1", "process").with_data("pid", 4242);
    let handle_json = serde_json::to_string(&handle).expect("handle json");
    let raw = record(&[
        (keys::PROJECT, "app"),
        (keys::STATUS, "pr_open"),
        (keys::BRANCH, "feat/INT-1"),
        (keys::ISSUE, "INT-1"),
        (keys::PR, "https://github.com/acme/app/pull/9"),
        (keys::WORKTREE, "/wt/app/app-1"),
        (keys::RUNTIME_HANDLE, handle_json.as_str()),
        (keys::CREATED_AT, "2026-01-02T03:04:05Z"),
        (keys::SUMMARY, "wrote tests"),
    ]);

    let session = Session::from_metadata("app-1", "app", "main", raw);

    assert_eq!(session.status, SessionStatus::PrOpen);
    assert_eq!(session.branch, "feat/INT-1");
    assert_eq!(session.issue_id.as_deref(), Some("INT-1"));
    assert_eq!(session.pr.as_ref().map(|p| p.number), Some(9));
    assert_eq!(session.workspace_path, Some(PathBuf::from("/wt/app/app-1")));
    assert_eq!(session.runtime_handle, Some(handle));
    assert_eq!(
        session.last_activity_at, session.created_at,
        "missing last activity falls back to creation time"
    );
    assert_eq!(
        session
            .agent_info
            .as_ref()
            .and_then(|i| i.summary.as_deref()),
        Some("wrote tests")
    );
}

#[test]
fn missing_status_means_spawning() {
    let session = Session::from_metadata("app-1", "app", "main", BTreeMap::new());
    assert_eq!(session.status, SessionStatus::Spawning);
    assert_eq!(session.branch, "main", "branch defaults to the project branch");
}

#[test]
fn malformed_fields_degrade_instead_of_failing() {
    let raw = record(&[
        (keys::STATUS, "sleeping"),
        (keys::RUNTIME_HANDLE, "{not json"),
        (keys::CREATED_AT, "yesterday"),
    ]);
    let session = Session::from_metadata("app-1", "app", "main", raw);

    assert_eq!(session.status, SessionStatus::Working);
    assert!(session.runtime_handle.is_none());
}

#[test]
fn empty_values_count_as_absent() {
    let raw = record(&[(keys::ISSUE, ""), (keys::AGENT, "")]);
    let session = Session::from_metadata("app-1", "app", "main", raw);
    assert!(session.issue_id.is_none());
    assert!(session.agent_override().is_none());
}

#[test]
fn agent_override_is_read_from_metadata() {
    let raw = record(&[(keys::AGENT, "codex")]);
    let session = Session::from_metadata("app-1", "app", "main", raw);
    assert_eq!(session.agent_override(), Some("codex"));
}
