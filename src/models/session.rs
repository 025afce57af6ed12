//! Session model and lifecycle helpers.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::AppError;

/// Persisted metadata keys for a session record.
pub mod keys {
    /// Owning project identifier.
    pub const PROJECT: &str = "project";
    /// Last persisted lifecycle status.
    pub const STATUS: &str = "status";
    /// Git branch the agent works on.
    pub const BRANCH: &str = "branch";
    /// Issue identifier in the project's tracker.
    pub const ISSUE: &str = "issue";
    /// Pull request URL.
    pub const PR: &str = "pr";
    /// Workspace (worktree) path.
    pub const WORKTREE: &str = "worktree";
    /// JSON-encoded runtime handle.
    pub const RUNTIME_HANDLE: &str = "runtime_handle";
    /// Agent plugin override for this session.
    pub const AGENT: &str = "agent";
    /// RFC 3339 creation timestamp.
    pub const CREATED_AT: &str = "created_at";
    /// RFC 3339 timestamp of the last observed agent activity.
    pub const LAST_ACTIVITY_AT: &str = "last_activity_at";
    /// RFC 3339 timestamp of the last restore.
    pub const RESTORED_AT: &str = "restored_at";
    /// Agent-provided summary of the work so far.
    pub const SUMMARY: &str = "summary";
}

/// Lifecycle status for an agent session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Workspace and process are being created.
    Spawning,
    /// Agent is working on the issue.
    Working,
    /// A pull request exists and awaits review or CI.
    PrOpen,
    /// CI is failing on the pull request.
    CiFailed,
    /// Review has been requested but not given.
    ReviewPending,
    /// A reviewer requested changes.
    ChangesRequested,
    /// The pull request is approved but not yet mergeable.
    Approved,
    /// Approved, green and conflict free.
    Mergeable,
    /// The pull request has been merged.
    Merged,
    /// The agent is waiting for human input.
    NeedsInput,
    /// The agent is blocked and not making progress.
    Stuck,
    /// The agent reported an unrecoverable error.
    Errored,
    /// The runtime or agent process is gone.
    Killed,
    /// The session was terminated by an operator.
    Terminated,
}

impl SessionStatus {
    /// All statuses, in declaration order.
    pub const ALL: [Self; 14] = [
        Self::Spawning,
        Self::Working,
        Self::PrOpen,
        Self::CiFailed,
        Self::ReviewPending,
        Self::ChangesRequested,
        Self::Approved,
        Self::Mergeable,
        Self::Merged,
        Self::NeedsInput,
        Self::Stuck,
        Self::Errored,
        Self::Killed,
        Self::Terminated,
    ];

    /// Stable snake-case name used in metadata and events.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spawning => "spawning",
            Self::Working => "working",
            Self::PrOpen => "pr_open",
            Self::CiFailed => "ci_failed",
            Self::ReviewPending => "review_pending",
            Self::ChangesRequested => "changes_requested",
            Self::Approved => "approved",
            Self::Mergeable => "mergeable",
            Self::Merged => "merged",
            Self::NeedsInput => "needs_input",
            Self::Stuck => "stuck",
            Self::Errored => "errored",
            Self::Killed => "killed",
            Self::Terminated => "terminated",
        }
    }

    /// No automatic transition leaves a terminal status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Merged | Self::Killed)
    }

    /// Statuses from which [`restore`](crate::orchestrator::session_manager::SessionManager::restore)
    /// may relaunch the agent.
    #[must_use]
    pub fn is_restorable(self) -> bool {
        matches!(self, Self::Killed | Self::Terminated | Self::Errored)
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AppError::Metadata(format!("unknown session status '{s}'")))
    }
}

/// What the agent is doing right now, as observed by its adapter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    /// Producing output or running tools.
    Active,
    /// Alive but not doing anything.
    Idle,
    /// Asking a question and waiting for an answer.
    WaitingInput,
    /// Hit an error it cannot get past.
    Blocked,
    /// The agent process has exited.
    Exited,
}

impl ActivityState {
    /// Stable snake-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::WaitingInput => "waiting_input",
            Self::Blocked => "blocked",
            Self::Exited => "exited",
        }
    }
}

impl Display for ActivityState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference to a supervised process, owned by its runtime backend.
///
/// Only the backend named by `runtime_name` interprets `data`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeHandle {
    /// Backend-specific identifier of the process or terminal session.
    pub id: String,
    /// Name of the runtime plugin that created the handle.
    pub runtime_name: String,
    /// Backend-specific payload.
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl RuntimeHandle {
    /// Construct a handle with an empty payload.
    #[must_use]
    pub fn new(id: impl Into<String>, runtime_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            runtime_name: runtime_name.into(),
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

/// Structured pull request reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrInfo {
    /// Pull request number on the host.
    pub number: u64,
    /// Web URL of the pull request.
    pub url: String,
    /// Title, when known.
    pub title: String,
    /// Repository owner (user, org, or group path).
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Head branch.
    pub branch: String,
    /// Target branch.
    pub base_branch: String,
    /// Whether the pull request is still a draft.
    pub is_draft: bool,
}

#[allow(clippy::expect_used)]
static PR_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://[^/]+/(?P<owner>.+?)/(?P<repo>[^/]+?)(?:/-)?/(?:pull|pulls|merge_requests)/(?P<number>\d+)/?(?:[?#].*)?$",
    )
    .expect("static pull request regex is valid")
});

impl PrInfo {
    /// Parse a host pull request URL such as
    /// `https://github.com/acme/app/pull/42`.
    ///
    /// Returns `None` when the URL does not look like a pull request.
    #[must_use]
    pub fn from_url(url: &str, branch: &str, base_branch: &str) -> Option<Self> {
        let caps = PR_URL.captures(url.trim())?;
        let number = caps.name("number")?.as_str().parse().ok()?;
        Some(Self {
            number,
            url: url.trim().to_owned(),
            title: String::new(),
            owner: caps.name("owner")?.as_str().to_owned(),
            repo: caps.name("repo")?.as_str().to_owned(),
            branch: branch.to_owned(),
            base_branch: base_branch.to_owned(),
            is_draft: false,
        })
    }
}

/// Agent-reported details about its own session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentInfo {
    /// Short summary of the agent's progress.
    pub summary: Option<String>,
    /// The agent's own session identifier, if it has one.
    pub agent_session_id: Option<String>,
}

/// A single agent session, composed from its persisted metadata and live signals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Identifier, unique within the project (`<prefix>-<n>`).
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Current agent activity.
    pub activity: ActivityState,
    /// Branch the agent works on.
    pub branch: String,
    /// Issue being worked on.
    pub issue_id: Option<String>,
    /// Pull request opened for the session.
    pub pr: Option<PrInfo>,
    /// Workspace path.
    pub workspace_path: Option<PathBuf>,
    /// Handle of the supervised agent process.
    pub runtime_handle: Option<RuntimeHandle>,
    /// Agent-reported details.
    pub agent_info: Option<AgentInfo>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last observed activity.
    pub last_activity_at: DateTime<Utc>,
    /// Last restore, if any.
    pub restored_at: Option<DateTime<Utc>>,
    /// Raw persisted record.
    pub metadata: BTreeMap<String, String>,
}

impl Session {
    /// Rebuild a session from its persisted record.
    ///
    /// Malformed fields degrade to defaults with a warning rather than failing,
    /// so a single damaged record never hides the rest of the fleet.
    #[must_use]
    pub fn from_metadata(
        id: &str,
        project_id: &str,
        default_branch: &str,
        raw: BTreeMap<String, String>,
    ) -> Self {
        let status = match raw.get(keys::STATUS) {
            Some(value) => value.parse().unwrap_or_else(|err| {
                warn!(session_id = id, %err, "unreadable status, assuming working");
                SessionStatus::Working
            }),
            None => SessionStatus::Spawning,
        };

        let runtime_handle = non_empty(&raw, keys::RUNTIME_HANDLE).and_then(|json| {
            serde_json::from_str::<RuntimeHandle>(json)
                .map_err(|err| warn!(session_id = id, %err, "unreadable runtime handle"))
                .ok()
        });

        let branch = non_empty(&raw, keys::BRANCH)
            .unwrap_or(default_branch)
            .to_owned();
        let pr = non_empty(&raw, keys::PR)
            .and_then(|url| PrInfo::from_url(url, &branch, default_branch));

        let created_at = parse_time(&raw, keys::CREATED_AT).unwrap_or_else(Utc::now);
        let last_activity_at = parse_time(&raw, keys::LAST_ACTIVITY_AT).unwrap_or(created_at);

        Self {
            id: id.to_owned(),
            project_id: project_id.to_owned(),
            status,
            activity: ActivityState::Idle,
            branch,
            issue_id: non_empty(&raw, keys::ISSUE).map(str::to_owned),
            pr,
            workspace_path: non_empty(&raw, keys::WORKTREE).map(PathBuf::from),
            runtime_handle,
            agent_info: non_empty(&raw, keys::SUMMARY).map(|summary| AgentInfo {
                summary: Some(summary.to_owned()),
                agent_session_id: None,
            }),
            created_at,
            last_activity_at,
            restored_at: parse_time(&raw, keys::RESTORED_AT),
            metadata: raw,
        }
    }

    /// Agent plugin recorded for this session, if it overrides the project default.
    #[must_use]
    pub fn agent_override(&self) -> Option<&str> {
        non_empty(&self.metadata, keys::AGENT)
    }
}

fn non_empty<'a>(raw: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    raw.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

fn parse_time(raw: &BTreeMap<String, String>, key: &str) -> Option<DateTime<Utc>> {
    non_empty(raw, key)
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
}
