//! Pluggable backend capabilities.
//!
//! Each slot (runtime, agent, workspace, tracker, scm, notifier) is a trait
//! with one implementation per concrete integration. Implementations are
//! looked up by name through the [`PluginRegistry`]; the orchestrator never
//! knows which concrete backend it is talking to.

pub mod command_agent;
pub mod log_notifier;
pub mod process_runtime;
pub mod registry;
pub mod webhook_notifier;
pub mod worktree;

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::config::ProjectConfig;
use crate::models::event::OrchestratorEvent;
use crate::models::session::{ActivityState, AgentInfo, PrInfo, RuntimeHandle, Session};
use crate::Result;

pub use registry::PluginRegistry;

/// Boxed future returned by plugin operations.
pub type PluginFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Capability slot a plugin fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginSlot {
    /// Process or terminal supervisor.
    Runtime,
    /// Coding-agent adapter.
    Agent,
    /// Checkout / worktree manager.
    Workspace,
    /// Issue tracker.
    Tracker,
    /// Source-control host.
    Scm,
    /// Human-notification channel.
    Notifier,
}

impl Display for PluginSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Runtime => "runtime",
            Self::Agent => "agent",
            Self::Workspace => "workspace",
            Self::Tracker => "tracker",
            Self::Scm => "scm",
            Self::Notifier => "notifier",
        })
    }
}

// ── Runtime ──────────────────────────────────────────────────────────────────

/// Everything a runtime needs to launch an agent process.
#[derive(Debug, Clone)]
pub struct RuntimeCreateSpec {
    /// Session the process belongs to.
    pub session_id: String,
    /// Working directory for the process.
    pub workspace_path: PathBuf,
    /// Shell command line that starts the agent.
    pub launch_command: String,
    /// Extra environment variables.
    pub environment: HashMap<String, String>,
}

/// Process / terminal supervisor.
pub trait Runtime: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Launch a process and return its handle.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Runtime`](crate::AppError::Runtime) if the process cannot start.
    fn create<'a>(&'a self, spec: &'a RuntimeCreateSpec) -> PluginFuture<'a, RuntimeHandle>;

    /// Stop the process. Fails if it is already gone.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Runtime`](crate::AppError::Runtime) if the process cannot be stopped.
    fn destroy<'a>(&'a self, handle: &'a RuntimeHandle) -> PluginFuture<'a, ()>;

    /// Type a message into the agent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Runtime`](crate::AppError::Runtime) if delivery fails.
    fn send_message<'a>(&'a self, handle: &'a RuntimeHandle, message: &'a str)
        -> PluginFuture<'a, ()>;

    /// The last `lines` lines of terminal output.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Runtime`](crate::AppError::Runtime) if output cannot be read.
    fn get_output<'a>(&'a self, handle: &'a RuntimeHandle, lines: usize)
        -> PluginFuture<'a, String>;

    /// Whether the supervised process is still alive.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Runtime`](crate::AppError::Runtime) if liveness cannot be determined.
    fn is_alive<'a>(&'a self, handle: &'a RuntimeHandle) -> PluginFuture<'a, bool>;
}

// ── Agent ────────────────────────────────────────────────────────────────────

/// Inputs for building an agent launch command.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Session being launched.
    pub session_id: String,
    /// Owning project.
    pub project_id: String,
    /// Issue the agent works on.
    pub issue_id: Option<String>,
    /// Initial instruction.
    pub prompt: Option<String>,
    /// Branch checked out in the workspace.
    pub branch: String,
    /// Workspace path.
    pub workspace_path: PathBuf,
}

/// Coding-agent adapter.
pub trait Agent: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Shell command line that starts the agent.
    fn launch_command(&self, config: &LaunchConfig) -> String;

    /// Environment the agent needs on top of the orchestrator's variables.
    fn environment(&self, config: &LaunchConfig) -> HashMap<String, String>;

    /// Command that resumes a previous agent session, if the agent supports it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Agent`](crate::AppError::Agent) if the resume command cannot be built.
    fn restore_command<'a>(
        &'a self,
        _session: &'a Session,
        _project: &'a ProjectConfig,
    ) -> PluginFuture<'a, Option<String>> {
        Box::pin(async { Ok(None) })
    }

    /// Classify terminal output.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Agent`](crate::AppError::Agent) if the output cannot be classified.
    fn detect_activity(&self, output: &str) -> Result<ActivityState>;

    /// Ask the agent directly what it is doing.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Agent`](crate::AppError::Agent) if the probe fails.
    fn activity_state<'a>(&'a self, handle: &'a RuntimeHandle) -> PluginFuture<'a, ActivityState>;

    /// Whether the agent's own process (inside the runtime) is still running.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Agent`](crate::AppError::Agent) if the check fails.
    fn is_process_running<'a>(&'a self, handle: &'a RuntimeHandle) -> PluginFuture<'a, bool>;

    /// Agent-reported session details.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Agent`](crate::AppError::Agent) if introspection fails.
    fn session_info<'a>(&'a self, _session: &'a Session) -> PluginFuture<'a, Option<AgentInfo>> {
        Box::pin(async { Ok(None) })
    }
}

// ── Workspace ────────────────────────────────────────────────────────────────

/// Inputs for creating a session workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceCreateSpec {
    /// Owning project.
    pub project_id: String,
    /// Session the workspace is for.
    pub session_id: String,
    /// Local checkout to branch from.
    pub repo_path: PathBuf,
    /// Branch to check out.
    pub branch: String,
    /// Branch to start from when `branch` does not exist yet.
    pub base_branch: String,
}

/// Inputs for recreating a workspace from a surviving branch.
#[derive(Debug, Clone)]
pub struct WorkspaceRestoreSpec {
    /// Where the workspace should live.
    pub path: PathBuf,
    /// Local checkout the workspace belongs to.
    pub repo_path: PathBuf,
    /// Branch to check out.
    pub branch: String,
}

/// A created workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceInfo {
    /// Absolute workspace path.
    pub path: PathBuf,
    /// Branch checked out.
    pub branch: String,
}

/// Checkout / worktree manager.
pub trait Workspace: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Create a workspace.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Workspace`](crate::AppError::Workspace) on failure.
    fn create<'a>(&'a self, spec: &'a WorkspaceCreateSpec) -> PluginFuture<'a, WorkspaceInfo>;

    /// Remove a workspace.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Workspace`](crate::AppError::Workspace) on failure.
    fn destroy<'a>(&'a self, path: &'a Path) -> PluginFuture<'a, ()>;

    /// Whether the workspace still exists.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Workspace`](crate::AppError::Workspace) if existence cannot be checked.
    fn exists<'a>(&'a self, path: &'a Path) -> PluginFuture<'a, bool>;

    /// Recreate a workspace for an existing branch.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Workspace`](crate::AppError::Workspace) on failure.
    fn restore<'a>(&'a self, spec: &'a WorkspaceRestoreSpec) -> PluginFuture<'a, WorkspaceInfo>;
}

// ── Tracker ──────────────────────────────────────────────────────────────────

/// Issue as reported by the tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Tracker identifier.
    pub id: String,
    /// Title.
    pub title: String,
    /// Web URL.
    pub url: String,
}

/// Issue tracker.
pub trait Tracker: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Fetch an issue.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::IssueNotFound`](crate::AppError::IssueNotFound) when the issue
    /// does not exist, any other error for auth or network failures.
    fn get_issue<'a>(&'a self, id: &'a str, project: &'a ProjectConfig) -> PluginFuture<'a, Issue>;

    /// Branch name convention for an issue.
    fn branch_name(&self, id: &str, project: &ProjectConfig) -> String;

    /// Whether the issue is closed / done.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Tracker`](crate::AppError::Tracker) if the tracker cannot be queried.
    fn is_completed<'a>(
        &'a self,
        _id: &'a str,
        _project: &'a ProjectConfig,
    ) -> PluginFuture<'a, bool> {
        Box::pin(async { Ok(false) })
    }
}

// ── SCM ──────────────────────────────────────────────────────────────────────

/// Pull request state on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    /// Open.
    Open,
    /// Merged.
    Merged,
    /// Closed without merging.
    Closed,
}

/// Aggregated CI state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    /// All checks green.
    Passing,
    /// At least one check failed.
    Failing,
    /// Checks still running.
    Pending,
    /// No checks configured.
    None,
}

/// Aggregated review decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// Approved.
    Approved,
    /// Changes requested.
    ChangesRequested,
    /// Review requested, none given.
    Pending,
    /// No review requested.
    None,
}

/// Merge readiness as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReadiness {
    /// Host says the PR can be merged.
    pub mergeable: bool,
    /// Required checks pass.
    pub ci_passing: bool,
    /// Required approvals present.
    pub approved: bool,
    /// No merge conflicts.
    pub no_conflicts: bool,
    /// Human-readable reasons the PR cannot merge.
    pub blockers: Vec<String>,
}

impl MergeReadiness {
    /// All merge conditions hold.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.mergeable && self.ci_passing && self.approved && self.no_conflicts
    }
}

/// Source-control host.
pub trait Scm: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Find an open PR for the session's branch.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Scm`](crate::AppError::Scm) if the host cannot be queried.
    fn detect_pr<'a>(
        &'a self,
        _session: &'a Session,
        _project: &'a ProjectConfig,
    ) -> PluginFuture<'a, Option<PrInfo>> {
        Box::pin(async { Ok(None) })
    }

    /// PR state.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Scm`](crate::AppError::Scm) if the host cannot be queried.
    fn pr_state<'a>(&'a self, pr: &'a PrInfo) -> PluginFuture<'a, PrState>;

    /// Aggregated CI state.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Scm`](crate::AppError::Scm) if the host cannot be queried.
    fn ci_summary<'a>(&'a self, pr: &'a PrInfo) -> PluginFuture<'a, CiStatus>;

    /// Aggregated review decision.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Scm`](crate::AppError::Scm) if the host cannot be queried.
    fn review_decision<'a>(&'a self, pr: &'a PrInfo) -> PluginFuture<'a, ReviewDecision>;

    /// Merge readiness.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Scm`](crate::AppError::Scm) if the host cannot be queried.
    fn mergeability<'a>(&'a self, pr: &'a PrInfo) -> PluginFuture<'a, MergeReadiness>;

    /// Whether `branch` still exists on the remote.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Scm`](crate::AppError::Scm) if the host cannot be queried.
    fn branch_exists<'a>(
        &'a self,
        branch: &'a str,
        project: &'a ProjectConfig,
    ) -> PluginFuture<'a, bool>;

    /// Merge the PR.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Scm`](crate::AppError::Scm) if the merge is rejected.
    fn merge_pr<'a>(&'a self, pr: &'a PrInfo) -> PluginFuture<'a, ()>;
}

// ── Notifier ─────────────────────────────────────────────────────────────────

/// Human-notification channel.
pub trait Notifier: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Deliver an event.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Notifier`](crate::AppError::Notifier) if delivery fails.
    fn notify<'a>(&'a self, event: &'a OrchestratorEvent) -> PluginFuture<'a, ()>;
}
