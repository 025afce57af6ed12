//! Session management: spawn, enumerate, kill, clean up, message, restore.
//!
//! The manager composes the plugin registry with the metadata store. It
//! never polls; the lifecycle manager drives it. Every read of a session
//! goes through the same enrichment: a dead runtime forces `killed` and
//! `exited`, and a failed activity probe degrades to `idle` instead of
//! surfacing an error.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tracing::{debug, info, info_span, warn, Instrument};

use super::bounded;
use crate::config::{OrchestratorConfig, ProjectConfig};
use crate::models::session::{
    keys, ActivityState, PrInfo, RuntimeHandle, Session, SessionStatus,
};
use crate::persistence::metadata::{self, Metadata};
use crate::plugins::{
    Agent, LaunchConfig, PluginRegistry, PrState, RuntimeCreateSpec, Scm, Tracker, Workspace,
    WorkspaceCreateSpec, WorkspaceRestoreSpec,
};
use crate::{AppError, Result};

/// Terminal lines read when classifying activity from output.
const OUTPUT_LINES: usize = 50;

/// Ids tried after the scanned maximum before giving up on a reservation.
const MAX_RESERVE_ATTEMPTS: u64 = 32;

/// Environment variable carrying the session id into the agent process.
pub const ENV_SESSION_ID: &str = "FLEET_SESSION_ID";
/// Environment variable carrying the project id into the agent process.
pub const ENV_PROJECT_ID: &str = "FLEET_PROJECT_ID";
/// Environment variable carrying the data directory into the agent process.
pub const ENV_DATA_DIR: &str = "FLEET_DATA_DIR";
/// Environment variable carrying the issue id into the agent process.
pub const ENV_ISSUE_ID: &str = "FLEET_ISSUE_ID";

/// Parameters for [`SessionManager::spawn`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Project to spawn in.
    pub project_id: String,
    /// Issue to work on.
    pub issue_id: Option<String>,
    /// Explicit branch, overriding the tracker convention.
    pub branch: Option<String>,
    /// Initial instruction for the agent.
    pub prompt: Option<String>,
    /// Agent plugin override for this session.
    pub agent: Option<String>,
}

impl SpawnRequest {
    /// Request for a session in `project_id` with no issue.
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    /// Work on `issue_id`.
    #[must_use]
    pub fn with_issue(mut self, issue_id: impl Into<String>) -> Self {
        self.issue_id = Some(issue_id.into());
        self
    }

    /// Initial instruction.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

/// A session that [`SessionManager::cleanup`] could not process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupError {
    /// Session that failed.
    pub session_id: String,
    /// Rendered error.
    pub error: String,
}

/// Outcome of [`SessionManager::cleanup`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
    /// Sessions killed (or that would be, on a dry run).
    pub killed: Vec<String>,
    /// Sessions left alone.
    pub skipped: Vec<String>,
    /// Sessions whose evaluation or teardown failed.
    pub errors: Vec<CleanupError>,
}

/// Session CRUD over the plugin registry and the metadata store.
#[derive(Clone)]
pub struct SessionManager {
    config: Arc<OrchestratorConfig>,
    registry: Arc<PluginRegistry>,
}

impl SessionManager {
    /// Manager over `config` and `registry`.
    #[must_use]
    pub fn new(config: Arc<OrchestratorConfig>, registry: Arc<PluginRegistry>) -> Self {
        Self { config, registry }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Project settings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownProject` if `project_id` is not configured.
    pub fn project(&self, project_id: &str) -> Result<&ProjectConfig> {
        self.config
            .projects
            .get(project_id)
            .ok_or_else(|| AppError::UnknownProject(project_id.to_owned()))
    }

    /// SCM backend configured for a project, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PluginNotFound` if the configured name is not registered.
    pub fn scm_for(&self, project: &ProjectConfig) -> Result<Option<Arc<dyn Scm>>> {
        project
            .scm
            .as_deref()
            .map(|name| self.registry.scm(name))
            .transpose()
    }

    /// Create a workspace and agent process for a new session.
    ///
    /// Plugins are resolved and the issue validated before anything is
    /// created. A failure after the workspace exists tears it down again.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownProject`, `AppError::PluginNotFound`,
    /// `AppError::IssueNotFound`, or `AppError::Tracker` without side
    /// effects; backend failures after that point after rolling back.
    pub async fn spawn(&self, request: SpawnRequest) -> Result<Session> {
        let span = info_span!("spawn_session", project_id = request.project_id);
        self.spawn_inner(request).instrument(span).await
    }

    async fn spawn_inner(&self, request: SpawnRequest) -> Result<Session> {
        let project_id = request.project_id.as_str();
        let project = self.project(project_id)?;

        let runtime = self.registry.runtime(self.runtime_name(project))?;
        let agent_name = request
            .agent
            .as_deref()
            .unwrap_or_else(|| self.agent_name(project));
        let agent = self.registry.agent(agent_name)?;
        let workspace = self.registry.workspace(self.workspace_name(project))?;
        let tracker = self.tracker_for(project)?;

        if let (Some(issue_id), Some(tracker)) = (request.issue_id.as_deref(), &tracker) {
            bounded(
                self.config.action_timeout(),
                "issue lookup",
                tracker.get_issue(issue_id, project),
            )
            .await
            .map_err(|err| match err {
                AppError::IssueNotFound(_) => err,
                other => AppError::Tracker(format!("failed to fetch issue {issue_id}: {other}")),
            })?;
        }

        let branch = match (&request.branch, request.issue_id.as_deref(), &tracker) {
            (Some(branch), _, _) => branch.clone(),
            (None, Some(issue_id), Some(tracker)) => tracker.branch_name(issue_id, project),
            (None, Some(issue_id), None) => format!("feat/{issue_id}"),
            (None, None, _) => project.default_branch.clone(),
        };

        let dir = self.config.sessions_dir(project_id);
        let session_id = allocate_session_id(&dir, self.config.session_prefix(project_id))?;
        debug!(session_id, branch, "session id reserved");

        let info = match workspace
            .create(&WorkspaceCreateSpec {
                project_id: project_id.to_owned(),
                session_id: session_id.clone(),
                repo_path: project.path.clone(),
                branch: branch.clone(),
                base_branch: project.default_branch.clone(),
            })
            .await
        {
            Ok(info) => info,
            Err(err) => {
                release_reservation(&dir, &session_id);
                return Err(err);
            }
        };

        let launch = LaunchConfig {
            session_id: session_id.clone(),
            project_id: project_id.to_owned(),
            issue_id: request.issue_id.clone(),
            prompt: request.prompt.clone(),
            branch: info.branch.clone(),
            workspace_path: info.path.clone(),
        };
        let spec = RuntimeCreateSpec {
            session_id: session_id.clone(),
            workspace_path: info.path.clone(),
            launch_command: agent.launch_command(&launch),
            environment: self.environment(agent.as_ref(), &launch),
        };

        let handle = match runtime.create(&spec).await {
            Ok(handle) => handle,
            Err(err) => {
                destroy_workspace(workspace.as_ref(), &info.path).await;
                release_reservation(&dir, &session_id);
                return Err(err);
            }
        };

        let now = Utc::now().to_rfc3339();
        let mut record = Metadata::new();
        record.insert(keys::PROJECT.into(), project_id.to_owned());
        record.insert(keys::STATUS.into(), SessionStatus::Spawning.as_str().into());
        record.insert(keys::BRANCH.into(), info.branch.clone());
        record.insert(keys::WORKTREE.into(), info.path.display().to_string());
        record.insert(keys::RUNTIME_HANDLE.into(), serde_json::to_string(&handle)?);
        record.insert(keys::CREATED_AT.into(), now.clone());
        record.insert(keys::LAST_ACTIVITY_AT.into(), now);
        if let Some(issue_id) = &request.issue_id {
            record.insert(keys::ISSUE.into(), issue_id.clone());
        }
        if let Some(agent) = &request.agent {
            record.insert(keys::AGENT.into(), agent.clone());
        }

        if let Err(err) = metadata::write_metadata(&dir, &session_id, &record) {
            if let Err(destroy_err) = runtime.destroy(&handle).await {
                warn!(session_id, %destroy_err, "failed to stop process during rollback");
            }
            destroy_workspace(workspace.as_ref(), &info.path).await;
            release_reservation(&dir, &session_id);
            return Err(err);
        }

        info!(session_id, branch = info.branch, "session spawned");
        Ok(Session::from_metadata(
            &session_id,
            project_id,
            &project.default_branch,
            record,
        ))
    }

    /// All sessions, optionally limited to one project, with live signals applied.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownProject` for an unconfigured project filter
    /// and `AppError::Io` if the metadata store cannot be read.
    pub async fn list(&self, project_id: Option<&str>) -> Result<Vec<Session>> {
        let mut sessions = self.load(project_id)?;
        join_all(sessions.iter_mut().map(|session| self.enrich(session))).await;
        Ok(sessions)
    }

    /// One session with live signals applied; `None` if it has no record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the metadata store cannot be read.
    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let Some((project_id, raw)) = self.locate(session_id)? else {
            return Ok(None);
        };
        let mut session = self.build(session_id, &project_id, raw);
        self.enrich(&mut session).await;
        Ok(Some(session))
    }

    /// Stop the agent, remove the workspace, and archive the record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session has no record and
    /// `AppError::Io` if archiving fails.
    pub async fn kill(&self, session_id: &str) -> Result<()> {
        let span = info_span!("kill_session", session_id);
        async {
            let (project_id, raw) = self
                .locate(session_id)?
                .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
            let project = self.project(&project_id)?;
            let session = self.build(session_id, &project_id, raw);

            if let Some(handle) = &session.runtime_handle {
                match self.registry.runtime(&handle.runtime_name) {
                    Ok(runtime) => {
                        if let Err(err) = runtime.destroy(handle).await {
                            debug!(%err, "runtime destroy failed, process likely gone");
                        }
                    }
                    Err(err) => warn!(%err, "cannot stop process"),
                }
            }

            if let Some(path) = &session.workspace_path {
                match self.registry.workspace(self.workspace_name(project)) {
                    Ok(workspace) => destroy_workspace(workspace.as_ref(), path).await,
                    Err(err) => warn!(%err, "cannot remove workspace"),
                }
            }

            let dir = self.config.sessions_dir(&project_id);
            metadata::update_metadata(
                &dir,
                session_id,
                [(keys::STATUS, SessionStatus::Killed.as_str())],
            )?;
            metadata::delete_metadata(&dir, session_id, true)?;
            info!("session killed");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Kill every session whose work is over: runtime gone, PR merged, or
    /// issue completed. A dry run evaluates the same predicate and reports
    /// the same classification without touching anything.
    ///
    /// # Errors
    ///
    /// Returns an error only if the session set itself cannot be loaded;
    /// per-session failures are collected in [`CleanupResult::errors`].
    pub async fn cleanup(&self, project_id: Option<&str>, dry_run: bool) -> Result<CleanupResult> {
        let sessions = self.load(project_id)?;
        let mut result = CleanupResult::default();

        for session in sessions {
            match self.cleanup_reason(&session).await {
                Ok(Some(reason)) => {
                    if !dry_run {
                        if let Err(err) = self.kill(&session.id).await {
                            warn!(session_id = session.id, %err, "cleanup kill failed");
                            result.errors.push(CleanupError {
                                session_id: session.id,
                                error: err.to_string(),
                            });
                            continue;
                        }
                    }
                    info!(session_id = session.id, reason, dry_run, "session cleaned up");
                    result.killed.push(session.id);
                }
                Ok(None) => result.skipped.push(session.id),
                Err(err) => {
                    warn!(session_id = session.id, %err, "cleanup check failed");
                    result.errors.push(CleanupError {
                        session_id: session.id,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(result)
    }

    /// Deliver a message to the session's agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sessions and the runtime's
    /// error if delivery fails.
    pub async fn send(&self, session_id: &str, message: &str) -> Result<()> {
        let (project_id, raw) = self
            .locate(session_id)?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
        let session = self.build(session_id, &project_id, raw);
        let project = self.project(&project_id)?;

        let handle = self.handle_for(&session, project);
        let runtime = self.registry.runtime(&handle.runtime_name)?;
        runtime.send_message(&handle, message).await?;
        debug!(session_id, "message sent to agent");
        Ok(())
    }

    /// Relaunch the agent of a killed, terminated, or errored session.
    ///
    /// Reuses the workspace when it still exists, otherwise recreates it
    /// from the branch if the SCM host still has it. Archived sessions are
    /// re-activated.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if neither an active nor an archived
    /// record exists, `AppError::SessionNotRestorable` for other statuses,
    /// and `AppError::WorkspaceMissing` when there is nothing to restore from.
    pub async fn restore(&self, session_id: &str) -> Result<Session> {
        let span = info_span!("restore_session", session_id);
        self.restore_inner(session_id).instrument(span).await
    }

    async fn restore_inner(&self, session_id: &str) -> Result<Session> {
        let (project_id, raw, archived) = match self.locate(session_id)? {
            Some((project_id, raw)) => (project_id, raw, false),
            None => self
                .locate_archived(session_id)?
                .map(|(project_id, raw)| (project_id, raw, true))
                .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?,
        };
        let project = self.project(&project_id)?;
        let mut session = self.build(session_id, &project_id, raw);
        if !archived {
            self.enrich(&mut session).await;
        }

        if !session.status.is_restorable() {
            return Err(AppError::SessionNotRestorable {
                session_id: session_id.to_owned(),
                reason: format!(
                    "is {}; only killed, terminated, or errored sessions can be restored",
                    session.status
                ),
            });
        }

        let workspace = self.registry.workspace(self.workspace_name(project))?;
        let runtime = self.registry.runtime(self.runtime_name(project))?;
        let agent = self.agent_for(&session, project)?;

        let path = session.workspace_path.clone().unwrap_or_else(|| {
            self.config
                .worktree_root()
                .join(&project_id)
                .join(session_id)
        });
        if !workspace.exists(&path).await? {
            let branch_survives = match self.scm_for(project)? {
                Some(scm) => scm.branch_exists(&session.branch, project).await?,
                None => false,
            };
            if !branch_survives {
                return Err(AppError::WorkspaceMissing {
                    session_id: session_id.to_owned(),
                    path,
                });
            }
            workspace
                .restore(&WorkspaceRestoreSpec {
                    path: path.clone(),
                    repo_path: project.path.clone(),
                    branch: session.branch.clone(),
                })
                .await?;
        }

        if let Some(old) = &session.runtime_handle {
            if let Ok(old_runtime) = self.registry.runtime(&old.runtime_name) {
                if let Err(err) = old_runtime.destroy(old).await {
                    debug!(%err, "previous process already gone");
                }
            }
        }

        let launch = LaunchConfig {
            session_id: session_id.to_owned(),
            project_id: project_id.clone(),
            issue_id: session.issue_id.clone(),
            prompt: None,
            branch: session.branch.clone(),
            workspace_path: path.clone(),
        };
        let launch_command = match agent.restore_command(&session, project).await? {
            Some(command) => command,
            None => agent.launch_command(&launch),
        };
        let handle = runtime
            .create(&RuntimeCreateSpec {
                session_id: session_id.to_owned(),
                workspace_path: path.clone(),
                launch_command,
                environment: self.environment(agent.as_ref(), &launch),
            })
            .await?;

        let dir = self.config.sessions_dir(&project_id);
        if archived {
            metadata::write_metadata(&dir, session_id, &session.metadata)?;
        }
        let now = Utc::now().to_rfc3339();
        let record = metadata::update_metadata(
            &dir,
            session_id,
            [
                (keys::STATUS, SessionStatus::Working.as_str().to_owned()),
                (keys::WORKTREE, path.display().to_string()),
                (keys::RUNTIME_HANDLE, serde_json::to_string(&handle)?),
                (keys::RESTORED_AT, now.clone()),
                (keys::LAST_ACTIVITY_AT, now),
            ],
        )?;

        info!(archived, "session restored");
        let mut restored = self.build(session_id, &project_id, record);
        restored.activity = ActivityState::Active;
        Ok(restored)
    }

    /// Persist a new status for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sessions.
    pub fn update_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        self.update(session_id, [(keys::STATUS, status.as_str())])
    }

    /// Persist a PR reference for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sessions.
    pub fn attach_pr(&self, session_id: &str, pr: &PrInfo) -> Result<()> {
        self.update(session_id, [(keys::PR, pr.url.as_str())])
    }

    /// Merge the session's pull request through the project's SCM backend.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sessions, `AppError::Scm`
    /// when there is no PR or no SCM backend, or the backend's merge error.
    pub async fn merge_pr(&self, session_id: &str) -> Result<()> {
        let (project_id, raw) = self
            .locate(session_id)?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
        let project = self.project(&project_id)?;
        let session = self.build(session_id, &project_id, raw);

        let pr = session
            .pr
            .as_ref()
            .ok_or_else(|| AppError::Scm(format!("session {session_id} has no pull request")))?;
        let scm = self
            .scm_for(project)?
            .ok_or_else(|| AppError::Scm(format!("project {project_id} has no scm backend")))?;
        scm.merge_pr(pr).await?;
        info!(session_id, pr = pr.url, "pull request merged");
        Ok(())
    }

    /// Whether the session's runtime still supervises a live process.
    /// Records without a persisted handle are probed through the same
    /// fallback handle [`send`](Self::send) uses.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownProject` for an unconfigured project, the
    /// runtime's error, or `AppError::Timeout`.
    pub async fn runtime_alive(&self, session: &Session) -> Result<bool> {
        let project = self.project(&session.project_id)?;
        let handle = self.handle_for(session, project);
        let runtime = self.registry.runtime(&handle.runtime_name)?;
        bounded(
            self.config.action_timeout(),
            "runtime liveness probe",
            runtime.is_alive(&handle),
        )
        .await
    }

    /// Current agent activity.
    ///
    /// Asks the agent directly and falls back to classifying the runtime's
    /// recent output when the agent cannot answer.
    ///
    /// # Errors
    ///
    /// Returns an error when neither probe succeeds.
    pub async fn probe_activity(&self, session: &Session) -> Result<ActivityState> {
        let handle = session
            .runtime_handle
            .as_ref()
            .ok_or_else(|| AppError::Agent(format!("session {} has no runtime handle", session.id)))?;
        let project = self.project(&session.project_id)?;
        let agent = self.agent_for(session, project)?;
        let limit = self.config.action_timeout();

        match bounded(limit, "activity probe", agent.activity_state(handle)).await {
            Ok(state) => Ok(state),
            Err(err) => {
                debug!(session_id = session.id, %err, "reading terminal output instead");
                let runtime = self.registry.runtime(&handle.runtime_name)?;
                let output =
                    bounded(limit, "output read", runtime.get_output(handle, OUTPUT_LINES)).await?;
                agent.detect_activity(&output)
            }
        }
    }

    /// Whether the agent's own process is still running inside its runtime.
    ///
    /// # Errors
    ///
    /// Returns the agent's error, or `AppError::Timeout`.
    pub async fn agent_process_running(&self, session: &Session) -> Result<bool> {
        let Some(handle) = &session.runtime_handle else {
            return Ok(false);
        };
        let project = self.project(&session.project_id)?;
        let agent = self.agent_for(session, project)?;
        bounded(
            self.config.action_timeout(),
            "agent process probe",
            agent.is_process_running(handle),
        )
        .await
    }

    // ── internals ────────────────────────────────────────────────────────────

    /// The persisted runtime handle, or one named after the session under
    /// the project's runtime for records written without a handle.
    fn handle_for(&self, session: &Session, project: &ProjectConfig) -> RuntimeHandle {
        session
            .runtime_handle
            .clone()
            .unwrap_or_else(|| RuntimeHandle::new(&session.id, self.runtime_name(project)))
    }

    fn runtime_name<'a>(&'a self, project: &'a ProjectConfig) -> &'a str {
        project
            .runtime
            .as_deref()
            .unwrap_or(&self.config.defaults.runtime)
    }

    fn agent_name<'a>(&'a self, project: &'a ProjectConfig) -> &'a str {
        project.agent.as_deref().unwrap_or(&self.config.defaults.agent)
    }

    fn workspace_name<'a>(&'a self, project: &'a ProjectConfig) -> &'a str {
        project
            .workspace
            .as_deref()
            .unwrap_or(&self.config.defaults.workspace)
    }

    fn agent_for(&self, session: &Session, project: &ProjectConfig) -> Result<Arc<dyn Agent>> {
        let name = session
            .agent_override()
            .unwrap_or_else(|| self.agent_name(project));
        self.registry.agent(name)
    }

    fn tracker_for(&self, project: &ProjectConfig) -> Result<Option<Arc<dyn Tracker>>> {
        project
            .tracker
            .as_deref()
            .map(|name| self.registry.tracker(name))
            .transpose()
    }

    fn environment(&self, agent: &dyn Agent, launch: &LaunchConfig) -> HashMap<String, String> {
        let mut env = agent.environment(launch);
        env.insert(ENV_SESSION_ID.into(), launch.session_id.clone());
        env.insert(ENV_PROJECT_ID.into(), launch.project_id.clone());
        env.insert(
            ENV_DATA_DIR.into(),
            self.config.data_dir.display().to_string(),
        );
        if let Some(issue_id) = &launch.issue_id {
            env.insert(ENV_ISSUE_ID.into(), issue_id.clone());
        }
        env
    }

    fn build(&self, session_id: &str, project_id: &str, raw: Metadata) -> Session {
        let default_branch = self
            .config
            .projects
            .get(project_id)
            .map_or("main", |p| p.default_branch.as_str());
        Session::from_metadata(session_id, project_id, default_branch, raw)
    }

    fn project_ids<'a>(&'a self, filter: Option<&'a str>) -> Result<Vec<&'a str>> {
        match filter {
            Some(id) => {
                self.project(id)?;
                Ok(vec![id])
            }
            None => Ok(self.config.projects.keys().map(String::as_str).collect()),
        }
    }

    /// Persisted sessions without live signals.
    fn load(&self, project_id: Option<&str>) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();
        for project_id in self.project_ids(project_id)? {
            let dir = self.config.sessions_dir(project_id);
            for id in metadata::list_metadata(&dir)? {
                match metadata::read_metadata_raw(&dir, &id)? {
                    Some(raw) if !raw.is_empty() => {
                        sessions.push(self.build(&id, project_id, raw));
                    }
                    _ => debug!(session_id = id, "skipping empty metadata record"),
                }
            }
        }
        Ok(sessions)
    }

    fn locate(&self, session_id: &str) -> Result<Option<(String, Metadata)>> {
        if metadata::validate_session_id(session_id).is_err() {
            return Ok(None);
        }
        for project_id in self.config.projects.keys() {
            let dir = self.config.sessions_dir(project_id);
            if let Some(raw) = metadata::read_metadata_raw(&dir, session_id)? {
                if !raw.is_empty() {
                    return Ok(Some((project_id.clone(), raw)));
                }
            }
        }
        Ok(None)
    }

    fn locate_archived(&self, session_id: &str) -> Result<Option<(String, Metadata)>> {
        if metadata::validate_session_id(session_id).is_err() {
            return Ok(None);
        }
        for project_id in self.config.projects.keys() {
            let dir = self.config.sessions_dir(project_id);
            if let Some(raw) = metadata::read_archived_metadata_raw(&dir, session_id)? {
                return Ok(Some((project_id.clone(), raw)));
            }
        }
        Ok(None)
    }

    fn update<'a>(
        &self,
        session_id: &str,
        updates: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<()> {
        let (project_id, _) = self
            .locate(session_id)?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
        metadata::update_metadata(&self.config.sessions_dir(&project_id), session_id, updates)?;
        Ok(())
    }

    /// Apply live runtime and agent signals to a freshly loaded session.
    async fn enrich(&self, session: &mut Session) {
        match self.runtime_alive(session).await {
            Ok(false) => {
                if session.status != SessionStatus::Merged {
                    session.status = SessionStatus::Killed;
                }
                session.activity = ActivityState::Exited;
                return;
            }
            Ok(true) => {}
            Err(err) => warn!(session_id = session.id, %err, "runtime liveness probe failed"),
        }

        if session.runtime_handle.is_some() {
            session.activity = match self.probe_activity(session).await {
                Ok(activity) => activity,
                Err(err) => {
                    debug!(session_id = session.id, %err, "activity probe failed, assuming idle");
                    ActivityState::Idle
                }
            };
        }

        let Ok(project) = self.project(&session.project_id) else {
            return;
        };
        if let Ok(agent) = self.agent_for(session, project) {
            match bounded(
                self.config.action_timeout(),
                "agent introspection",
                agent.session_info(session),
            )
            .await
            {
                Ok(Some(info)) => session.agent_info = Some(info),
                Ok(None) => {}
                Err(err) => debug!(session_id = session.id, %err, "agent introspection failed"),
            }
        }
    }

    async fn cleanup_reason(&self, session: &Session) -> Result<Option<&'static str>> {
        if !self.runtime_alive(session).await? {
            return Ok(Some("runtime exited"));
        }

        let project = self.project(&session.project_id)?;
        let limit = self.config.action_timeout();

        if let (Some(pr), Some(scm)) = (&session.pr, self.scm_for(project)?) {
            let state = bounded(limit, "pr state", scm.pr_state(pr)).await?;
            if state == PrState::Merged {
                return Ok(Some("pull request merged"));
            }
        }

        if let (Some(issue_id), Some(tracker)) = (&session.issue_id, self.tracker_for(project)?) {
            if bounded(limit, "issue state", tracker.is_completed(issue_id, project)).await? {
                return Ok(Some("issue completed"));
            }
        }
        Ok(None)
    }
}

/// Claim the next free `<prefix>-<n>` id, scanning active and archived records.
fn allocate_session_id(dir: &Path, prefix: &str) -> Result<String> {
    let mut next = next_session_number(dir, prefix)?;
    for _ in 0..MAX_RESERVE_ATTEMPTS {
        let id = format!("{prefix}-{next}");
        if metadata::reserve_session_id(dir, &id)? {
            return Ok(id);
        }
        next += 1;
    }
    Err(AppError::Metadata(format!(
        "could not reserve a session id with prefix {prefix}"
    )))
}

/// One past the highest numeric suffix used under `prefix`.
///
/// # Errors
///
/// Returns `AppError::Io` if the metadata store cannot be read.
pub fn next_session_number(dir: &Path, prefix: &str) -> Result<u64> {
    let mut ids = metadata::list_metadata(dir)?;
    ids.extend(metadata::list_archived_ids(dir)?);
    let max = ids
        .iter()
        .filter_map(|id| id.strip_prefix(prefix)?.strip_prefix('-')?.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    Ok(max + 1)
}

fn release_reservation(dir: &Path, session_id: &str) {
    if let Err(err) = metadata::delete_metadata(dir, session_id, false) {
        warn!(session_id, %err, "failed to release reserved session id");
    }
}

async fn destroy_workspace(workspace: &dyn Workspace, path: &Path) {
    if let Err(err) = workspace.destroy(path).await {
        warn!(path = %path.display(), %err, "failed to remove workspace");
    }
}
