//! Orchestrator configuration parsing, defaults, and validation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::models::event::EventPriority;
use crate::models::reaction::{parse_duration, EscalateAfter, ReactionAction, ReactionConfig};
use crate::{AppError, Result};

/// Environment variable that overrides [`OrchestratorConfig::data_dir`].
pub const DATA_DIR_ENV: &str = "AGENT_FLEET_DATA_DIR";

/// Plugin names used when a project does not pick its own.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DefaultPlugins {
    /// Runtime plugin name.
    #[serde(default = "default_runtime")]
    pub runtime: String,
    /// Agent plugin name.
    #[serde(default = "default_agent")]
    pub agent: String,
    /// Workspace plugin name.
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// Notifiers used for priorities without an explicit route.
    #[serde(default = "default_notifiers")]
    pub notifiers: Vec<String>,
}

impl Default for DefaultPlugins {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            agent: default_agent(),
            workspace: default_workspace(),
            notifiers: default_notifiers(),
        }
    }
}

fn default_runtime() -> String {
    "process".into()
}

fn default_agent() -> String {
    "command".into()
}

fn default_workspace() -> String {
    "worktree".into()
}

fn default_notifiers() -> Vec<String> {
    vec!["log".into()]
}

/// Per-project settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProjectConfig {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Repository slug on the source-control host (`owner/repo`).
    #[serde(default)]
    pub repo: String,
    /// Local checkout the workspaces are created from.
    pub path: PathBuf,
    /// Branch new sessions start from.
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// Session id prefix; defaults to the project id.
    #[serde(default)]
    pub session_prefix: String,
    /// Runtime plugin override.
    pub runtime: Option<String>,
    /// Agent plugin override.
    pub agent: Option<String>,
    /// Workspace plugin override.
    pub workspace: Option<String>,
    /// Issue tracker plugin, if the project uses one.
    pub tracker: Option<String>,
    /// Source-control host plugin, if the project uses one.
    pub scm: Option<String>,
    /// Reaction overrides for this project.
    #[serde(default)]
    pub reactions: HashMap<String, ReactionConfig>,
}

fn default_branch() -> String {
    "main".into()
}

impl ProjectConfig {
    /// Minimal project rooted at `path`, used when building configs in code.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            name: String::new(),
            repo: String::new(),
            path: path.into(),
            default_branch: default_branch(),
            session_prefix: String::new(),
            runtime: None,
            agent: None,
            workspace: None,
            tracker: None,
            scm: None,
            reactions: HashMap::new(),
        }
    }
}

/// Notifier names per priority tier. A missing tier falls back to
/// [`DefaultPlugins::notifiers`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct NotificationRouting {
    /// Notifiers for urgent events.
    pub urgent: Option<Vec<String>>,
    /// Notifiers for action events.
    pub action: Option<Vec<String>>,
    /// Notifiers for warnings.
    pub warning: Option<Vec<String>>,
    /// Notifiers for informational events (never dispatched).
    pub info: Option<Vec<String>>,
}

impl NotificationRouting {
    /// Routed notifiers for a tier, if the tier is configured.
    #[must_use]
    pub fn tier(&self, priority: EventPriority) -> Option<&Vec<String>> {
        match priority {
            EventPriority::Urgent => self.urgent.as_ref(),
            EventPriority::Action => self.action.as_ref(),
            EventPriority::Warning => self.warning.as_ref(),
            EventPriority::Info => self.info.as_ref(),
        }
    }
}

/// Settings for the built-in `command` agent.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentCommandConfig {
    /// Host CLI binary (e.g., `claude`, `codex`).
    pub host_cli: String,
    /// Arguments placed before the prompt.
    #[serde(default)]
    pub host_cli_args: Vec<String>,
}

/// Settings for the built-in `webhook` notifier.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WebhookConfig {
    /// Endpoint receiving a JSON `POST` per event.
    pub url: String,
}

/// Global configuration parsed from `agent-fleet.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    /// Root for session metadata and event logs.
    pub data_dir: PathBuf,
    /// Root for session worktrees; defaults to `<data_dir>/worktrees`.
    pub worktree_dir: Option<PathBuf>,
    /// Seconds between lifecycle polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Upper bound for a single notifier call, reaction action, or backend probe.
    #[serde(default = "default_action_timeout")]
    pub action_timeout_seconds: u64,
    /// Default plugin names.
    #[serde(default)]
    pub defaults: DefaultPlugins,
    /// Notifier names per priority tier.
    #[serde(default)]
    pub notification_routing: NotificationRouting,
    /// Global reaction configuration keyed by reaction key.
    #[serde(default)]
    pub reactions: HashMap<String, ReactionConfig>,
    /// Projects keyed by project id.
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectConfig>,
    /// Built-in command agent settings.
    pub agent_command: Option<AgentCommandConfig>,
    /// Built-in webhook notifier settings.
    pub webhook: Option<WebhookConfig>,
}

fn default_poll_interval() -> u64 {
    30
}

fn default_action_timeout() -> u64 {
    30
}

impl OrchestratorConfig {
    /// Empty configuration rooted at `data_dir`, without default reactions.
    ///
    /// Intended for embedding and tests; files go through
    /// [`from_toml_str`](Self::from_toml_str).
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            worktree_dir: None,
            poll_interval_seconds: default_poll_interval(),
            action_timeout_seconds: default_action_timeout(),
            defaults: DefaultPlugins::default(),
            notification_routing: NotificationRouting::default(),
            reactions: HashMap::new(),
            projects: BTreeMap::new(),
            agent_command: None,
            webhook: None,
        }
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string, apply default reactions, and validate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.apply_default_reactions();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides (`AGENT_FLEET_DATA_DIR`).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = env::var(DATA_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
    }

    /// Root directory for session worktrees.
    #[must_use]
    pub fn worktree_root(&self) -> PathBuf {
        self.worktree_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("worktrees"))
    }

    /// Directory holding the metadata records of one project.
    #[must_use]
    pub fn sessions_dir(&self, project_id: &str) -> PathBuf {
        self.data_dir.join(project_id).join("sessions")
    }

    /// Directory holding the JSONL event log.
    #[must_use]
    pub fn events_dir(&self) -> PathBuf {
        self.data_dir.join("events")
    }

    /// Poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Bound applied to notifier calls, reaction actions, and probes.
    #[must_use]
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_seconds)
    }

    /// Effective session id prefix for a project.
    #[must_use]
    pub fn session_prefix<'a>(&'a self, project_id: &'a str) -> &'a str {
        match self.projects.get(project_id) {
            Some(project) if !project.session_prefix.is_empty() => &project.session_prefix,
            _ => project_id,
        }
    }

    /// Reaction for `key` as seen by `project_id`: the project entry merged
    /// field by field over the global entry.
    #[must_use]
    pub fn reaction_for(&self, project_id: &str, key: &str) -> Option<ReactionConfig> {
        let global = self.reactions.get(key);
        let project = self
            .projects
            .get(project_id)
            .and_then(|p| p.reactions.get(key));
        match (project, global) {
            (Some(project), Some(global)) => Some(project.merged_over(global)),
            (Some(project), None) => Some(project.clone()),
            (None, Some(global)) => Some(global.clone()),
            (None, None) => None,
        }
    }

    /// Notifier names routed for a priority, falling back to the defaults.
    #[must_use]
    pub fn notifiers_for(&self, priority: EventPriority) -> &[String] {
        self.notification_routing
            .tier(priority)
            .map_or(self.defaults.notifiers.as_slice(), Vec::as_slice)
    }

    fn apply_default_reactions(&mut self) {
        for (key, defaults) in default_reactions() {
            let merged = match self.reactions.get(key) {
                Some(user) => user.merged_over(&defaults),
                None => defaults,
            };
            self.reactions.insert(key.to_owned(), merged);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_seconds == 0 {
            return Err(AppError::Config(
                "poll_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.action_timeout_seconds == 0 {
            return Err(AppError::Config(
                "action_timeout_seconds must be greater than zero".into(),
            ));
        }

        let mut prefixes = HashSet::new();
        for (id, project) in &self.projects {
            if project.path.as_os_str().is_empty() {
                return Err(AppError::Config(format!("project {id}: path must not be empty")));
            }
            let prefix = self.session_prefix(id);
            if !prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(AppError::Config(format!(
                    "project {id}: session prefix '{prefix}' may only contain letters, digits, '-' and '_'"
                )));
            }
            if !prefixes.insert(prefix.to_owned()) {
                return Err(AppError::Config(format!(
                    "project {id}: session prefix '{prefix}' is used by another project"
                )));
            }
        }

        let project_reactions = self.projects.values().flat_map(|p| p.reactions.iter());
        for (key, reaction) in self.reactions.iter().chain(project_reactions) {
            if let Some(EscalateAfter::Duration(raw)) = &reaction.escalate_after {
                if parse_duration(raw).is_zero() {
                    warn!(
                        reaction_key = key.as_str(),
                        escalate_after = raw.as_str(),
                        "unparseable escalate_after duration; time-based escalation disabled"
                    );
                }
            }
        }

        Ok(())
    }
}

/// Reactions every configuration starts from.
fn default_reactions() -> Vec<(&'static str, ReactionConfig)> {
    vec![
        (
            "ci-failed",
            ReactionConfig {
                auto: Some(true),
                action: Some(ReactionAction::SendToAgent),
                message: Some(
                    "CI is failing on your PR. Inspect the failing checks, fix the cause, and push."
                        .into(),
                ),
                retries: Some(2),
                escalate_after: Some(EscalateAfter::Attempts(2)),
                priority: None,
            },
        ),
        (
            "changes-requested",
            ReactionConfig {
                auto: Some(true),
                action: Some(ReactionAction::SendToAgent),
                message: Some(
                    "A reviewer requested changes on your PR. Address every comment and push."
                        .into(),
                ),
                retries: None,
                escalate_after: Some(EscalateAfter::Duration("30m".into())),
                priority: None,
            },
        ),
        (
            "merge-conflicts",
            ReactionConfig {
                auto: Some(true),
                action: Some(ReactionAction::SendToAgent),
                message: Some(
                    "Your branch has merge conflicts. Rebase on the base branch and resolve them."
                        .into(),
                ),
                retries: None,
                escalate_after: Some(EscalateAfter::Duration("15m".into())),
                priority: None,
            },
        ),
        (
            "approved-and-green",
            ReactionConfig {
                auto: Some(false),
                action: Some(ReactionAction::Notify),
                priority: Some(EventPriority::Action),
                ..ReactionConfig::default()
            },
        ),
        (
            "agent-stuck",
            ReactionConfig {
                auto: Some(true),
                action: Some(ReactionAction::Notify),
                priority: Some(EventPriority::Urgent),
                ..ReactionConfig::default()
            },
        ),
        (
            "agent-needs-input",
            ReactionConfig {
                auto: Some(true),
                action: Some(ReactionAction::Notify),
                priority: Some(EventPriority::Urgent),
                ..ReactionConfig::default()
            },
        ),
        (
            "agent-exited",
            ReactionConfig {
                auto: Some(true),
                action: Some(ReactionAction::Notify),
                priority: Some(EventPriority::Urgent),
                ..ReactionConfig::default()
            },
        ),
        (
            "all-complete",
            ReactionConfig {
                auto: Some(true),
                action: Some(ReactionAction::Notify),
                priority: Some(EventPriority::Action),
                ..ReactionConfig::default()
            },
        ),
    ]
}
