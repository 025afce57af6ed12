//! Name-keyed plugin registry.
//!
//! One map per slot. Registering under an existing name replaces the
//! previous backend, which is how tests swap built-ins for mocks.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::command_agent::CommandAgent;
use super::log_notifier::LogNotifier;
use super::process_runtime::ProcessRuntime;
use super::webhook_notifier::WebhookNotifier;
use super::worktree::WorktreeWorkspace;
use super::{Agent, Notifier, PluginSlot, Runtime, Scm, Tracker, Workspace};
use crate::config::OrchestratorConfig;
use crate::{AppError, Result};

/// Plugin backends available to the orchestrator.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    runtimes: HashMap<String, Arc<dyn Runtime>>,
    agents: HashMap<String, Arc<dyn Agent>>,
    workspaces: HashMap<String, Arc<dyn Workspace>>,
    trackers: HashMap<String, Arc<dyn Tracker>>,
    scms: HashMap<String, Arc<dyn Scm>>,
    notifiers: HashMap<String, Arc<dyn Notifier>>,
}

impl PluginRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in backends.
    ///
    /// The `command` agent is only registered when `[agent_command]` is
    /// configured, the `webhook` notifier only when `[webhook]` is.
    #[must_use]
    pub fn with_builtins(config: &OrchestratorConfig) -> Self {
        let mut registry = Self::new();
        registry.register_runtime(Arc::new(ProcessRuntime::new()));
        registry.register_workspace(Arc::new(WorktreeWorkspace::new(config.worktree_root())));
        registry.register_notifier(Arc::new(LogNotifier));

        if let Some(agent) = &config.agent_command {
            registry.register_agent(Arc::new(CommandAgent::new(agent.clone())));
        }

        if let Some(webhook) = &config.webhook {
            match WebhookNotifier::new(webhook.url.clone(), config.action_timeout()) {
                Ok(notifier) => registry.register_notifier(Arc::new(notifier)),
                Err(err) => warn!(%err, "webhook notifier disabled"),
            }
        }

        registry
    }

    /// Register a runtime under its own name.
    pub fn register_runtime(&mut self, runtime: Arc<dyn Runtime>) {
        debug!(slot = %PluginSlot::Runtime, name = runtime.name(), "plugin registered");
        self.runtimes.insert(runtime.name().to_owned(), runtime);
    }

    /// Register an agent under its own name.
    pub fn register_agent(&mut self, agent: Arc<dyn Agent>) {
        debug!(slot = %PluginSlot::Agent, name = agent.name(), "plugin registered");
        self.agents.insert(agent.name().to_owned(), agent);
    }

    /// Register a workspace backend under its own name.
    pub fn register_workspace(&mut self, workspace: Arc<dyn Workspace>) {
        debug!(slot = %PluginSlot::Workspace, name = workspace.name(), "plugin registered");
        self.workspaces.insert(workspace.name().to_owned(), workspace);
    }

    /// Register a tracker under its own name.
    pub fn register_tracker(&mut self, tracker: Arc<dyn Tracker>) {
        debug!(slot = %PluginSlot::Tracker, name = tracker.name(), "plugin registered");
        self.trackers.insert(tracker.name().to_owned(), tracker);
    }

    /// Register an SCM backend under its own name.
    pub fn register_scm(&mut self, scm: Arc<dyn Scm>) {
        debug!(slot = %PluginSlot::Scm, name = scm.name(), "plugin registered");
        self.scms.insert(scm.name().to_owned(), scm);
    }

    /// Register a notifier under its own name.
    pub fn register_notifier(&mut self, notifier: Arc<dyn Notifier>) {
        debug!(slot = %PluginSlot::Notifier, name = notifier.name(), "plugin registered");
        self.notifiers.insert(notifier.name().to_owned(), notifier);
    }

    /// Look up a runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PluginNotFound` if nothing is registered under `name`.
    pub fn runtime(&self, name: &str) -> Result<Arc<dyn Runtime>> {
        lookup(&self.runtimes, PluginSlot::Runtime, name)
    }

    /// Look up an agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PluginNotFound` if nothing is registered under `name`.
    pub fn agent(&self, name: &str) -> Result<Arc<dyn Agent>> {
        lookup(&self.agents, PluginSlot::Agent, name)
    }

    /// Look up a workspace backend.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PluginNotFound` if nothing is registered under `name`.
    pub fn workspace(&self, name: &str) -> Result<Arc<dyn Workspace>> {
        lookup(&self.workspaces, PluginSlot::Workspace, name)
    }

    /// Look up a tracker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PluginNotFound` if nothing is registered under `name`.
    pub fn tracker(&self, name: &str) -> Result<Arc<dyn Tracker>> {
        lookup(&self.trackers, PluginSlot::Tracker, name)
    }

    /// Look up an SCM backend.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PluginNotFound` if nothing is registered under `name`.
    pub fn scm(&self, name: &str) -> Result<Arc<dyn Scm>> {
        lookup(&self.scms, PluginSlot::Scm, name)
    }

    /// Look up a notifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PluginNotFound` if nothing is registered under `name`.
    pub fn notifier(&self, name: &str) -> Result<Arc<dyn Notifier>> {
        lookup(&self.notifiers, PluginSlot::Notifier, name)
    }

    /// Registered names for a slot, sorted.
    #[must_use]
    pub fn names(&self, slot: PluginSlot) -> Vec<String> {
        let mut names: Vec<String> = match slot {
            PluginSlot::Runtime => self.runtimes.keys().cloned().collect(),
            PluginSlot::Agent => self.agents.keys().cloned().collect(),
            PluginSlot::Workspace => self.workspaces.keys().cloned().collect(),
            PluginSlot::Tracker => self.trackers.keys().cloned().collect(),
            PluginSlot::Scm => self.scms.keys().cloned().collect(),
            PluginSlot::Notifier => self.notifiers.keys().cloned().collect(),
        };
        names.sort();
        names
    }
}

fn lookup<T: ?Sized>(
    map: &HashMap<String, Arc<T>>,
    slot: PluginSlot,
    name: &str,
) -> Result<Arc<T>> {
    map.get(name)
        .cloned()
        .ok_or_else(|| AppError::PluginNotFound {
            slot,
            name: name.to_owned(),
        })
}
