//! Unit tests for the plugin registry and its built-in backends.

use std::path::PathBuf;

use agent_fleet::config::{AgentCommandConfig, OrchestratorConfig, WebhookConfig};
use agent_fleet::plugins::{Agent, PluginRegistry, PluginSlot};
use agent_fleet::AppError;

#[test]
fn empty_registry_reports_missing_plugin() {
    let registry = PluginRegistry::new();

    let err = registry.runtime("process").err().expect("missing runtime");

    assert!(matches!(
        err,
        AppError::PluginNotFound { slot: PluginSlot::Runtime, ref name } if name == "process"
    ));
}

#[test]
fn builtins_without_optional_sections() {
    let config = OrchestratorConfig::new(PathBuf::from("/tmp/fleet"));
    let registry = PluginRegistry::with_builtins(&config);

    assert_eq!(registry.names(PluginSlot::Runtime), ["process"]);
    assert_eq!(registry.names(PluginSlot::Workspace), ["worktree"]);
    assert_eq!(registry.names(PluginSlot::Notifier), ["log"]);
    assert!(registry.names(PluginSlot::Agent).is_empty());
    assert!(registry.agent("command").is_err());
}

#[test]
fn command_agent_registered_when_configured() {
    let mut config = OrchestratorConfig::new(PathBuf::from("/tmp/fleet"));
    config.agent_command = Some(AgentCommandConfig {
        host_cli: "claude".into(),
        host_cli_args: vec![],
    });

    let registry = PluginRegistry::with_builtins(&config);

    let agent = registry.agent("command").expect("command agent");
    assert_eq!(agent.name(), "command");
}

#[test]
fn webhook_notifier_registered_when_configured() {
    let mut config = OrchestratorConfig::new(PathBuf::from("/tmp/fleet"));
    config.webhook = Some(WebhookConfig {
        url: "http://127.0.0.1:9/hook".into(),
    });

    let registry = PluginRegistry::with_builtins(&config);

    assert_eq!(registry.names(PluginSlot::Notifier), ["log", "webhook"]);
}

#[test]
fn tracker_and_scm_slots_start_empty() {
    let config = OrchestratorConfig::new(PathBuf::from("/tmp/fleet"));
    let registry = PluginRegistry::with_builtins(&config);

    let err = registry.scm("github").err().expect("no scm");
    assert_eq!(err.to_string(), "plugin: scm plugin 'github' not found");
    assert!(registry.tracker("linear").is_err());
}

#[test]
fn slot_display_is_lowercase() {
    assert_eq!(PluginSlot::Notifier.to_string(), "notifier");
    assert_eq!(PluginSlot::Scm.to_string(), "scm");
}
