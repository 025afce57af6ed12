//! Built-in `command` agent: any host CLI that takes the prompt as its
//! last argument.
//!
//! The agent has no native introspection. Activity is classified from the
//! tail of its terminal output, and process liveness from the pid recorded
//! in the runtime handle.

use std::collections::HashMap;

use tracing::debug;

use super::{Agent, LaunchConfig, PluginFuture};
use crate::config::AgentCommandConfig;
use crate::models::session::{ActivityState, RuntimeHandle};
use crate::{AppError, Result};

/// Registry name.
pub const NAME: &str = "command";

/// Lines inspected when classifying output.
const TAIL_LINES: usize = 5;

const INPUT_MARKERS: [&str; 6] = [
    "(y/n)",
    "[y/n]",
    "press enter",
    "waiting for input",
    "do you want to",
    "approve?",
];

const BLOCKED_MARKERS: [&str; 5] = [
    "fatal:",
    "panicked at",
    "rate limit",
    "permission denied",
    "unrecoverable error",
];

/// Host-CLI agent adapter.
pub struct CommandAgent {
    config: AgentCommandConfig,
}

impl CommandAgent {
    /// Adapter launching `config.host_cli`.
    #[must_use]
    pub fn new(config: AgentCommandConfig) -> Self {
        Self { config }
    }
}

impl Agent for CommandAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn launch_command(&self, config: &LaunchConfig) -> String {
        let mut parts = Vec::with_capacity(self.config.host_cli_args.len() + 2);
        parts.push(shell_quote(&self.config.host_cli));
        parts.extend(self.config.host_cli_args.iter().map(|arg| shell_quote(arg)));
        if let Some(prompt) = config.prompt.as_deref().filter(|p| !p.is_empty()) {
            parts.push(shell_quote(prompt));
        }
        parts.join(" ")
    }

    fn environment(&self, config: &LaunchConfig) -> HashMap<String, String> {
        HashMap::from([(
            "FLEET_WORKSPACE_ROOT".to_owned(),
            config.workspace_path.display().to_string(),
        )])
    }

    fn detect_activity(&self, output: &str) -> Result<ActivityState> {
        Ok(classify_output(output))
    }

    fn activity_state<'a>(&'a self, handle: &'a RuntimeHandle) -> PluginFuture<'a, ActivityState> {
        Box::pin(async move {
            if pid_running(handle) {
                Err(AppError::Agent(
                    "command agent has no native activity probe".into(),
                ))
            } else {
                Ok(ActivityState::Exited)
            }
        })
    }

    fn is_process_running<'a>(&'a self, handle: &'a RuntimeHandle) -> PluginFuture<'a, bool> {
        Box::pin(async move { Ok(pid_running(handle)) })
    }
}

/// Classify the tail of an agent's terminal output.
#[must_use]
pub fn classify_output(output: &str) -> ActivityState {
    let tail: Vec<String> = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .rev()
        .take(TAIL_LINES)
        .map(str::to_lowercase)
        .collect();

    let Some(last) = tail.first() else {
        return ActivityState::Idle;
    };

    if last.ends_with('?') || INPUT_MARKERS.iter().any(|m| last.contains(m)) {
        return ActivityState::WaitingInput;
    }
    if tail
        .iter()
        .any(|line| BLOCKED_MARKERS.iter().any(|m| line.contains(m)))
    {
        return ActivityState::Blocked;
    }
    ActivityState::Active
}

fn pid_running(handle: &RuntimeHandle) -> bool {
    let Some(pid) = handle.data.get("pid").and_then(serde_json::Value::as_u64) else {
        debug!(handle = handle.id, "no pid recorded, assuming running");
        return true;
    };
    is_process_running(pid)
}

#[cfg(unix)]
fn is_process_running(pid: u64) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u64) -> bool {
    true
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+".contains(c));
    if safe {
        arg.to_owned()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
