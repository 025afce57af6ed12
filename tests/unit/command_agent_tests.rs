//! Unit tests for the built-in `command` agent: launch command quoting
//! and output classification.

use std::path::PathBuf;

use agent_fleet::config::AgentCommandConfig;
use agent_fleet::models::session::{ActivityState, RuntimeHandle};
use agent_fleet::plugins::command_agent::{classify_output, CommandAgent};
use agent_fleet::plugins::{Agent, LaunchConfig};

fn agent(args: &[&str]) -> CommandAgent {
    CommandAgent::new(AgentCommandConfig {
        host_cli: "claude".into(),
        host_cli_args: args.iter().map(|a| (*a).to_owned()).collect(),
    })
}

fn launch(prompt: Option<&str>) -> LaunchConfig {
    LaunchConfig {
        session_id: "app-1".into(),
        project_id: "app".into(),
        issue_id: Some("INT-1".into()),
        prompt: prompt.map(str::to_owned),
        branch: "feat/INT-1".into(),
        workspace_path: PathBuf::from("/wt/app/app-1"),
    }
}

// ── launch command ────────────────────────────────────────────────────────────

#[test]
fn launch_command_appends_quoted_prompt() {
    let cmd = agent(&["--print"]).launch_command(&launch(Some("fix the build")));
    assert_eq!(cmd, "claude --print 'fix the build'");
}

#[test]
fn launch_command_escapes_single_quotes() {
    let cmd = agent(&[]).launch_command(&launch(Some("don't panic")));
    assert_eq!(cmd, r"claude 'don'\''t panic'");
}

#[test]
fn launch_command_without_prompt() {
    assert_eq!(agent(&["-c"]).launch_command(&launch(None)), "claude -c");
    assert_eq!(agent(&[]).launch_command(&launch(Some(""))), "claude");
}

#[test]
fn environment_exposes_workspace_root() {
    let env = agent(&[]).environment(&launch(None));
    assert_eq!(
        env.get("FLEET_WORKSPACE_ROOT").map(String::as_str),
        Some("/wt/app/app-1")
    );
}

// ── classification ────────────────────────────────────────────────────────────

#[test]
fn empty_output_is_idle() {
    assert_eq!(classify_output(""), ActivityState::Idle);
    assert_eq!(classify_output("\n   \n"), ActivityState::Idle);
}

#[test]
fn trailing_question_is_waiting_input() {
    assert_eq!(
        classify_output("edited src/lib.rs\nShould I also update the docs?"),
        ActivityState::WaitingInput
    );
    assert_eq!(
        classify_output("Apply this change? (y/n)"),
        ActivityState::WaitingInput
    );
}

#[test]
fn error_markers_in_tail_are_blocked() {
    assert_eq!(
        classify_output("running tool\nError: rate limit exceeded\nretrying later"),
        ActivityState::Blocked
    );
    assert_eq!(
        classify_output("fatal: not a git repository"),
        ActivityState::Blocked
    );
}

#[test]
fn old_errors_outside_tail_are_ignored() {
    let mut output = String::from("fatal: early hiccup\n");
    for n in 0..10 {
        output.push_str(&format!("step {n} done\n"));
    }
    assert_eq!(classify_output(&output), ActivityState::Active);
}

#[test]
fn ordinary_output_is_active() {
    assert_eq!(
        classify_output("Compiling agent-fleet\nRunning 12 tests"),
        ActivityState::Active
    );
}

#[test]
fn detect_activity_delegates_to_classifier() {
    let state = agent(&[])
        .detect_activity("Press Enter to continue")
        .expect("classified");
    assert_eq!(state, ActivityState::WaitingInput);
}

// ── process probes ────────────────────────────────────────────────────────────

#[tokio::test]
async fn handle_without_pid_counts_as_running() {
    let handle = RuntimeHandle::new("app-1", "process");
    let running = agent(&[])
        .is_process_running(&handle)
        .await
        .expect("probe");
    assert!(running);
}

#[cfg(unix)]
#[tokio::test]
async fn own_pid_is_running_and_probe_defers_to_output() {
    let handle = RuntimeHandle::new("app-1", "process").with_data("pid", std::process::id());
    let agent = agent(&[]);

    assert!(agent.is_process_running(&handle).await.expect("probe"));
    assert!(
        agent.activity_state(&handle).await.is_err(),
        "a live process has no native probe so callers fall back to output"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn vanished_pid_reports_exited() {
    let mut child = std::process::Command::new("true").spawn().expect("spawn");
    let pid = child.id();
    child.wait().expect("wait");
    let handle = RuntimeHandle::new("app-1", "process").with_data("pid", pid);
    let agent = agent(&[]);

    assert!(!agent.is_process_running(&handle).await.expect("probe"));
    assert_eq!(
        agent.activity_state(&handle).await.expect("probe"),
        ActivityState::Exited
    );
}
