//! Built-in `process` runtime: agents run as local child processes.
//!
//! Each session gets its own child with `kill_on_drop(true)`. Output from
//! stdout and stderr is captured into a bounded line buffer, and messages
//! are delivered by writing a line to the child's stdin. Handles do not
//! survive an orchestrator restart; a handle whose process is unknown
//! reports as not alive.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{PluginFuture, Runtime, RuntimeCreateSpec};
use crate::models::session::RuntimeHandle;
use crate::{AppError, Result};

/// Registry name.
pub const NAME: &str = "process";

/// Lines of output retained per process.
const OUTPUT_CAPACITY: usize = 2000;

/// How long a process gets to exit after `SIGTERM` before it is killed.
const STOP_GRACE: Duration = Duration::from_secs(5);

type OutputBuffer = Arc<std::sync::Mutex<VecDeque<String>>>;

struct Supervised {
    child: Child,
    stdin: Option<ChildStdin>,
    output: OutputBuffer,
}

/// Local child-process runtime.
#[derive(Default)]
pub struct ProcessRuntime {
    processes: Mutex<HashMap<String, Supervised>>,
}

impl ProcessRuntime {
    /// Runtime with no supervised processes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn spawn(&self, spec: &RuntimeCreateSpec) -> Result<RuntimeHandle> {
        let mut processes = self.processes.lock().await;
        if let Some(existing) = processes.get_mut(&spec.session_id) {
            if matches!(existing.child.try_wait(), Ok(None)) {
                return Err(AppError::Runtime(format!(
                    "session {} already has a running process",
                    spec.session_id
                )));
            }
        }

        let mut cmd = shell_command(&spec.launch_command);
        cmd.envs(&spec.environment)
            .current_dir(&spec.workspace_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Runtime(format!("failed to spawn agent process: {err}")))?;

        let output: OutputBuffer = Arc::new(std::sync::Mutex::new(VecDeque::new()));
        if let Some(stdout) = child.stdout.take() {
            capture(stdout, Arc::clone(&output), &spec.session_id);
        }
        if let Some(stderr) = child.stderr.take() {
            capture(stderr, Arc::clone(&output), &spec.session_id);
        }

        let pid = child.id();
        info!(
            session_id = spec.session_id,
            pid = pid.unwrap_or(0),
            "agent process spawned"
        );

        let mut handle = RuntimeHandle::new(&spec.session_id, NAME);
        if let Some(pid) = pid {
            handle = handle.with_data("pid", pid);
        }

        processes.insert(
            spec.session_id.clone(),
            Supervised {
                stdin: child.stdin.take(),
                child,
                output,
            },
        );
        Ok(handle)
    }

    async fn stop(&self, handle: &RuntimeHandle) -> Result<()> {
        let Some(mut process) = self.processes.lock().await.remove(&handle.id) else {
            return Err(AppError::Runtime(format!(
                "no supervised process for {}",
                handle.id
            )));
        };

        drop(process.stdin.take());
        terminate(&process.child);

        match tokio::time::timeout(STOP_GRACE, process.child.wait()).await {
            Ok(Ok(exit)) => info!(session_id = handle.id, ?exit, "agent process exited"),
            Ok(Err(err)) => warn!(session_id = handle.id, %err, "error waiting for agent process"),
            Err(_) => {
                warn!(
                    session_id = handle.id,
                    "agent process did not exit within grace period, forcing kill"
                );
                process
                    .child
                    .kill()
                    .await
                    .map_err(|err| AppError::Runtime(format!("failed to kill process: {err}")))?;
            }
        }
        Ok(())
    }

    async fn write_line(&self, handle: &RuntimeHandle, message: &str) -> Result<()> {
        let mut processes = self.processes.lock().await;
        let stdin = processes
            .get_mut(&handle.id)
            .and_then(|p| p.stdin.as_mut())
            .ok_or_else(|| AppError::Runtime(format!("no input channel for {}", handle.id)))?;

        stdin
            .write_all(format!("{message}\n").as_bytes())
            .await
            .map_err(|err| AppError::Runtime(format!("failed to write to agent: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| AppError::Runtime(format!("failed to flush agent input: {err}")))?;
        debug!(session_id = handle.id, bytes = message.len(), "message delivered");
        Ok(())
    }

    async fn tail(&self, handle: &RuntimeHandle, lines: usize) -> Result<String> {
        let processes = self.processes.lock().await;
        let process = processes
            .get(&handle.id)
            .ok_or_else(|| AppError::Runtime(format!("no supervised process for {}", handle.id)))?;
        let buffer = process
            .output
            .lock()
            .map_err(|_| AppError::Runtime("output buffer poisoned".into()))?;

        let skip = buffer.len().saturating_sub(lines);
        Ok(buffer
            .iter()
            .skip(skip)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn alive(&self, handle: &RuntimeHandle) -> Result<bool> {
        let mut processes = self.processes.lock().await;
        let Some(process) = processes.get_mut(&handle.id) else {
            return Ok(false);
        };
        match process.child.try_wait() {
            Ok(None) => Ok(true),
            Ok(Some(_)) => Ok(false),
            Err(err) => Err(AppError::Runtime(format!(
                "failed to poll agent process: {err}"
            ))),
        }
    }
}

impl Runtime for ProcessRuntime {
    fn name(&self) -> &str {
        NAME
    }

    fn create<'a>(&'a self, spec: &'a RuntimeCreateSpec) -> PluginFuture<'a, RuntimeHandle> {
        Box::pin(self.spawn(spec))
    }

    fn destroy<'a>(&'a self, handle: &'a RuntimeHandle) -> PluginFuture<'a, ()> {
        Box::pin(self.stop(handle))
    }

    fn send_message<'a>(
        &'a self,
        handle: &'a RuntimeHandle,
        message: &'a str,
    ) -> PluginFuture<'a, ()> {
        Box::pin(self.write_line(handle, message))
    }

    fn get_output<'a>(
        &'a self,
        handle: &'a RuntimeHandle,
        lines: usize,
    ) -> PluginFuture<'a, String> {
        Box::pin(self.tail(handle, lines))
    }

    fn is_alive<'a>(&'a self, handle: &'a RuntimeHandle) -> PluginFuture<'a, bool> {
        Box::pin(self.alive(handle))
    }
}

#[cfg(unix)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

#[cfg(not(unix))]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(line);
    cmd
}

/// Ask the process to exit. Falls through to the forced kill on timeout.
#[cfg(unix)]
fn terminate(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(pid, %err, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn terminate(_child: &Child) {}

fn capture<R>(stream: R, output: OutputBuffer, session_id: &str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let span = info_span!("capture", session_id);
    tokio::spawn(
        async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Ok(mut buffer) = output.lock() {
                            if buffer.len() == OUTPUT_CAPACITY {
                                buffer.pop_front();
                            }
                            buffer.push_back(line);
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        debug!(%err, "output stream closed with error");
                        break;
                    }
                }
            }
        }
        .instrument(span),
    );
}
