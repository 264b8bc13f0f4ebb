// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job-executor subprocess lifecycle.
//!
//! The supervisor launches the executor with the job's environment,
//! pipes stdout and stderr into the output buffer, and reaps the
//! process. `started` fires once the launch is confirmed, `done` fires
//! once the process is reaped (or the launch failed), and the wait
//! status is readable after `done`. `interrupt` sends the configured
//! stop signal; `terminate` sends an uncatchable kill.

use super::buffer::OutputBuffer;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to launch job executor: {0}")]
    Launch(#[from] std::io::Error),

    #[error("job executor was already started")]
    AlreadyStarted,
}

/// OS-level result of the executor process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitState {
    /// Exit code; `-1` when the process was signalled or never ran.
    pub status: i32,
    /// Name of the terminating signal, if there was one.
    pub signal: Option<String>,
}

/// Launches, signals, and reaps one executor subprocess.
pub struct Supervisor {
    buffer: Arc<OutputBuffer>,
    interrupt_signal: String,
    pid: Mutex<Option<i32>>,
    exit: Mutex<Option<ExitState>>,
    started: CancellationToken,
    done: CancellationToken,
}

impl Supervisor {
    pub fn new(buffer: Arc<OutputBuffer>, interrupt_signal: &str) -> Self {
        Self {
            buffer,
            interrupt_signal: interrupt_signal.to_string(),
            pid: Mutex::new(None),
            exit: Mutex::new(None),
            started: CancellationToken::new(),
            done: CancellationToken::new(),
        }
    }

    /// Launch `command` under `/bin/sh -c` with `env` overlaid on the
    /// agent's environment. A launch failure records exit status `-1`
    /// and fires `done` without ever firing `started`.
    pub async fn start(
        self: &Arc<Self>,
        command: &str,
        env: &HashMap<String, String>,
        cwd: &Path,
    ) -> Result<(), SupervisorError> {
        if self.started.is_cancelled() || self.done.is_cancelled() {
            return Err(SupervisorError::AlreadyStarted);
        }

        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(command)
            .envs(env)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so stop signals reach the executor's whole
        // tree and orphaned grandchildren cannot hold the output pipes
        // open past termination.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                *self.exit.lock() = Some(ExitState { status: -1, signal: None });
                self.done.cancel();
                return Err(SupervisorError::Launch(e));
            }
        };

        *self.pid.lock() = child.id().map(|p| p as i32);
        self.started.cancel();
        tracing::info!(pid = ?child.id(), "job executor started");

        let out_task = child.stdout.take().map(|r| tokio::spawn(drain_pipe(r, self.buffer.clone())));
        let err_task = child.stderr.take().map(|r| tokio::spawn(drain_pipe(r, self.buffer.clone())));

        let this = self.clone();
        tokio::spawn(async move {
            if let Some(task) = out_task {
                let _ = task.await;
            }
            if let Some(task) = err_task {
                let _ = task.await;
            }
            let state = match child.wait().await {
                Ok(status) => exit_state(status),
                Err(e) => {
                    tracing::error!(error = %e, "failed to reap job executor");
                    ExitState { status: -1, signal: None }
                }
            };
            tracing::info!(status = state.status, signal = ?state.signal, "job executor exited");
            *this.exit.lock() = Some(state);
            this.done.cancel();
        });

        Ok(())
    }

    /// Fires once the launch is confirmed.
    pub fn started(&self) -> CancellationToken {
        self.started.clone()
    }

    /// Fires once the process is reaped or the launch failed.
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    pub fn launched(&self) -> bool {
        self.started.is_cancelled()
    }

    /// Valid after `done` has fired.
    pub fn wait_status(&self) -> Option<ExitState> {
        self.exit.lock().clone()
    }

    /// Send the configured interrupt signal (default: SIGTERM).
    pub fn interrupt(&self) {
        let name = self.interrupt_signal.clone();
        self.send_signal(&name);
    }

    /// Send an uncatchable kill.
    pub fn terminate(&self) {
        self.send_signal("SIGKILL");
    }

    #[cfg(unix)]
    fn send_signal(&self, name: &str) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        use std::str::FromStr;

        let Some(pid) = *self.pid.lock() else {
            return;
        };
        let signal = Signal::from_str(name).unwrap_or(Signal::SIGTERM);
        tracing::debug!(pid, signal = %signal, "signalling job executor process group");
        if let Err(e) = kill(Pid::from_raw(-pid), signal) {
            tracing::debug!(pid, error = %e, "signal delivery failed");
        }
    }

    #[cfg(not(unix))]
    fn send_signal(&self, name: &str) {
        tracing::warn!(signal = name, "signal delivery is unsupported on this platform");
    }
}

/// Copy pipe output into the buffer until EOF or the buffer refuses the
/// write. Returning drops the reader, which closes our end of the pipe
/// and leaves the subprocess to take SIGPIPE on its next write.
async fn drain_pipe<R: tokio::io::AsyncRead + Unpin>(mut reader: R, buffer: Arc<OutputBuffer>) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if buffer.write(&chunk[..n]).is_err() {
                    break;
                }
            }
        }
    }
}

fn exit_state(status: std::process::ExitStatus) -> ExitState {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map(signal_name)
    };
    #[cfg(not(unix))]
    let signal = None;

    ExitState { status: status.code().unwrap_or(-1), signal }
}

#[cfg(unix)]
fn signal_name(signo: i32) -> String {
    nix::sys::signal::Signal::try_from(signo)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("SIG{signo}"))
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
