//! Transcoder process supervision
//!
//! One task per running process. It owns the `Child` and ends in exactly
//! one of two ways:
//!
//! - the process exits on its own -> exit reason published and a
//!   [`PipelineEvent::Exited`] emitted; consumers match it on session id
//! - a stop is requested (or the stop sender is dropped) -> SIGTERM,
//!   bounded wait, SIGKILL

use super::PipelineEvent;
use parking_lot::Mutex;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use uuid::Uuid;

pub(super) struct Supervisor {
    pub camera_id: String,
    pub session_id: Uuid,
    pub stop_timeout: Duration,
    pub events: mpsc::UnboundedSender<PipelineEvent>,
    pub exited: watch::Sender<Option<String>>,
    pub last_stderr: Arc<Mutex<Option<String>>>,
}

impl Supervisor {
    pub async fn run(self, mut child: Child, stop_rx: oneshot::Receiver<()>) {
        tokio::select! {
            status = child.wait() => {
                let reason = self.describe_exit(status);
                tracing::warn!(
                    camera_id = %self.camera_id,
                    session_id = %self.session_id,
                    reason = %reason,
                    "Transcoder exited unexpectedly"
                );
                let _ = self.exited.send(Some(reason.clone()));
                let _ = self.events.send(PipelineEvent::Exited {
                    camera_id: self.camera_id.clone(),
                    session_id: self.session_id,
                    reason,
                });
            }
            _ = stop_rx => {
                terminate(&mut child, self.stop_timeout, &self.camera_id).await;
                let _ = self.exited.send(Some("stopped".to_string()));
            }
        }
    }

    fn describe_exit(&self, status: std::io::Result<ExitStatus>) -> String {
        let base = match status {
            Ok(status) => match status.code() {
                Some(code) => format!("exit code {}", code),
                None => "terminated by signal".to_string(),
            },
            Err(e) => format!("wait failed: {}", e),
        };
        match self.last_stderr.lock().as_deref() {
            Some(line) => format!("{} ({})", base, line),
            None => base,
        }
    }
}

/// Graceful termination: SIGTERM, wait up to `grace`, then SIGKILL
pub(super) async fn terminate(child: &mut Child, grace: Duration, camera_id: &str) {
    let Some(pid) = child.id() else {
        // Already reaped
        let _ = child.wait().await;
        return;
    };

    send_terminate(child, pid);

    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::info!(
                camera_id = %camera_id,
                pid = pid,
                status = %status,
                "Transcoder stopped"
            );
        }
        Ok(Err(e)) => {
            tracing::warn!(camera_id = %camera_id, pid = pid, error = %e, "Transcoder wait failed");
        }
        Err(_) => {
            tracing::warn!(
                camera_id = %camera_id,
                pid = pid,
                grace_ms = grace.as_millis() as u64,
                "Transcoder ignored SIGTERM, killing"
            );
            if let Err(e) = child.kill().await {
                tracing::error!(camera_id = %camera_id, pid = pid, error = %e, "Failed to kill transcoder");
            }
        }
    }
}

#[cfg(unix)]
fn send_terminate(_child: &mut Child, pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        tracing::debug!(pid = pid, error = %e, "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, _pid: u32) {
    let _ = child.start_kill();
}

/// Forward transcoder stderr to tracing, remembering the last line.
/// Every occurrence of a `secrets` entry is masked before logging.
pub(super) fn forward_stderr(
    camera_id: String,
    stderr: ChildStderr,
    secrets: Vec<String>,
    last_line: Arc<Mutex<Option<String>>>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = mask(line.trim(), &secrets);
            if line.is_empty() {
                continue;
            }
            tracing::debug!(camera_id = %camera_id, "ffmpeg: {}", line);
            *last_line.lock() = Some(line);
        }
    });
}

fn mask(line: &str, secrets: &[String]) -> String {
    secrets
        .iter()
        .filter(|s| !s.is_empty())
        .fold(line.to_string(), |acc, secret| acc.replace(secret.as_str(), "***"))
}
