//! TranscodingPipeline - RTSP -> HLS via a supervised ffmpeg process
//!
//! ## Responsibilities
//!
//! - Per-camera output directory lifecycle (created on start, removed on stop)
//! - Launching ffmpeg with a fixed low-latency HLS profile
//! - Bounded readiness wait instead of waiting for the first segment
//! - Guaranteed termination: explicit stop, or drop of the handle
//!
//! Segment naming and manifest rewriting belong to ffmpeg; this module only
//! supervises the process.

mod command;
mod supervisor;

pub use command::{hls_args, HlsProfile, MANIFEST_FILE, SEGMENT_PATTERN};

use crate::camera_registry::{is_valid_camera_id, SourceUrl};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use supervisor::Supervisor;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

/// Extra time allowed for SIGKILL + reap after the stop grace expires
const KILL_SLACK: Duration = Duration::from_secs(5);

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct TranscodeSettings {
    /// ffmpeg executable
    pub ffmpeg_bin: String,
    /// Root holding one directory per camera
    pub streams_dir: PathBuf,
    /// Readiness grace period awaited by `start`
    pub ready_grace: Duration,
    /// SIGTERM -> SIGKILL escalation delay
    pub stop_timeout: Duration,
    pub profile: HlsProfile,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            streams_dir: PathBuf::from("streams"),
            ready_grace: Duration::from_secs(3),
            stop_timeout: Duration::from_secs(5),
            profile: HlsProfile::default(),
        }
    }
}

/// Out-of-band notification from a running pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// The process exited after `start` reported success
    Exited {
        camera_id: String,
        session_id: Uuid,
        reason: String,
    },
}

/// TranscodingPipeline instance
pub struct TranscodingPipeline {
    settings: TranscodeSettings,
    events: mpsc::UnboundedSender<PipelineEvent>,
}

impl TranscodingPipeline {
    /// Create the pipeline and the receiver for its [`PipelineEvent`]s
    pub fn new(settings: TranscodeSettings) -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { settings, events }, rx)
    }

    /// Output directory for a camera
    pub fn output_dir(&self, camera_id: &str) -> Result<PathBuf> {
        if !is_valid_camera_id(camera_id) {
            return Err(Error::Validation(format!("invalid camera id '{}'", camera_id)));
        }
        Ok(self.settings.streams_dir.join(camera_id))
    }

    /// Create the streams root and remove leftovers from a previous run.
    /// Only directories that look like ours are removed: a valid camera id
    /// holding nothing but HLS output. Returns the number removed.
    pub async fn prepare_streams_root(&self) -> Result<usize> {
        let root = &self.settings.streams_dir;
        fs::create_dir_all(root).await?;

        let mut removed = 0;
        let mut entries = fs::read_dir(root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();
            let owned = entry
                .file_name()
                .to_str()
                .map(is_valid_camera_id)
                .unwrap_or(false)
                && holds_only_hls_output(&path).await?;

            if !owned {
                tracing::warn!(path = %path.display(), "Leaving foreign directory in streams root");
                continue;
            }
            fs::remove_dir_all(&path).await?;
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(
                streams_dir = %root.display(),
                removed = removed,
                "Removed stale stream directories"
            );
        }
        Ok(removed)
    }

    /// Launch the transcoder for a camera.
    ///
    /// Returns after the readiness grace period. Fails with `SpawnFailure`
    /// when the process cannot be created or exits before the grace period
    /// ends. The caller guarantees no other pipeline runs for this camera.
    pub async fn start(&self, camera_id: &str, source: &SourceUrl) -> Result<PipelineHandle> {
        let output_dir = self.output_dir(camera_id)?;

        // Idempotent; old segments from an earlier session are dropped
        remove_dir_if_exists(&output_dir).await.map_err(|e| {
            Error::SpawnFailure(format!(
                "cannot clear output directory {}: {}",
                output_dir.display(),
                e
            ))
        })?;
        fs::create_dir_all(&output_dir).await.map_err(|e| {
            Error::SpawnFailure(format!(
                "cannot create output directory {}: {}",
                output_dir.display(),
                e
            ))
        })?;

        let source_url = source.as_url();
        let args = hls_args(&source_url, &output_dir, &self.settings.profile);

        tracing::info!(
            camera_id = %camera_id,
            source = %source,
            output_dir = %output_dir.display(),
            ffmpeg = %self.settings.ffmpeg_bin,
            "Starting transcoder"
        );

        let spawned = Command::new(&self.settings.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let _ = remove_dir_if_exists(&output_dir).await;
                tracing::error!(camera_id = %camera_id, error = %e, "Transcoder spawn failed");
                return Err(Error::SpawnFailure(format!(
                    "{}: {}",
                    self.settings.ffmpeg_bin, e
                )));
            }
        };

        let pid = child.id();
        let session_id = Uuid::new_v4();
        let last_stderr = Arc::new(Mutex::new(None));

        if let Some(stderr) = child.stderr.take() {
            let secrets = vec![
                urlencoding::encode(source.password().expose()).into_owned(),
                source.password().expose().to_string(),
            ];
            supervisor::forward_stderr(camera_id.to_string(), stderr, secrets, last_stderr.clone());
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let (exited_tx, mut exited_rx) = watch::channel(None);

        let supervisor = Supervisor {
            camera_id: camera_id.to_string(),
            session_id,
            stop_timeout: self.settings.stop_timeout,
            events: self.events.clone(),
            exited: exited_tx,
            last_stderr,
        };
        let join = tokio::spawn(supervisor.run(child, stop_rx));

        tracing::info!(camera_id = %camera_id, pid = ?pid, "Transcoder process started");

        tokio::select! {
            _ = sleep(self.settings.ready_grace) => {}
            _ = exited_rx.changed() => {}
        }
        // An exit racing the end of the grace period still counts as startup failure
        let early_exit = exited_rx.borrow().clone();

        if let Some(reason) = early_exit {
            let _ = join.await;
            let _ = remove_dir_if_exists(&output_dir).await;
            tracing::error!(
                camera_id = %camera_id,
                reason = %reason,
                "Transcoder exited during startup"
            );
            return Err(Error::SpawnFailure(format!(
                "transcoder exited during startup: {}",
                reason
            )));
        }

        Ok(PipelineHandle {
            camera_id: camera_id.to_string(),
            session_id,
            pid,
            output_dir,
            started_at: Utc::now(),
            stop_timeout: self.settings.stop_timeout,
            stop_tx: Some(stop_tx),
            supervisor: Some(join),
            exited: exited_rx,
        })
    }

    /// Terminate the camera's transcoder and remove its output directory
    pub async fn stop(&self, handle: PipelineHandle) -> Result<()> {
        tracing::info!(
            camera_id = %handle.camera_id,
            session_id = %handle.session_id,
            "Stopping transcoder"
        );
        handle.shutdown().await
    }
}

/// Owned handle to one running transcoder.
///
/// Dropping the handle without [`PipelineHandle::shutdown`] still terminates
/// the process: the supervisor treats a closed stop channel as a stop
/// request, and the child is `kill_on_drop`.
pub struct PipelineHandle {
    camera_id: String,
    session_id: Uuid,
    pid: Option<u32>,
    output_dir: PathBuf,
    started_at: DateTime<Utc>,
    stop_timeout: Duration,
    stop_tx: Option<oneshot::Sender<()>>,
    supervisor: Option<JoinHandle<()>>,
    exited: watch::Receiver<Option<String>>,
}

impl PipelineHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whether the process is still alive
    pub fn is_running(&self) -> bool {
        self.exited.borrow().is_none()
    }

    /// Stop the process (SIGTERM, then SIGKILL) and remove the output directory
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }

        if let Some(join) = self.supervisor.take() {
            match timeout(self.stop_timeout + KILL_SLACK, join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(camera_id = %self.camera_id, error = %e, "Supervisor task failed");
                }
                Err(_) => {
                    tracing::error!(camera_id = %self.camera_id, "Supervisor did not finish in time");
                }
            }
        }

        remove_dir_if_exists(&self.output_dir).await?;
        tracing::debug!(
            camera_id = %self.camera_id,
            output_dir = %self.output_dir.display(),
            "Removed stream directory"
        );
        Ok(())
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        let Some(join) = self.supervisor.take() else {
            return;
        };

        tracing::warn!(
            camera_id = %self.camera_id,
            session_id = %self.session_id,
            "Pipeline handle dropped without stop, terminating"
        );
        // Closing the stop channel makes the supervisor terminate the process
        self.stop_tx.take();

        let dir = self.output_dir.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = join.await;
                let _ = remove_dir_if_exists(&dir).await;
            });
        }
    }
}

/// Files ffmpeg writes into a camera directory
fn is_hls_output(name: &str) -> bool {
    name == MANIFEST_FILE
        || name == format!("{}.tmp", MANIFEST_FILE)
        || (name.starts_with("segment_") && name.ends_with(".ts"))
}

async fn holds_only_hls_output(dir: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let is_file = entry.file_type().await?.is_file();
        let name = entry.file_name();
        if !is_file || !name.to_str().map(is_hls_output).unwrap_or(false) {
            return Ok(false);
        }
    }
    Ok(true)
}

async fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(all(test, unix))]
pub(crate) mod test_support {
    //! Stand-in transcoders: shell scripts that ignore ffmpeg's arguments

    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Write an executable `#!/bin/sh` script into `dir`
    pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Runs until signalled
    pub fn long_running(dir: &Path) -> PathBuf {
        script(dir, "fake-ffmpeg-long.sh", "exec sleep 30")
    }

    /// Exits immediately with an error
    pub fn failing(dir: &Path) -> PathBuf {
        script(dir, "fake-ffmpeg-fail.sh", "echo 'Connection refused' >&2\nexit 1")
    }

    /// Exits with an error after `secs`
    pub fn dies_after(dir: &Path, secs: f32) -> PathBuf {
        script(dir, "fake-ffmpeg-dies.sh", &format!("sleep {}\nexit 3", secs))
    }

    /// Ignores SIGTERM
    pub fn stubborn(dir: &Path) -> PathBuf {
        script(dir, "fake-ffmpeg-stubborn.sh", "trap '' TERM\nwhile true; do sleep 1; done")
    }
}
