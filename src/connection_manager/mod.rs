//! ConnectionManager - camera connection lifecycle state machine
//!
//! ## States
//!
//! ```text
//! offline -> connecting -> online -> offline   (disconnect)
//!                 |           |
//!                 +-> error <-+                (spawn failure / transcoder exit)
//! error -> offline                             (disconnect)
//! ```
//!
//! ## Invariants
//!
//! - At most one [`ActiveConnection`] per camera id
//! - connect / disconnect / update / delete for one id are serialized by a
//!   [`CameraLease`](crate::camera_lock::CameraLease); different ids run concurrently
//! - Every exit path (disconnect, delete, transcoder exit, shutdown) stops
//!   the owned pipeline

mod control;

pub use control::{CameraAction, MovementStatus};

use crate::camera_lock::{CameraLease, CameraLocks, LockError};
use crate::camera_registry::{Camera, CameraRegistry, CameraStatus, SourceUrl, UpdateCameraRequest};
use crate::diagnostics::StreamProbe;
use crate::error::{Error, Result};
use crate::transcoder::{PipelineEvent, PipelineHandle, TranscodingPipeline};
use chrono::{DateTime, Utc};
use control::Movement;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Lifecycle settings
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Delay before a directional movement is stopped
    pub movement_auto_stop: Duration,
    /// Wait bound for the per-camera lease
    pub lock_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            movement_auto_stop: Duration::from_secs(1),
            lock_timeout_ms: 30_000,
        }
    }
}

/// Ephemeral binding of a camera to its running transcoder
pub struct ActiveConnection {
    camera_id: String,
    connected_at: DateTime<Utc>,
    source_url: SourceUrl,
    /// Attached once the pipeline has started
    pipeline: Option<PipelineHandle>,
    /// Parent of every task scheduled for this connection
    cancel: CancellationToken,
    movement: Arc<Mutex<Option<Movement>>>,
}

impl ActiveConnection {
    fn new(camera_id: &str, source_url: SourceUrl) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            connected_at: Utc::now(),
            source_url,
            pipeline: None,
            cancel: CancellationToken::new(),
            movement: Arc::new(Mutex::new(None)),
        }
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.pipeline.as_ref().map(|p| p.session_id())
    }

    fn info(&self) -> ConnectionInfo {
        let pipeline = self.pipeline.as_ref();
        ConnectionInfo {
            connected_at: self.connected_at,
            source: self.source_url.clone(),
            session_id: self.session_id(),
            pid: pipeline.and_then(|p| p.pid()),
            pipeline_started_at: pipeline.map(|p| p.started_at()),
            running: pipeline.map(|p| p.is_running()).unwrap_or(false),
        }
    }
}

/// Snapshot of an active connection; the source is serialized redacted
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub connected_at: DateTime<Utc>,
    pub source: SourceUrl,
    pub session_id: Option<Uuid>,
    pub pid: Option<u32>,
    pub pipeline_started_at: Option<DateTime<Utc>>,
    pub running: bool,
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Result of a test-stream probe
#[derive(Debug, Clone, Serialize)]
pub struct StreamCheck {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// ConnectionManager instance
pub struct ConnectionManager {
    registry: Arc<CameraRegistry>,
    pipeline: TranscodingPipeline,
    probe: Arc<dyn StreamProbe>,
    locks: CameraLocks,
    active: Mutex<HashMap<String, ActiveConnection>>,
    settings: ConnectionSettings,
}

impl ConnectionManager {
    /// Create the manager and start consuming pipeline events
    pub fn start(
        registry: Arc<CameraRegistry>,
        pipeline: TranscodingPipeline,
        events: mpsc::UnboundedReceiver<PipelineEvent>,
        probe: Arc<dyn StreamProbe>,
        settings: ConnectionSettings,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            registry,
            pipeline,
            probe,
            locks: CameraLocks::with_timeout(settings.lock_timeout_ms),
            active: Mutex::new(HashMap::new()),
            settings,
        });
        spawn_event_loop(Arc::downgrade(&manager), events);
        manager
    }

    pub fn pipeline(&self) -> &TranscodingPipeline {
        &self.pipeline
    }

    pub fn is_active(&self, camera_id: &str) -> bool {
        self.active.lock().contains_key(camera_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn connection_info(&self, camera_id: &str) -> Option<ConnectionInfo> {
        self.active.lock().get(camera_id).map(ActiveConnection::info)
    }

    /// Start streaming a camera. Returns the camera record once online.
    pub async fn connect(&self, camera_id: &str) -> Result<Camera> {
        let _lease = self.lease(camera_id).await?;

        let camera = self
            .registry
            .get(camera_id)
            .ok_or_else(|| Error::camera_not_found(camera_id))?;

        let source = camera.stream_url();
        {
            let mut active = self.active.lock();
            if active.contains_key(camera_id) {
                return Err(Error::AlreadyConnected(camera_id.to_string()));
            }
            active.insert(camera_id.to_string(), ActiveConnection::new(camera_id, source.clone()));
        }
        self.registry.set_status(camera_id, CameraStatus::Connecting);

        tracing::info!(camera_id = %camera_id, source = %source, "Connecting camera");

        let handle = match self.pipeline.start(camera_id, &source).await {
            Ok(handle) => handle,
            Err(e) => {
                self.active.lock().remove(camera_id);
                self.registry.set_status(camera_id, CameraStatus::Error);
                tracing::error!(camera_id = %camera_id, error = %e, "Camera connect failed");
                return Err(e);
            }
        };

        {
            let mut active = self.active.lock();
            match active.get_mut(camera_id) {
                Some(conn) => conn.pipeline = Some(handle),
                None => {
                    // Unreachable while the lease is held; the handle's drop stops the process
                    drop(active);
                    drop(handle);
                    self.registry.set_status(camera_id, CameraStatus::Error);
                    return Err(Error::Internal(format!(
                        "active connection for {} vanished during connect",
                        camera_id
                    )));
                }
            }
        }

        let camera = self
            .registry
            .mark_online(camera_id)
            .ok_or_else(|| Error::camera_not_found(camera_id))?;

        tracing::info!(camera_id = %camera_id, "Camera online");
        Ok(camera)
    }

    /// Stop streaming a camera. A camera left in `error` without an active
    /// connection is reset to `offline`.
    pub async fn disconnect(&self, camera_id: &str) -> Result<Camera> {
        let _lease = self.lease(camera_id).await?;

        let camera = self
            .registry
            .get(camera_id)
            .ok_or_else(|| Error::camera_not_found(camera_id))?;

        let conn = self.active.lock().remove(camera_id);
        match conn {
            Some(conn) => self.teardown(conn).await,
            None if camera.status == CameraStatus::Error => {
                tracing::info!(camera_id = %camera_id, "Resetting camera from error state");
            }
            None => return Err(Error::NotConnected(camera_id.to_string())),
        }

        let camera = self
            .registry
            .set_status(camera_id, CameraStatus::Offline)
            .ok_or_else(|| Error::camera_not_found(camera_id))?;

        tracing::info!(camera_id = %camera_id, "Camera disconnected");
        Ok(camera)
    }

    /// Update a camera record. A running stream keeps its source until the
    /// next connect.
    pub async fn update_camera(&self, camera_id: &str, req: UpdateCameraRequest) -> Result<Camera> {
        let _lease = self.lease(camera_id).await?;
        self.registry.update(camera_id, req)
    }

    /// Delete a camera, disconnecting it first
    pub async fn delete_camera(&self, camera_id: &str) -> Result<()> {
        let _lease = self.lease(camera_id).await?;

        if !self.registry.contains(camera_id) {
            return Err(Error::camera_not_found(camera_id));
        }

        let conn = self.active.lock().remove(camera_id);
        if let Some(conn) = conn {
            tracing::info!(camera_id = %camera_id, "Disconnecting camera before delete");
            self.teardown(conn).await;
        }

        self.registry.remove(camera_id);
        Ok(())
    }

    /// Issue a movement command. Directional actions stop automatically
    /// after the configured delay; `stop` cancels a pending movement.
    pub fn control(&self, camera_id: &str, action: CameraAction) -> Result<String> {
        let camera = self
            .registry
            .get(camera_id)
            .ok_or_else(|| Error::camera_not_found(camera_id))?;

        let active = self.active.lock();
        let conn = active
            .get(camera_id)
            .filter(|_| camera.status == CameraStatus::Online)
            .ok_or_else(|| Error::NotConnected(camera_id.to_string()))?;

        let mut movement = conn.movement.lock();
        if let Some(previous) = movement.take() {
            previous.token.cancel();
            tracing::debug!(
                camera_id = %camera_id,
                previous = %previous.action,
                "Superseding pending movement"
            );
        }

        tracing::info!(
            camera_id = %camera_id,
            action = %action,
            control_port = camera.control_port,
            "Executing camera action"
        );

        if action.is_directional() {
            let token = conn.cancel.child_token();
            *movement = Some(Movement {
                action,
                started_at: Utc::now(),
                token: token.clone(),
            });
            schedule_auto_stop(
                camera_id.to_string(),
                action,
                conn.movement.clone(),
                token,
                self.settings.movement_auto_stop,
            );
        }

        Ok(format!("Action {} executed successfully", action))
    }

    /// Current movement state
    pub fn movement_status(&self, camera_id: &str) -> Result<MovementStatus> {
        if !self.registry.contains(camera_id) {
            return Err(Error::camera_not_found(camera_id));
        }

        let active = self.active.lock();
        let current = active
            .get(camera_id)
            .and_then(|conn| conn.movement.lock().clone());

        Ok(MovementStatus {
            camera_id: camera_id.to_string(),
            moving: current.is_some(),
            action: current.as_ref().map(|m| m.action),
            started_at: current.map(|m| m.started_at),
        })
    }

    /// Reachability probe of the active source; no state change
    pub async fn test_stream(&self, camera_id: &str) -> Result<StreamCheck> {
        if !self.registry.contains(camera_id) {
            return Err(Error::camera_not_found(camera_id));
        }

        let source = self
            .active
            .lock()
            .get(camera_id)
            .map(|conn| conn.source_url.clone())
            .ok_or_else(|| Error::NotConnected(camera_id.to_string()))?;

        let check = match self.probe.open(&source).await {
            Ok(()) => StreamCheck {
                success: true,
                message: "RTSP stream accessible".to_string(),
                error: None,
            },
            Err(e) => StreamCheck {
                success: false,
                message: "RTSP stream not accessible".to_string(),
                error: Some(e.to_string()),
            },
        };

        tracing::debug!(
            camera_id = %camera_id,
            source = %source,
            accessible = check.success,
            "Stream test complete"
        );
        Ok(check)
    }

    /// Disconnect every active camera
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.active.lock().keys().cloned().collect();
        if ids.is_empty() {
            return;
        }

        tracing::info!(count = ids.len(), "Disconnecting all cameras");
        for id in ids {
            match self.disconnect(&id).await {
                Ok(_) => {}
                Err(Error::NotConnected(_)) | Err(Error::NotFound(_)) => {}
                Err(e) => tracing::warn!(camera_id = %id, error = %e, "Shutdown disconnect failed"),
            }
        }
    }

    async fn lease(&self, camera_id: &str) -> Result<CameraLease> {
        self.locks.acquire(camera_id).await.map_err(|e| match e {
            LockError::Busy => Error::Busy(camera_id.to_string()),
        })
    }

    /// Cancel scheduled tasks and stop the pipeline
    async fn teardown(&self, mut conn: ActiveConnection) {
        conn.cancel.cancel();
        if let Some(handle) = conn.pipeline.take() {
            if let Err(e) = self.pipeline.stop(handle).await {
                tracing::warn!(camera_id = %conn.camera_id, error = %e, "Pipeline stop reported an error");
            }
        }
    }

    async fn handle_pipeline_event(&self, event: PipelineEvent) {
        let PipelineEvent::Exited {
            camera_id,
            session_id,
            reason,
        } = event;

        let _lease = match self.lease(&camera_id).await {
            Ok(lease) => lease,
            Err(e) => {
                tracing::warn!(camera_id = %camera_id, error = %e, "Dropping pipeline event");
                return;
            }
        };

        let conn = {
            let mut active = self.active.lock();
            match active.get(&camera_id) {
                Some(conn) if conn.session_id() == Some(session_id) => active.remove(&camera_id),
                _ => None,
            }
        };

        let Some(conn) = conn else {
            tracing::debug!(
                camera_id = %camera_id,
                session_id = %session_id,
                "Ignoring exit of a superseded session"
            );
            return;
        };

        self.teardown(conn).await;
        self.registry.set_status(&camera_id, CameraStatus::Error);
        tracing::error!(
            camera_id = %camera_id,
            reason = %reason,
            "Transcoder exited, camera marked as error"
        );
    }
}

fn spawn_event_loop(manager: Weak<ConnectionManager>, mut events: mpsc::UnboundedReceiver<PipelineEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(manager) = manager.upgrade() else {
                break;
            };
            // Each event waits on its own camera's lease
            tokio::spawn(async move { manager.handle_pipeline_event(event).await });
        }
        tracing::debug!("Pipeline event loop finished");
    });
}

fn schedule_auto_stop(
    camera_id: String,
    action: CameraAction,
    slot: Arc<Mutex<Option<Movement>>>,
    token: CancellationToken,
    delay: Duration,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::trace!(camera_id = %camera_id, action = %action, "Auto-stop cancelled");
            }
            _ = sleep(delay) => {
                let mut slot = slot.lock();
                // A superseded movement has its token cancelled under this lock
                if !token.is_cancelled() {
                    *slot = None;
                    tracing::info!(camera_id = %camera_id, action = %action, "Movement auto-stopped");
                }
            }
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::camera_registry::{CreateCameraRequest, Password};
    use crate::diagnostics::test_support::FakeProbe;
    use crate::transcoder::test_support;
    use crate::transcoder::{HlsProfile, TranscodeSettings};
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::time::timeout;

    struct Fixture {
        _tmp: TempDir,
        manager: Arc<ConnectionManager>,
        camera_id: String,
    }

    fn fixture_with(bin: impl FnOnce(&Path) -> std::path::PathBuf, probe: FakeProbe) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let bin = bin(tmp.path());
        let (pipeline, events) = TranscodingPipeline::new(TranscodeSettings {
            ffmpeg_bin: bin.to_string_lossy().into_owned(),
            streams_dir: tmp.path().join("streams"),
            ready_grace: Duration::from_millis(100),
            stop_timeout: Duration::from_millis(500),
            profile: HlsProfile::default(),
        });

        let registry = Arc::new(CameraRegistry::new());
        let camera = add_camera(&registry, "cam-1");

        let manager = ConnectionManager::start(
            registry,
            pipeline,
            events,
            Arc::new(probe),
            ConnectionSettings {
                movement_auto_stop: Duration::from_millis(100),
                lock_timeout_ms: 5_000,
            },
        );

        Fixture {
            _tmp: tmp,
            manager,
            camera_id: camera.id,
        }
    }

    fn add_camera(registry: &CameraRegistry, id: &str) -> Camera {
        registry
            .add(CreateCameraRequest {
                id: Some(id.to_string()),
                address: Some("127.0.0.1".to_string()),
                username: Some("admin".to_string()),
                password: Some(Password::new("pw")),
                ..Default::default()
            })
            .unwrap()
    }

    fn fixture() -> Fixture {
        fixture_with(test_support::long_running, FakeProbe::readable_at("/stream1"))
    }

    fn status(f: &Fixture) -> CameraStatus {
        f.manager.registry.get(&f.camera_id).unwrap().status
    }

    #[tokio::test]
    async fn test_connect_then_disconnect() {
        let f = fixture();

        let camera = f.manager.connect(&f.camera_id).await.unwrap();
        assert_eq!(camera.status, CameraStatus::Online);
        assert!(camera.last_connected_at.is_some());
        assert!(f.manager.is_active(&f.camera_id));
        let dir = f.manager.pipeline().output_dir(&f.camera_id).unwrap();
        assert!(dir.is_dir());

        let camera = f.manager.disconnect(&f.camera_id).await.unwrap();
        assert_eq!(camera.status, CameraStatus::Offline);
        assert!(!f.manager.is_active(&f.camera_id));
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let f = fixture();
        f.manager.connect(&f.camera_id).await.unwrap();

        assert!(matches!(
            f.manager.connect(&f.camera_id).await,
            Err(Error::AlreadyConnected(_))
        ));
        assert_eq!(f.manager.active_count(), 1);
        f.manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_concurrent_connects_yield_one_connection() {
        let f = fixture();

        let a = {
            let m = f.manager.clone();
            let id = f.camera_id.clone();
            tokio::spawn(async move { m.connect(&id).await })
        };
        let b = {
            let m = f.manager.clone();
            let id = f.camera_id.clone();
            tokio::spawn(async move { m.connect(&id).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let already = results
            .iter()
            .filter(|r| matches!(r, Err(Error::AlreadyConnected(_))))
            .count();
        assert_eq!((ok, already), (1, 1));
        assert_eq!(f.manager.active_count(), 1);
        f.manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_spawn_failure_sets_error_and_disconnect_resets() {
        let f = fixture_with(test_support::failing, FakeProbe::unreachable());

        let err = f.manager.connect(&f.camera_id).await.err().unwrap();
        assert!(matches!(err, Error::SpawnFailure(_)));
        assert_eq!(status(&f), CameraStatus::Error);
        assert!(!f.manager.is_active(&f.camera_id));

        let camera = f.manager.disconnect(&f.camera_id).await.unwrap();
        assert_eq!(camera.status, CameraStatus::Offline);
    }

    #[tokio::test]
    async fn test_disconnect_preconditions() {
        let f = fixture();
        assert!(matches!(
            f.manager.disconnect(&f.camera_id).await,
            Err(Error::NotConnected(_))
        ));
        assert!(matches!(
            f.manager.disconnect("ghost").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(f.manager.connect("ghost").await, Err(Error::NotFound(_))));
        assert_eq!(status(&f), CameraStatus::Offline);
    }

    #[tokio::test]
    async fn test_delete_cascades_disconnect() {
        let f = fixture();
        f.manager.connect(&f.camera_id).await.unwrap();
        let dir = f.manager.pipeline().output_dir(&f.camera_id).unwrap();

        f.manager.delete_camera(&f.camera_id).await.unwrap();
        assert!(!f.manager.is_active(&f.camera_id));
        assert!(f.manager.registry.get(&f.camera_id).is_none());
        assert!(!dir.exists());

        assert!(matches!(
            f.manager.delete_camera(&f.camera_id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_transcoder_exit_marks_error() {
        let f = fixture_with(
            |dir| test_support::dies_after(dir, 0.3),
            FakeProbe::unreachable(),
        );
        f.manager.connect(&f.camera_id).await.unwrap();

        timeout(Duration::from_secs(5), async {
            while status(&f) != CameraStatus::Error {
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert!(!f.manager.is_active(&f.camera_id));

        // Reconnect path stays usable
        let camera = f.manager.disconnect(&f.camera_id).await.unwrap();
        assert_eq!(camera.status, CameraStatus::Offline);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_exit_at_end_of_grace_never_leaves_camera_online() {
        // Exits right as the 100ms grace period ends
        let f = fixture_with(
            |dir| test_support::dies_after(dir, 0.1),
            FakeProbe::unreachable(),
        );
        let ids: Vec<String> = (0..40).map(|i| format!("cam-grace-{}", i)).collect();
        for id in &ids {
            add_camera(&f.manager.registry, id);
        }

        let tasks: Vec<_> = ids
            .iter()
            .map(|id| {
                let m = f.manager.clone();
                let id = id.clone();
                tokio::spawn(async move { m.connect(&id).await })
            })
            .collect();
        for task in tasks {
            // Either outcome is fine; the camera must still end in error
            let _ = task.await.unwrap();
        }

        let all_failed = || {
            ids.iter()
                .all(|id| f.manager.registry.get(id).unwrap().status == CameraStatus::Error)
        };
        timeout(Duration::from_secs(10), async {
            while !all_failed() || f.manager.active_count() > 0 {
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            let online: Vec<_> = ids
                .iter()
                .filter(|id| f.manager.registry.get(id).unwrap().status == CameraStatus::Online)
                .collect();
            panic!("cameras left online after their transcoder exited: {:?}", online)
        });

        for id in &ids {
            assert!(!f.manager.pipeline().output_dir(id).unwrap().exists());
        }
    }

    #[tokio::test]
    async fn test_exit_handling_is_independent_per_camera() {
        let f = fixture_with(
            |dir| test_support::dies_after(dir, 0.5),
            FakeProbe::unreachable(),
        );
        add_camera(&f.manager.registry, "cam-2");
        let status_of = |id: &str| f.manager.registry.get(id).unwrap().status;

        f.manager.connect("cam-1").await.unwrap();
        f.manager.connect("cam-2").await.unwrap();
        // cam-1's exit event now waits on this lease
        let held = f.manager.locks.acquire("cam-1").await.unwrap();

        timeout(Duration::from_secs(2), async {
            while status_of("cam-2") != CameraStatus::Error {
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(status_of("cam-1"), CameraStatus::Online);

        drop(held);
        timeout(Duration::from_secs(2), async {
            while status_of("cam-1") != CameraStatus::Error {
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(f.manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_deleted_cameras_leave_no_lock_entries() {
        let f = fixture();
        for i in 0..50 {
            let id = format!("cam-tmp-{}", i);
            add_camera(&f.manager.registry, &id);
            f.manager
                .update_camera(&id, UpdateCameraRequest::default())
                .await
                .unwrap();
            f.manager.delete_camera(&id).await.unwrap();
        }
        assert_eq!(f.manager.registry.list().len(), 1);
        assert_eq!(f.manager.locks.len(), 0);

        f.manager.connect(&f.camera_id).await.unwrap();
        f.manager.disconnect(&f.camera_id).await.unwrap();
        assert_eq!(f.manager.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_control_requires_online() {
        let f = fixture();
        assert!(matches!(
            f.manager.control(&f.camera_id, CameraAction::PanLeft),
            Err(Error::NotConnected(_))
        ));
        assert_eq!(status(&f), CameraStatus::Offline);
    }

    #[tokio::test]
    async fn test_directional_action_auto_stops() {
        let f = fixture();
        f.manager.connect(&f.camera_id).await.unwrap();

        let message = f.manager.control(&f.camera_id, CameraAction::TiltUp).unwrap();
        assert_eq!(message, "Action tilt_up executed successfully");
        let moving = f.manager.movement_status(&f.camera_id).unwrap();
        assert!(moving.moving);
        assert_eq!(moving.action, Some(CameraAction::TiltUp));

        sleep(Duration::from_millis(300)).await;
        assert!(!f.manager.movement_status(&f.camera_id).unwrap().moving);
        f.manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_stop_and_stateless_actions() {
        let f = fixture();
        f.manager.connect(&f.camera_id).await.unwrap();

        f.manager.control(&f.camera_id, CameraAction::PanRight).unwrap();
        f.manager.control(&f.camera_id, CameraAction::Stop).unwrap();
        assert!(!f.manager.movement_status(&f.camera_id).unwrap().moving);

        f.manager.control(&f.camera_id, CameraAction::ZoomIn).unwrap();
        assert!(!f.manager.movement_status(&f.camera_id).unwrap().moving);
        f.manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_disconnect_clears_pending_movement() {
        let f = fixture();
        f.manager.connect(&f.camera_id).await.unwrap();
        f.manager.control(&f.camera_id, CameraAction::PanLeft).unwrap();

        f.manager.disconnect(&f.camera_id).await.unwrap();
        assert!(!f.manager.movement_status(&f.camera_id).unwrap().moving);
    }

    #[tokio::test]
    async fn test_stream_check() {
        let f = fixture();
        assert!(matches!(
            f.manager.test_stream(&f.camera_id).await,
            Err(Error::NotConnected(_))
        ));

        f.manager.connect(&f.camera_id).await.unwrap();
        let check = f.manager.test_stream(&f.camera_id).await.unwrap();
        assert!(check.success);
        assert_eq!(check.message, "RTSP stream accessible");
        assert_eq!(status(&f), CameraStatus::Online);
        f.manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_connect_uses_remembered_pattern() {
        let f = fixture();
        f.manager
            .registry
            .remember_pattern(&f.camera_id, "/Streaming/Channels/1");

        f.manager.connect(&f.camera_id).await.unwrap();
        let source = f
            .manager
            .active
            .lock()
            .get(&f.camera_id)
            .map(|c| c.source_url.path().to_string());
        assert_eq!(source.as_deref(), Some("/Streaming/Channels/1"));
        f.manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_shutdown_all() {
        let f = fixture();
        f.manager.connect(&f.camera_id).await.unwrap();

        f.manager.shutdown_all().await;
        assert_eq!(f.manager.active_count(), 0);
        assert_eq!(status(&f), CameraStatus::Offline);
    }
}
