//! Application state
//!
//! Holds all shared components and configuration

use crate::camera_registry::CameraRegistry;
use crate::connection_manager::{ConnectionManager, ConnectionSettings};
use crate::diagnostics::{ConnectionDiagnostics, ProbeSettings, RtspProbe, StreamProbe};
use crate::stream_server::StreamFileServer;
use crate::transcoder::{HlsProfile, TranscodeSettings, TranscodingPipeline};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Root for per-camera HLS output
    pub streams_dir: PathBuf,
    /// ffmpeg executable
    pub ffmpeg_bin: String,
    /// Readiness grace period after launching a transcoder
    pub connect_grace_ms: u64,
    /// SIGTERM -> SIGKILL escalation delay
    pub stop_timeout_ms: u64,
    /// Per-attempt bound for stream probes
    pub probe_timeout_ms: u64,
    /// Directional movement duration
    pub movement_auto_stop_ms: u64,
    /// Wait bound for per-camera operations
    pub camera_lock_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 5000),
            streams_dir: std::env::var("STREAMS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("streams")),
            ffmpeg_bin: std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()),
            connect_grace_ms: env_or("CONNECT_GRACE_MS", 3_000),
            stop_timeout_ms: env_or("STOP_TIMEOUT_MS", 5_000),
            probe_timeout_ms: env_or("PROBE_TIMEOUT_MS", 5_000),
            movement_auto_stop_ms: env_or("MOVEMENT_AUTO_STOP_MS", 1_000),
            camera_lock_timeout_ms: env_or("CAMERA_LOCK_TIMEOUT_MS", 30_000),
        }
    }
}

impl AppConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn transcode_settings(&self) -> TranscodeSettings {
        TranscodeSettings {
            ffmpeg_bin: self.ffmpeg_bin.clone(),
            streams_dir: self.streams_dir.clone(),
            ready_grace: Duration::from_millis(self.connect_grace_ms),
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            profile: HlsProfile::default(),
        }
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            ffmpeg_bin: self.ffmpeg_bin.clone(),
            timeout: Duration::from_millis(self.probe_timeout_ms),
        }
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            movement_auto_stop: Duration::from_millis(self.movement_auto_stop_ms),
            lock_timeout_ms: self.camera_lock_timeout_ms,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key = %key, value = %raw, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<CameraRegistry>,
    pub connections: Arc<ConnectionManager>,
    pub diagnostics: Arc<ConnectionDiagnostics>,
    pub streams: Arc<StreamFileServer>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wire all components using the RTSP probe
    pub fn new(config: AppConfig) -> Self {
        let probe: Arc<dyn StreamProbe> = Arc::new(RtspProbe::new(config.probe_settings()));
        Self::with_probe(config, probe)
    }

    /// Wire all components around a given probe. Must run inside a Tokio runtime.
    pub fn with_probe(config: AppConfig, probe: Arc<dyn StreamProbe>) -> Self {
        let registry = Arc::new(CameraRegistry::new());
        let (pipeline, events) = TranscodingPipeline::new(config.transcode_settings());
        let streams = Arc::new(StreamFileServer::new(config.streams_dir.clone()));
        let diagnostics = Arc::new(ConnectionDiagnostics::new(probe.clone()));
        let connections = ConnectionManager::start(
            registry.clone(),
            pipeline,
            events,
            probe,
            config.connection_settings(),
        );

        Self {
            config: Arc::new(config),
            registry,
            connections,
            diagnostics,
            streams,
            started_at: Utc::now(),
        }
    }
}
