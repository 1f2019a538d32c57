//! camstream - IP camera registry and live HLS streaming server
//!
//! ## Architecture
//!
//! 1. CameraRegistry - in-memory camera table
//! 2. CameraLocks - per-camera operation serialization
//! 3. ConnectionDiagnostics - candidate source URL probing
//! 4. TranscodingPipeline - supervised ffmpeg RTSP -> HLS
//! 5. ConnectionManager - connection lifecycle state machine
//! 6. StreamFileServer - manifest/segment serving
//! 7. WebAPI - REST API endpoints

pub mod camera_lock;
pub mod camera_registry;
pub mod connection_manager;
pub mod diagnostics;
pub mod error;
pub mod models;
pub mod state;
pub mod stream_server;
pub mod transcoder;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
