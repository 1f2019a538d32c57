//! API response models

use crate::camera_registry::Camera;
use crate::connection_manager::ConnectionInfo;
use serde::{Deserialize, Serialize};

/// Standard lifecycle/CRUD response envelope
#[derive(Debug, Clone, Serialize)]
pub struct CameraResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera: Option<Camera>,
}

impl CameraResponse {
    pub fn success(message: impl Into<String>, camera: Option<Camera>) -> Self {
        Self {
            success: true,
            message: message.into(),
            camera,
        }
    }
}

/// Stream URL response
#[derive(Debug, Clone, Serialize)]
pub struct StreamUrlResponse {
    pub success: bool,
    pub stream_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionInfo>,
}

/// Movement command body
#[derive(Debug, Clone, Deserialize)]
pub struct ControlRequest {
    #[serde(default)]
    pub action: Option<String>,
}

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub cameras: usize,
    pub active_connections: usize,
}
