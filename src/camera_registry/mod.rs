//! CameraRegistry - canonical in-memory camera table
//!
//! ## Responsibilities
//!
//! - Camera CRUD (no persistence; the table lives for the process lifetime)
//! - Source URL derivation, kept consistent with address/credentials
//! - Status and remembered-pattern bookkeeping for the lifecycle manager
//!
//! The registry never owns connections or processes. Deleting a camera
//! that may be connected goes through
//! [`ConnectionManager::delete_camera`](crate::connection_manager::ConnectionManager::delete_camera).

mod source_url;
mod types;

pub use source_url::{SourceUrl, DEFAULT_RTSP_PORT, DEFAULT_STREAM_PATH};
pub use types::*;

use crate::error::{Error, Result};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

/// In-memory camera table
#[derive(Default)]
pub struct CameraRegistry {
    cameras: RwLock<HashMap<String, Camera>>,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a camera. Address and credentials are required; the id is
    /// generated when absent.
    pub fn add(&self, req: CreateCameraRequest) -> Result<Camera> {
        let address = required(req.address, "address")?;
        let username = required(req.username, "username")?;
        let password = req
            .password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::Validation("password is required".to_string()))?;

        let id = match req.id.map(|s| s.trim().to_string()) {
            Some(id) if !id.is_empty() => {
                if !is_valid_camera_id(&id) {
                    return Err(Error::Validation(format!("invalid camera id '{}'", id)));
                }
                id
            }
            _ => uuid::Uuid::new_v4().to_string(),
        };

        let source_url = SourceUrl::build(&address, &username, &password, DEFAULT_STREAM_PATH)?;

        let camera = Camera {
            name: req
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("Camera {}", id)),
            id: id.clone(),
            address,
            username,
            password,
            camera_type: req
                .camera_type
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CAMERA_TYPE.to_string()),
            control_port: req.control_port.unwrap_or(DEFAULT_CONTROL_PORT),
            source_url,
            status: CameraStatus::Offline,
            created_at: Utc::now(),
            last_connected_at: None,
            working_url_pattern: None,
        };

        let mut cameras = self.cameras.write();
        if cameras.contains_key(&id) {
            return Err(Error::Conflict(format!("Camera {} already exists", id)));
        }
        cameras.insert(id, camera.clone());
        drop(cameras);

        tracing::info!(
            camera_id = %camera.id,
            name = %camera.name,
            address = %camera.address,
            "Added camera"
        );

        Ok(camera)
    }

    pub fn get(&self, id: &str) -> Option<Camera> {
        self.cameras.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.cameras.read().contains_key(id)
    }

    pub fn list(&self) -> Vec<Camera> {
        self.cameras.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.cameras.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.read().is_empty()
    }

    /// Apply a partial update. The source URL is re-derived whenever
    /// address or credentials change; a rejected update leaves the record
    /// untouched.
    pub fn update(&self, id: &str, req: UpdateCameraRequest) -> Result<Camera> {
        let mut cameras = self.cameras.write();
        let current = cameras.get(id).ok_or_else(|| Error::camera_not_found(id))?;

        let mut camera = current.clone();
        let changes_source = req.changes_source();

        if let Some(name) = req.name {
            camera.name = name;
        }
        if let Some(address) = req.address {
            let address = address.trim().to_string();
            if address != camera.address {
                // A different device may follow a different path convention
                camera.working_url_pattern = None;
            }
            camera.address = address;
        }
        if let Some(username) = req.username {
            if username.trim().is_empty() {
                return Err(Error::Validation("username must not be empty".to_string()));
            }
            camera.username = username;
        }
        if let Some(password) = req.password {
            if password.is_empty() {
                return Err(Error::Validation("password must not be empty".to_string()));
            }
            camera.password = password;
        }
        if let Some(camera_type) = req.camera_type {
            camera.camera_type = camera_type;
        }
        if let Some(port) = req.control_port {
            camera.control_port = port;
        }

        if changes_source {
            camera.source_url = camera.derive_source_url()?;
        }

        cameras.insert(id.to_string(), camera.clone());
        drop(cameras);

        tracing::info!(
            camera_id = %id,
            source_changed = changes_source,
            "Updated camera"
        );

        Ok(camera)
    }

    /// Remove a camera record. Callers holding connection state must tear
    /// it down first.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.cameras.write().remove(id).is_some();
        if removed {
            tracing::info!(camera_id = %id, "Deleted camera");
        }
        removed
    }

    pub(crate) fn set_status(&self, id: &str, status: CameraStatus) -> Option<Camera> {
        let mut cameras = self.cameras.write();
        let camera = cameras.get_mut(id)?;
        if camera.status != status {
            tracing::debug!(
                camera_id = %id,
                from = camera.status.as_str(),
                to = status.as_str(),
                "Camera status transition"
            );
        }
        camera.status = status;
        Some(camera.clone())
    }

    /// Mark online and stamp the last successful connection time
    pub(crate) fn mark_online(&self, id: &str) -> Option<Camera> {
        let mut cameras = self.cameras.write();
        let camera = cameras.get_mut(id)?;
        camera.status = CameraStatus::Online;
        camera.last_connected_at = Some(Utc::now());
        Some(camera.clone())
    }

    /// Remember the stream path that yielded a readable frame
    pub(crate) fn remember_pattern(&self, id: &str, pattern: &str) -> bool {
        match self.cameras.write().get_mut(id) {
            Some(camera) => {
                camera.working_url_pattern = Some(pattern.to_string());
                true
            }
            None => false,
        }
    }
}

/// Camera ids double as directory names under the streams root:
/// ASCII alphanumerics plus `-`, `_` and `.`, not starting with `.`.
pub fn is_valid_camera_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_CAMERA_ID_LEN
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

const MAX_CAMERA_ID_LEN: usize = 128;

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::Validation(format!("{} is required", field))),
    }
}
