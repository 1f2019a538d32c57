//! CameraRegistry type definitions

use super::source_url::{SourceUrl, DEFAULT_STREAM_PATH};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default control (ONVIF) port
pub const DEFAULT_CONTROL_PORT: u16 = 2020;

/// Default device type tag
pub const DEFAULT_CAMERA_TYPE: &str = "default";

/// Camera lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Offline,
    Connecting,
    Online,
    Error,
}

impl Default for CameraStatus {
    fn default() -> Self {
        Self::Offline
    }
}

impl CameraStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Connecting => "connecting",
            Self::Online => "online",
            Self::Error => "error",
        }
    }
}

/// Camera password; never printed
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"***\"")
    }
}

/// Camera entity
#[derive(Debug, Clone, Serialize)]
pub struct Camera {
    pub id: String,
    pub name: String,
    pub address: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: Password,
    #[serde(rename = "type")]
    pub camera_type: String,
    pub control_port: u16,
    /// Derived from address + credentials; rebuilt on every change
    pub source_url: SourceUrl,
    pub status: CameraStatus,
    pub created_at: DateTime<Utc>,
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Stream path that produced a readable frame during diagnostics
    pub working_url_pattern: Option<String>,
}

impl Camera {
    /// Source URL used for live streaming: the remembered working pattern
    /// when one exists, otherwise the derived default.
    pub fn stream_url(&self) -> SourceUrl {
        match self.working_url_pattern.as_deref() {
            Some(pattern) => self.source_url.with_path(pattern),
            None => self.source_url.clone(),
        }
    }

    pub(super) fn derive_source_url(&self) -> Result<SourceUrl> {
        SourceUrl::build(
            &self.address,
            &self.username,
            &self.password,
            DEFAULT_STREAM_PATH,
        )
    }
}

/// Camera creation request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateCameraRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "ip")]
    pub address: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<Password>,
    #[serde(default, rename = "type")]
    pub camera_type: Option<String>,
    #[serde(default, alias = "onvifPort", alias = "controlPort")]
    pub control_port: Option<u16>,
}

/// Camera update request; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCameraRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "ip")]
    pub address: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<Password>,
    #[serde(default, rename = "type")]
    pub camera_type: Option<String>,
    #[serde(default, alias = "onvifPort", alias = "controlPort")]
    pub control_port: Option<u16>,
}

impl UpdateCameraRequest {
    /// Whether this update touches anything the source URL is derived from
    pub fn changes_source(&self) -> bool {
        self.address.is_some() || self.username.is_some() || self.password.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde() {
        assert_eq!(
            serde_json::to_string(&CameraStatus::Connecting).unwrap(),
            "\"connecting\""
        );
        assert_eq!(CameraStatus::default(), CameraStatus::Offline);
    }

    #[test]
    fn test_create_request_aliases() {
        let req: CreateCameraRequest = serde_json::from_str(
            r#"{"name":"Gate","ip":"10.0.0.9","username":"admin","password":"pw","type":"tapo","onvifPort":2020}"#,
        )
        .unwrap();
        assert_eq!(req.address.as_deref(), Some("10.0.0.9"));
        assert_eq!(req.camera_type.as_deref(), Some("tapo"));
        assert_eq!(req.control_port, Some(2020));
        assert_eq!(req.password.unwrap().expose(), "pw");
    }

    #[test]
    fn test_password_debug_masked() {
        let req = UpdateCameraRequest {
            password: Some(Password::new("hunter2")),
            ..Default::default()
        };
        assert!(!format!("{:?}", req).contains("hunter2"));
        assert!(req.changes_source());
        assert!(!UpdateCameraRequest::default().changes_source());
    }
}
