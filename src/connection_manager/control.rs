//! Movement control actions

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

/// Closed set of movement commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraAction {
    PanLeft,
    PanRight,
    TiltUp,
    TiltDown,
    ZoomIn,
    ZoomOut,
    Home,
    Stop,
}

impl CameraAction {
    pub const ALL: [CameraAction; 8] = [
        Self::PanLeft,
        Self::PanRight,
        Self::TiltUp,
        Self::TiltDown,
        Self::ZoomIn,
        Self::ZoomOut,
        Self::Home,
        Self::Stop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PanLeft => "pan_left",
            Self::PanRight => "pan_right",
            Self::TiltUp => "tilt_up",
            Self::TiltDown => "tilt_down",
            Self::ZoomIn => "zoom_in",
            Self::ZoomOut => "zoom_out",
            Self::Home => "home",
            Self::Stop => "stop",
        }
    }

    /// Directional actions are transient and stop automatically
    pub fn is_directional(&self) -> bool {
        matches!(
            self,
            Self::PanLeft | Self::PanRight | Self::TiltUp | Self::TiltDown
        )
    }
}

impl fmt::Display for CameraAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s.trim())
            .ok_or_else(|| Error::Validation(format!("unknown action '{}'", s)))
    }
}

/// Directional movement in progress
#[derive(Debug, Clone)]
pub(crate) struct Movement {
    pub action: CameraAction,
    pub started_at: DateTime<Utc>,
    /// Cancels the pending auto-stop
    pub token: CancellationToken,
}

/// Movement snapshot for API output
#[derive(Debug, Clone, Serialize)]
pub struct MovementStatus {
    pub camera_id: String,
    pub moving: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<CameraAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}
