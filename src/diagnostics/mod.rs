//! ConnectionDiagnostics - multi-pattern source URL discovery
//!
//! ## Behavior
//!
//! 1. Build one candidate per [`UrlTemplate`] from the camera's address and credentials
//! 2. For each candidate, in order: open it, then read one frame
//! 3. Record every outcome; a bad candidate never aborts the run
//! 4. Remember the first readable path on the camera record
//!
//! Diagnostics never touch the lifecycle status.

mod probe;

pub use probe::{ProbeSettings, RtspProbe, StreamProbe};

use crate::camera_registry::{Camera, CameraRegistry, SourceUrl};
use crate::error::{Error, Result};
use serde::Serialize;
use std::sync::Arc;

/// Candidate stream path convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UrlTemplate {
    pub name: &'static str,
    pub path: &'static str,
}

/// Probed in this order
pub const CANDIDATE_TEMPLATES: [UrlTemplate; 4] = [
    UrlTemplate {
        name: "generic",
        path: "/stream1",
    },
    UrlTemplate {
        name: "hikvision",
        path: "/Streaming/Channels/1",
    },
    UrlTemplate {
        name: "dahua",
        path: "/cam/realmonitor?channel=1&subtype=0",
    },
    UrlTemplate {
        name: "axis",
        path: "/axis-media/media.amp",
    },
];

/// Outcome of one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    Readable,
    /// Opened, but no frame could be read
    Unreadable(String),
    OpenFailed(String),
}

/// Per-candidate entry of a [`DiagnosticReport`]
#[derive(Debug, Clone, Serialize)]
pub struct CandidateResult {
    /// Redacted candidate URL
    pub url: String,
    pub template: &'static str,
    pub opened: bool,
    pub frame_read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub path: &'static str,
}

impl CandidateResult {
    fn new(template: &UrlTemplate, source: &SourceUrl, outcome: CandidateOutcome) -> Self {
        let (opened, frame_read, error) = match outcome {
            CandidateOutcome::Readable => (true, true, None),
            CandidateOutcome::Unreadable(e) => (true, false, Some(e)),
            CandidateOutcome::OpenFailed(e) => (false, false, Some(e)),
        };
        Self {
            url: source.redacted(),
            template: template.name,
            opened,
            frame_read,
            error,
            path: template.path,
        }
    }

    pub fn outcome(&self) -> CandidateOutcome {
        let error = self.error.clone().unwrap_or_default();
        match (self.opened, self.frame_read) {
            (true, true) => CandidateOutcome::Readable,
            (true, false) => CandidateOutcome::Unreadable(error),
            _ => CandidateOutcome::OpenFailed(error),
        }
    }
}

/// Aggregate diagnostics result
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    /// True iff at least one candidate is readable
    pub success: bool,
    pub message: String,
    pub results: Vec<CandidateResult>,
}

impl DiagnosticReport {
    /// Path of the first readable candidate
    pub fn working_path(&self) -> Option<&'static str> {
        self.results.iter().find(|r| r.frame_read).map(|r| r.path)
    }
}

/// ConnectionDiagnostics instance
pub struct ConnectionDiagnostics {
    probe: Arc<dyn StreamProbe>,
}

impl ConnectionDiagnostics {
    pub fn new(probe: Arc<dyn StreamProbe>) -> Self {
        Self { probe }
    }

    /// Probe every candidate for a camera. Always completes.
    pub async fn run(&self, camera: &Camera) -> DiagnosticReport {
        let mut results = Vec::with_capacity(CANDIDATE_TEMPLATES.len());

        for template in CANDIDATE_TEMPLATES.iter() {
            let candidate = camera.source_url.with_path(template.path);
            let outcome = self.probe_candidate(&candidate).await;

            tracing::debug!(
                camera_id = %camera.id,
                template = template.name,
                url = %candidate,
                outcome = ?outcome,
                "Diagnostic candidate probed"
            );
            results.push(CandidateResult::new(template, &candidate, outcome));
        }

        let readable = results.iter().filter(|r| r.frame_read).count();
        let success = readable > 0;

        tracing::info!(
            camera_id = %camera.id,
            candidates = results.len(),
            readable = readable,
            success = success,
            "Connection test complete"
        );

        DiagnosticReport {
            success,
            message: "Connection test complete".to_string(),
            results,
        }
    }

    /// Run diagnostics for a registered camera and remember the first
    /// readable path on its record.
    pub async fn test_camera(&self, registry: &CameraRegistry, camera_id: &str) -> Result<DiagnosticReport> {
        let camera = registry
            .get(camera_id)
            .ok_or_else(|| Error::camera_not_found(camera_id))?;

        let report = self.run(&camera).await;

        if let Some(path) = report.working_path() {
            // The camera may have been deleted while probing
            if registry.remember_pattern(camera_id, path) {
                tracing::info!(camera_id = %camera_id, pattern = %path, "Remembered working stream path");
            }
        }

        Ok(report)
    }

    async fn probe_candidate(&self, candidate: &SourceUrl) -> CandidateOutcome {
        if let Err(e) = self.probe.open(candidate).await {
            return CandidateOutcome::OpenFailed(e.to_string());
        }
        match self.probe.read_frame(candidate).await {
            Ok(()) => CandidateOutcome::Readable,
            Err(e) => CandidateOutcome::Unreadable(e.to_string()),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Probe that succeeds only for the listed paths
    #[derive(Default)]
    pub struct FakeProbe {
        pub open_paths: Vec<&'static str>,
        pub readable_paths: Vec<&'static str>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeProbe {
        pub fn readable_at(path: &'static str) -> Self {
            Self {
                open_paths: vec![path],
                readable_paths: vec![path],
                ..Default::default()
            }
        }

        pub fn unreachable() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl StreamProbe for FakeProbe {
        async fn open(&self, source: &SourceUrl) -> Result<()> {
            self.calls.lock().push(format!("open {}", source.path()));
            if self.open_paths.contains(&source.path()) {
                Ok(())
            } else {
                Err(Error::ProbeFailure(format!(
                    "connect {}: Connection refused",
                    source.authority()
                )))
            }
        }

        async fn read_frame(&self, source: &SourceUrl) -> Result<()> {
            self.calls.lock().push(format!("read {}", source.path()));
            if self.readable_paths.contains(&source.path()) {
                Ok(())
            } else {
                Err(Error::ProbeFailure("no frame received".to_string()))
            }
        }
    }
}
