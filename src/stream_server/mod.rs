//! StreamFileServer - serves HLS manifests and segments
//!
//! Files are resolved strictly inside `<streams_dir>/<camera_id>/`. Every
//! response is uncacheable and readable cross-origin.

use crate::camera_registry::is_valid_camera_id;
use crate::error::{Error, Result};
use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::path::{Component, Path, PathBuf};

pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type by file extension
pub fn content_type_for(filename: &str) -> &'static str {
    match Path::new(filename).extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("m3u8") => MANIFEST_CONTENT_TYPE,
        Some(ext) if ext.eq_ignore_ascii_case("ts") => SEGMENT_CONTENT_TYPE,
        _ => FALLBACK_CONTENT_TYPE,
    }
}

/// A stream file ready to send
#[derive(Debug)]
pub struct StreamFile {
    pub path: PathBuf,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl IntoResponse for StreamFile {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = StatusCode::OK;

        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        );
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        response
    }
}

/// StreamFileServer instance
#[derive(Debug, Clone)]
pub struct StreamFileServer {
    streams_dir: PathBuf,
}

impl StreamFileServer {
    pub fn new(streams_dir: impl Into<PathBuf>) -> Self {
        Self {
            streams_dir: streams_dir.into(),
        }
    }

    /// Path of `filename` inside the camera directory. Anything that could
    /// escape that directory is NotFound.
    pub fn resolve(&self, camera_id: &str, filename: &str) -> Result<PathBuf> {
        if !is_valid_camera_id(camera_id) {
            return Err(not_found(camera_id, filename));
        }

        let relative = Path::new(filename);
        let safe = !filename.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            tracing::debug!(camera_id = %camera_id, filename = %filename, "Rejected stream path");
            return Err(not_found(camera_id, filename));
        }

        Ok(self.streams_dir.join(camera_id).join(relative))
    }

    /// Read a manifest or segment file
    pub async fn read(&self, camera_id: &str, filename: &str) -> Result<StreamFile> {
        let path = self.resolve(camera_id, filename)?;

        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(not_found(camera_id, filename));
            }
            // A directory path or a segment deleted mid-read
            Err(e) if path.is_dir() => {
                tracing::debug!(path = %path.display(), error = %e, "Stream path is a directory");
                return Err(not_found(camera_id, filename));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(StreamFile {
            content_type: content_type_for(filename),
            path,
            body,
        })
    }
}

fn not_found(camera_id: &str, filename: &str) -> Error {
    Error::NotFound(format!("Stream file {}/{} not found", camera_id, filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn server_with_files() -> (TempDir, StreamFileServer) {
        let tmp = TempDir::new().unwrap();
        let cam = tmp.path().join("cam-1");
        std::fs::create_dir_all(&cam).unwrap();
        std::fs::write(cam.join("stream.m3u8"), "#EXTM3U\n").unwrap();
        std::fs::write(cam.join("segment_00001.ts"), [0x47u8; 188]).unwrap();
        std::fs::write(tmp.path().join("secret.txt"), "nope").unwrap();
        let server = StreamFileServer::new(tmp.path());
        (tmp, server)
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("stream.m3u8"), MANIFEST_CONTENT_TYPE);
        assert_eq!(content_type_for("segment_00001.ts"), SEGMENT_CONTENT_TYPE);
        assert_eq!(content_type_for("STREAM.M3U8"), MANIFEST_CONTENT_TYPE);
        assert_eq!(content_type_for("init.mp4"), FALLBACK_CONTENT_TYPE);
        assert_eq!(content_type_for("noext"), FALLBACK_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_reads_manifest_and_segment() {
        let (_tmp, server) = server_with_files();

        let manifest = server.read("cam-1", "stream.m3u8").await.unwrap();
        assert_eq!(manifest.content_type, MANIFEST_CONTENT_TYPE);
        assert_eq!(manifest.body, b"#EXTM3U\n");

        let segment = server.read("cam-1", "segment_00001.ts").await.unwrap();
        assert_eq!(segment.content_type, SEGMENT_CONTENT_TYPE);
        assert_eq!(segment.body.len(), 188);
    }

    #[tokio::test]
    async fn test_traversal_and_missing_are_not_found() {
        let (_tmp, server) = server_with_files();

        for (camera, file) in [
            ("cam-1", "../secret.txt"),
            ("cam-1", "/etc/passwd"),
            ("cam-1", ""),
            ("..", "secret.txt"),
            ("cam-1", "missing.ts"),
            ("cam-2", "stream.m3u8"),
        ] {
            assert!(
                matches!(server.read(camera, file).await, Err(Error::NotFound(_))),
                "{}/{}",
                camera,
                file
            );
        }
    }

    #[test]
    fn test_response_headers() {
        let response = StreamFile {
            path: PathBuf::from("stream.m3u8"),
            content_type: MANIFEST_CONTENT_TYPE,
            body: b"#EXTM3U".to_vec(),
        }
        .into_response();

        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], MANIFEST_CONTENT_TYPE);
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-store, must-revalidate");
        assert_eq!(headers[header::PRAGMA], "no-cache");
        assert_eq!(headers[header::EXPIRES], "0");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
