//! API Routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::camera_registry::{CreateCameraRequest, UpdateCameraRequest};
use crate::connection_manager::CameraAction;
use crate::error::Error;
use crate::models::{CameraResponse, ControlRequest, StreamUrlResponse};
use crate::state::AppState;
use crate::transcoder::MANIFEST_FILE;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Cameras
        .route("/api/cameras", get(list_cameras).post(create_camera))
        .route(
            "/api/cameras/:id",
            get(get_camera).put(update_camera).delete(delete_camera),
        )
        // Diagnostics
        .route("/api/cameras/:id/test-connection", post(test_connection))
        .route("/api/cameras/:id/test-stream", get(test_stream))
        // Lifecycle
        .route("/api/cameras/:id/connect", post(connect_camera))
        .route("/api/cameras/:id/disconnect", post(disconnect_camera))
        .route("/api/cameras/:id/control", post(control_camera))
        .route("/api/cameras/:id/control/status", get(control_status))
        // Streaming
        .route("/api/cameras/:id/stream", get(stream_url))
        .route("/api/streams/:id/*file", get(serve_stream_file))
        .with_state(state)
}

/// Public manifest URL for a camera
pub fn manifest_url(camera_id: &str) -> String {
    format!("/api/streams/{}/{}", camera_id, MANIFEST_FILE)
}

// ========================================
// Cameras
// ========================================

async fn list_cameras(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.list())
}

async fn create_camera(
    State(state): State<AppState>,
    Json(req): Json<CreateCameraRequest>,
) -> impl IntoResponse {
    match state.registry.add(req) {
        Ok(camera) => (
            StatusCode::CREATED,
            Json(CameraResponse::success("Camera added successfully", Some(camera))),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_camera(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.registry.get(&id) {
        Some(camera) => Json(camera).into_response(),
        None => Error::camera_not_found(&id).into_response(),
    }
}

async fn update_camera(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateCameraRequest>,
) -> impl IntoResponse {
    match state.connections.update_camera(&id, req).await {
        Ok(camera) => Json(CameraResponse::success(
            "Camera updated successfully",
            Some(camera),
        ))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn delete_camera(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.connections.delete_camera(&id).await {
        Ok(()) => Json(CameraResponse::success("Camera deleted successfully", None)).into_response(),
        Err(e) => e.into_response(),
    }
}

// ========================================
// Diagnostics
// ========================================

async fn test_connection(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.diagnostics.test_camera(&state.registry, &id).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn test_stream(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.connections.test_stream(&id).await {
        Ok(check) => {
            let status = if check.success {
                StatusCode::OK
            } else {
                StatusCode::BAD_REQUEST
            };
            (status, Json(check)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

// ========================================
// Lifecycle
// ========================================

async fn connect_camera(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.connections.connect(&id).await {
        Ok(camera) => Json(CameraResponse::success("Connected successfully", Some(camera))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn disconnect_camera(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.connections.disconnect(&id).await {
        Ok(camera) => Json(CameraResponse::success("Disconnected successfully", Some(camera))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn control_camera(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ControlRequest>,
) -> impl IntoResponse {
    let action = match req.action.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => match raw.parse::<CameraAction>() {
            Ok(action) => action,
            Err(e) => return e.into_response(),
        },
        _ => return Error::Validation("Action not specified".to_string()).into_response(),
    };

    match state.connections.control(&id, action) {
        Ok(message) => Json(CameraResponse::success(message, state.registry.get(&id))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn control_status(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.connections.movement_status(&id) {
        Ok(status) => Json(status).into_response(),
        Err(e) => e.into_response(),
    }
}

// ========================================
// Streaming
// ========================================

async fn stream_url(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let Some(camera) = state.registry.get(&id) else {
        return Error::camera_not_found(&id).into_response();
    };

    if camera.status != crate::camera_registry::CameraStatus::Online {
        return Error::NotConnected(id).into_response();
    }

    Json(StreamUrlResponse {
        success: true,
        stream_url: manifest_url(&id),
        connection: state.connections.connection_info(&id),
    })
    .into_response()
}

async fn serve_stream_file(
    State(state): State<AppState>,
    Path((id, file)): Path<(String, String)>,
) -> impl IntoResponse {
    if !state.connections.is_active(&id) {
        return Error::NotFound(format!("No active stream for camera {}", id)).into_response();
    }

    match state.streams.read(&id, &file).await {
        Ok(stream_file) => stream_file.into_response(),
        Err(e) => e.into_response(),
    }
}
