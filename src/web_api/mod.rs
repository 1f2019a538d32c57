//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes
//! - Request validation
//! - Response formatting

mod routes;

pub use routes::{create_router, manifest_url};

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: uptime,
        cameras: state.registry.len(),
        active_connections: state.connections.active_count(),
    })
}
