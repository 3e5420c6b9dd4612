//! WebAPI - HTTP Endpoints
//!
//! ## Responsibilities
//!
//! - Live MJPEG streaming per camera
//! - Recording toggle and telemetry queries
//! - Embedded dashboard page

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let scorer_ok = match state.scorer.as_ref() {
        Some(scorer) => scorer.health_check().await,
        None => false,
    };

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cameras: state.pipelines.len(),
        scorer_connected: scorer_ok,
    };

    Json(response)
}

/// Status endpoint
pub async fn device_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "device_type": "edgecam",
        "firmware_version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "cameras": state.pipelines.keys().collect::<Vec<_>>(),
    }))
}
