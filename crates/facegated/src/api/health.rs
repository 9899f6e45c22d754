use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::error::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub module: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub enrolled: usize,
    pub detector_loaded: bool,
    pub camera_enabled: bool,
    pub session_running: bool,
    pub match_threshold: f32,
    pub enroll_threshold: f32,
}

/// GET /health, unauthenticated.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        module: "facegated",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /status
pub async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    Ok(Json(StatusResponse {
        enrolled: state.store.count().await?,
        detector_loaded: state.engine.detector_loaded(),
        camera_enabled: state.engine.camera_enabled(),
        session_running: state.engine.is_busy(),
        match_threshold: state.matcher.threshold,
        enroll_threshold: state.store.enroll_threshold(),
    }))
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
