//! HTTP error mapping. Every failure renders as `{error, code}` with a stable
//! `code` string.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use facegate_core::MatchError;
use facegate_hw::CameraError;
use serde_json::json;

use crate::engine::EngineError;
use crate::session::SessionError;
use crate::store::StoreError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Store(StoreError),
    Engine(EngineError),
    Match(MatchError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl From<MatchError> for ApiError {
    fn from(e: MatchError) -> Self {
        ApiError::Match(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

fn engine_status(e: &EngineError) -> (StatusCode, &'static str) {
    match e {
        EngineError::Busy => (StatusCode::SERVICE_UNAVAILABLE, "engine_busy"),
        EngineError::CameraDisabled => (StatusCode::SERVICE_UNAVAILABLE, "device_unavailable"),
        EngineError::DetectorUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "detector_unavailable"),
        EngineError::Spawn(_) | EngineError::ChannelClosed => {
            (StatusCode::SERVICE_UNAVAILABLE, "engine_unavailable")
        }
        EngineError::Session(e) => match e {
            SessionError::FaceLost { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "face_lost"),
            SessionError::QualityTooLow { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "quality_too_low"),
            SessionError::InsufficientSamples { .. } => (StatusCode::REQUEST_TIMEOUT, "insufficient_samples"),
            SessionError::Cancelled { .. } => (StatusCode::CONFLICT, "cancelled"),
            SessionError::Device(CameraError::DeviceUnavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "device_unavailable")
            }
            SessionError::Device(_) => (StatusCode::SERVICE_UNAVAILABLE, "capture_failed"),
            SessionError::Detector(_) => (StatusCode::INTERNAL_SERVER_ERROR, "detector_error"),
            SessionError::NotStarted | SessionError::Aggregate(_) | SessionError::Gate(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg.clone()),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or invalid bearer token".to_string(),
            ),
            ApiError::Store(StoreError::AlreadyEnrolled { registered_at }) => {
                let body = Json(json!({
                    "error": "identity already has a registered face descriptor",
                    "code": "already_enrolled",
                    "alreadyRegistered": true,
                    "registeredAt": registered_at,
                }));
                return (StatusCode::CONFLICT, body).into_response();
            }
            ApiError::Store(e) => {
                let (status, code) = match e {
                    StoreError::InvalidDescriptor(_) => (StatusCode::BAD_REQUEST, "invalid_descriptor"),
                    StoreError::InvalidQuality { .. } => (StatusCode::BAD_REQUEST, "invalid_quality"),
                    StoreError::QualityTooLow { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "quality_too_low"),
                    StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                    StoreError::AlreadyEnrolled { .. } => (StatusCode::CONFLICT, "already_enrolled"),
                    StoreError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
                };
                (status, code, e.to_string())
            }
            ApiError::Engine(e) => {
                let (status, code) = engine_status(e);
                (status, code, e.to_string())
            }
            ApiError::Match(e) => (StatusCode::BAD_REQUEST, "invalid_descriptor", e.to_string()),
        };

        if status.is_server_error() {
            tracing::error!(code, error = %message, "request failed");
        }

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(e: ApiError) -> StatusCode {
        e.into_response().status()
    }

    #[test]
    fn test_session_error_statuses() {
        let session = |e| ApiError::Engine(EngineError::Session(e));
        assert_eq!(
            status_of(session(SessionError::FaceLost { consecutive_misses: 1 })),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(session(SessionError::InsufficientSamples {
                collected: 3,
                required: 10
            })),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            status_of(session(SessionError::Cancelled { collected: 3 })),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(session(SessionError::Device(CameraError::DeviceUnavailable("x".into())))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(ApiError::Engine(EngineError::Busy)),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_store_error_statuses() {
        assert_eq!(
            status_of(ApiError::Store(StoreError::NotFound("x".into()))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ApiError::Store(StoreError::QualityTooLow {
                score: 0.1,
                threshold: 0.5
            })),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(ApiError::Store(StoreError::AlreadyEnrolled {
                registered_at: chrono::Utc::now()
            })),
            StatusCode::CONFLICT
        );
    }
}
