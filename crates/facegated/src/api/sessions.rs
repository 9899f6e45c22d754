//! Camera-backed sessions run on the daemon's engine thread.
//!
//! Dropping the HTTP request drops the engine reply channel, which aborts the
//! session at its next frame.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use facegate_core::Matcher;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::ApiError;
use super::facial::{require_user_id, EnrollResponse, IdentifyResponse};
use crate::store::{NewEnrollment, StoreError};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnrollRequest {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnrollResponse {
    #[serde(flatten)]
    pub record: EnrollResponse,
    pub sample_count: usize,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// POST /facial-recognition/sessions/enroll
pub async fn enroll_session(
    State(state): State<AppState>,
    payload: Result<Json<SessionEnrollRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SessionEnrollResponse>), ApiError> {
    let Json(req) = payload?;
    let user_id = require_user_id(req.user_id)?;

    // Refuse before the camera is touched.
    if let Some(existing) = state.store.find_by_identity(&user_id).await? {
        return Err(StoreError::AlreadyEnrolled {
            registered_at: existing.created_at,
        }
        .into());
    }

    let capture = state.engine.enroll(&user_id).await?;
    let sample_count = capture.aggregate.sample_count;
    let preview_path = capture.preview_path;
    let stored = state
        .store
        .enroll(NewEnrollment {
            identity_id: user_id,
            vector: capture.aggregate.descriptor.into_vec(),
            quality_score: capture.aggregate.quality_score,
            source_image_ref: preview_path.as_ref().map(|p| p.display().to_string()),
        })
        .await;
    let record = match stored {
        Ok(record) => record,
        Err(e) => {
            if let Some(path) = &preview_path {
                discard_preview(path).await;
            }
            return Err(e.into());
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(SessionEnrollResponse {
            record: record.into(),
            sample_count,
        }),
    ))
}

/// Remove a preview whose enrollment was not stored.
async fn discard_preview(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove orphaned preview");
    }
}

/// POST /facial-recognition/sessions/check-in
pub async fn check_in_session(State(state): State<AppState>) -> Result<Json<IdentifyResponse>, ApiError> {
    let detection = state.engine.probe().await?;
    let gallery = state.store.gallery().await?;
    let outcome = state.matcher.identify(&detection.descriptor, &gallery);
    match &outcome {
        facegate_core::MatchOutcome::Match(c) => {
            tracing::info!(user_id = %c.identity_id, distance = c.distance, "check-in matched")
        }
        other => tracing::info!(outcome = ?other, "check-in without a match"),
    }
    Ok(Json(outcome.into()))
}

/// POST /facial-recognition/sessions/cancel
pub async fn cancel_session(State(state): State<AppState>) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: state.engine.cancel(),
    })
}
