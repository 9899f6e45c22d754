//! Descriptor registration, lookup, removal and identification.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use facegate_core::{Candidate, MatchOutcome};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::store::{FaceDescriptorRecord, NewEnrollment};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    pub user_id: String,
    pub descriptor: Vec<f32>,
    #[serde(default)]
    pub photo_url: Option<String>,
    pub quality_score: f32,
    #[serde(default)]
    pub is_primary: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollResponse {
    pub id: String,
    pub user_id: String,
    pub is_primary: bool,
    pub quality_score: f32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_image_ref: Option<String>,
}

impl From<FaceDescriptorRecord> for EnrollResponse {
    fn from(r: FaceDescriptorRecord) -> Self {
        Self {
            id: r.id,
            user_id: r.identity_id,
            is_primary: r.is_primary,
            quality_score: r.quality_score,
            created_at: r.created_at,
            source_image_ref: r.source_image_ref,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct IdentifyRequest {
    pub descriptor: Vec<f32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchBody {
    pub user_id: String,
    pub descriptor_id: String,
    pub distance: f32,
    pub confidence: f32,
}

impl From<Candidate> for MatchBody {
    fn from(c: Candidate) -> Self {
        Self {
            user_id: c.identity_id,
            descriptor_id: c.descriptor_id,
            distance: c.distance,
            confidence: c.confidence,
        }
    }
}

/// Identification outcome. No-match and ambiguity are answers, not errors.
#[derive(Debug, Serialize)]
#[serde(tag = "status")]
pub enum IdentifyResponse {
    #[serde(rename = "match")]
    Match {
        #[serde(flatten)]
        best: MatchBody,
    },
    #[serde(rename = "noMatch")]
    NoMatch {
        #[serde(rename = "nearestDistance")]
        nearest_distance: Option<f32>,
    },
    #[serde(rename = "ambiguous")]
    Ambiguous { distance: f32, candidates: Vec<MatchBody> },
}

impl From<MatchOutcome> for IdentifyResponse {
    fn from(outcome: MatchOutcome) -> Self {
        match outcome {
            MatchOutcome::Match(c) => IdentifyResponse::Match { best: c.into() },
            MatchOutcome::NoMatch { nearest_distance } => IdentifyResponse::NoMatch { nearest_distance },
            MatchOutcome::Ambiguous { distance, candidates } => IdentifyResponse::Ambiguous {
                distance,
                candidates: candidates.into_iter().map(MatchBody::from).collect(),
            },
        }
    }
}

pub(crate) fn require_user_id(user_id: Option<String>) -> Result<String, ApiError> {
    match user_id.map(|u| u.trim().to_string()) {
        Some(u) if !u.is_empty() => Ok(u),
        _ => Err(ApiError::BadRequest("userId is required".into())),
    }
}

/// POST /facial-recognition
pub async fn register_descriptor(
    State(state): State<AppState>,
    payload: Result<Json<EnrollRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EnrollResponse>), ApiError> {
    let Json(req) = payload?;
    let user_id = require_user_id(Some(req.user_id))?;
    if req.is_primary == Some(false) {
        return Err(ApiError::BadRequest(
            "only one descriptor per member is kept; isPrimary must be true".into(),
        ));
    }

    let record = state
        .store
        .enroll(NewEnrollment {
            identity_id: user_id,
            vector: req.descriptor,
            quality_score: req.quality_score,
            source_image_ref: req.photo_url,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

/// GET /facial-recognition?userId=
///
/// Records are listed without their descriptor vector.
pub async fn list_descriptors(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<EnrollResponse>>, ApiError> {
    let Query(query) = query?;
    let user_id = require_user_id(query.user_id)?;
    let records = state.store.find_by_identity(&user_id).await?;
    Ok(Json(records.into_iter().map(EnrollResponse::from).collect()))
}

/// DELETE /facial-recognition/:id
pub async fn delete_descriptor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state.store.delete(&id).await?;
    Ok(Json(DeleteResponse { success: true, id }))
}

/// POST /facial-recognition/identify
pub async fn identify(
    State(state): State<AppState>,
    payload: Result<Json<IdentifyRequest>, JsonRejection>,
) -> Result<Json<IdentifyResponse>, ApiError> {
    let Json(req) = payload?;
    let gallery = state.store.gallery().await?;
    let outcome = state.matcher.identify_raw(req.descriptor, &gallery)?;
    tracing::debug!(gallery = gallery.len(), matched = outcome.is_match(), "identify");
    Ok(Json(outcome.into()))
}
