use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    Json,
};
use serde::Deserialize;

use super::error::ApiError;
use super::facial::require_user_id;
use crate::directory::{Member, MemberFilter};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembersQuery {
    #[serde(default)]
    pub with_face_descriptor: bool,
    #[serde(default)]
    pub without_face_descriptor: bool,
}

impl MembersQuery {
    fn filter(&self) -> Result<MemberFilter, ApiError> {
        match (self.with_face_descriptor, self.without_face_descriptor) {
            (true, true) => Err(ApiError::BadRequest(
                "withFaceDescriptor and withoutFaceDescriptor are mutually exclusive".into(),
            )),
            (true, false) => Ok(MemberFilter::WithDescriptor),
            (false, true) => Ok(MemberFilter::WithoutDescriptor),
            (false, false) => Ok(MemberFilter::All),
        }
    }
}

/// GET /facial-recognition/members
pub async fn list_members(
    State(state): State<AppState>,
    query: Result<Query<MembersQuery>, QueryRejection>,
) -> Result<Json<Vec<Member>>, ApiError> {
    let Query(query) = query?;
    let members = state.directory.list(query.filter()?).await?;
    Ok(Json(members))
}

/// POST /facial-recognition/members
pub async fn upsert_member(
    State(state): State<AppState>,
    payload: Result<Json<Member>, JsonRejection>,
) -> Result<Json<Member>, ApiError> {
    let Json(mut member) = payload?;
    member.user_id = require_user_id(Some(member.user_id))?;
    if member.display_name.trim().is_empty() {
        return Err(ApiError::BadRequest("displayName is required".into()));
    }
    state.directory.upsert(member.clone()).await?;
    Ok(Json(member))
}
