use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::storage::{announce_upload, read_upload_form, UploadResponse};
use crate::api::response::{ApiError, AppJson, AppQuery, JSend};
use crate::blob_store::byte_stream;
use crate::key::ObjectKey;
use crate::storage::models::{User, UserFile};
use crate::AppState;

/// Category under which profile pictures are stored.
pub const PROFILE_PICTURE_CATEGORY: &str = "profile-pictures";

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub profile_picture_url: Option<String>,
    pub profile_picture_key: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFileResponse {
    pub relative_path: String,
    pub location: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePictureParams {
    pub tenant_id: String,
    pub company: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<Vec<UserResponse>>>, ApiError> {
    let users = state.db.list_users()?;

    Ok(JSend::success(users.iter().map(user_to_response).collect()))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<JSend<UserResponse>>, ApiError> {
    let user = find_user(&state, id)?;
    Ok(JSend::success(user_to_response(&user)))
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<CreateUserRequest>,
) -> Result<Json<JSend<UserResponse>>, ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }

    let user = User::new(name);
    state.db.put_user(&user)?;

    tracing::debug!(user_id = %user.id, "Created user");
    Ok(JSend::success(user_to_response(&user)))
}

pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<JSend<()>>, ApiError> {
    let deleted = state.db.delete_user(id)?;

    if !deleted {
        return Err(ApiError::not_found("User not found"));
    }

    tracing::debug!(user_id = %id, "Deleted user");
    Ok(JSend::success(()))
}

/// Store a profile picture at `{tenantId}/{company}/profile-pictures/{userId}`
/// and link it to the user.
pub async fn upload_profile_picture(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    AppQuery(params): AppQuery<ProfilePictureParams>,
    multipart: Multipart,
) -> Result<Json<JSend<UploadResponse>>, ApiError> {
    find_user(&state, id)?;

    let form = read_upload_form(multipart, state.config.max_upload_size).await?;
    let file = form
        .file
        .ok_or_else(|| ApiError::bad_request("file field is required"))?;

    tracing::info!(user_id = %id, tenant_id = %params.tenant_id, "Uploading profile picture");

    let result = state
        .gateway
        .upload(
            &params.tenant_id,
            &params.company,
            PROFILE_PICTURE_CATEGORY,
            &id.to_string(),
            byte_stream(file.data),
            &file.content_type,
        )
        .await?;

    // The object is durable; a failed link is logged, not returned.
    if let Err(e) = state
        .db
        .set_profile_picture(id, Some((&result.relative_key, &result.file_url)))
    {
        tracing::warn!(
            user_id = %id,
            key = %result.relative_key,
            error = %e,
            "Failed to link profile picture"
        );
    }
    announce_upload(&state, id, &result).await;

    Ok(JSend::success(UploadResponse::from(result)))
}

/// Delete the user's profile picture object and clear the association.
/// Only objects in the profile picture category are ever deleted here.
pub async fn delete_profile_picture(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<JSend<UserResponse>>, ApiError> {
    let user = find_user(&state, id)?;

    if let Some(raw_key) = user.profile_picture_key.as_deref() {
        match ObjectKey::parse(raw_key) {
            Ok(key) if key.category() == PROFILE_PICTURE_CATEGORY => {
                state.gateway.delete(&key).await?;
            }
            Ok(key) => {
                tracing::warn!(
                    user_id = %id,
                    key = %key,
                    "Profile picture points outside the profile picture category, keeping object"
                );
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %id,
                    key = raw_key,
                    error = %e,
                    "Stored profile picture key is invalid"
                );
            }
        }
    }

    let user = state
        .db
        .set_profile_picture(id, None)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(JSend::success(user_to_response(&user)))
}

/// Objects linked to the user by uploads carrying their id.
pub async fn list_user_files(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<JSend<Vec<UserFileResponse>>>, ApiError> {
    find_user(&state, id)?;
    let files = state.db.list_user_files(id)?;
    Ok(JSend::success(files.iter().map(file_to_response).collect()))
}

// ============================================================================
// Helpers
// ============================================================================

fn find_user(state: &AppState, id: Uuid) -> Result<User, ApiError> {
    state
        .db
        .get_user(id)?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

fn user_to_response(user: &User) -> UserResponse {
    UserResponse {
        id: user.id,
        name: user.name.clone(),
        profile_picture_url: user.profile_picture_url.clone(),
        profile_picture_key: user.profile_picture_key.clone(),
        created_at: user.created_at.to_rfc3339(),
        updated_at: user.updated_at.to_rfc3339(),
    }
}

fn file_to_response(file: &UserFile) -> UserFileResponse {
    UserFileResponse {
        relative_path: file.key.clone(),
        location: file.file_url.clone(),
        created_at: file.created_at.to_rfc3339(),
    }
}
