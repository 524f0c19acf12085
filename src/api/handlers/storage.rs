use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::response::{ApiError, AppQuery, JSend};
use crate::blob_store::byte_stream;
use crate::gateway::{GatewayError, UploadResult};
use crate::key::ObjectKey;
use crate::notify::FileCreated;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub location: String,
    pub relative_path: String,
}

impl From<UploadResult> for UploadResponse {
    fn from(result: UploadResult) -> Self {
        Self {
            location: result.file_url,
            relative_path: result.relative_key.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadParams {
    pub tenant_id: String,
    pub company: String,
    pub category: String,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub prefix: Option<String>,
}

/// The `file` part of a multipart upload.
pub(super) struct FilePart {
    pub data: Bytes,
    pub content_type: String,
}

/// A parsed multipart upload form: the file part plus any text fields.
pub(super) struct UploadForm {
    pub file: Option<FilePart>,
    pub fields: HashMap<String, String>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn upload_object(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<UploadParams>,
    multipart: Multipart,
) -> Result<Json<JSend<UploadResponse>>, ApiError> {
    let mut form = read_upload_form(multipart, state.config.max_upload_size).await?;

    let file = form
        .file
        .take()
        .ok_or_else(|| ApiError::bad_request("file field is required"))?;
    let file_id = form
        .fields
        .remove("fileId")
        .ok_or_else(|| ApiError::bad_request("fileId field is required"))?;
    let user_id = form
        .fields
        .remove("userId")
        .map(|raw| {
            raw.parse::<Uuid>()
                .map_err(|_| ApiError::bad_request(format!("userId '{raw}' is not a valid UUID")))
        })
        .transpose()?;

    tracing::info!(
        tenant_id = %params.tenant_id,
        company = %params.company,
        category = %params.category,
        file_id = %file_id,
        byte_size = file.data.len(),
        "Uploading file"
    );

    let result = state
        .gateway
        .upload(
            &params.tenant_id,
            &params.company,
            &params.category,
            &file_id,
            byte_stream(file.data),
            &file.content_type,
        )
        .await?;

    if let Some(user_id) = user_id {
        announce_upload(&state, user_id, &result).await;
    }

    Ok(JSend::success(UploadResponse::from(result)))
}

pub async fn download_object(
    State(state): State<Arc<AppState>>,
    Path(blob_name): Path<String>,
) -> Result<Response, ApiError> {
    let key = parse_blob_name(&blob_name)?;
    let object = state.gateway.download(&key).await?;

    let mut response = (StatusCode::OK, Body::from_stream(object.body)).into_response();
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        object
            .content_type
            .parse()
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );

    if let Some(size) = object.size {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    }

    if let Some(etag) = object
        .revision
        .and_then(|rev| format!("\"{rev}\"").parse::<HeaderValue>().ok())
    {
        headers.insert(header::ETAG, etag);
    }

    if let Ok(value) = attachment_disposition(key.file_id()).parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

/// Download or delete with nothing after the route prefix.
pub async fn missing_blob_name() -> ApiError {
    ApiError::bad_request("blob name must not be empty")
}

pub async fn delete_object(
    State(state): State<Arc<AppState>>,
    Path(blob_name): Path<String>,
) -> Result<Json<JSend<()>>, ApiError> {
    let key = parse_blob_name(&blob_name)?;
    state.gateway.delete(&key).await?;
    Ok(JSend::success(()))
}

pub async fn list_objects(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<ListParams>,
) -> Result<Json<JSend<Vec<String>>>, ApiError> {
    let prefix = params.prefix.as_deref().filter(|p| !p.is_empty());
    let keys = state
        .gateway
        .list_all(prefix)
        .await?;

    Ok(JSend::success(
        keys.into_iter().map(|key| key.to_string()).collect(),
    ))
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_blob_name(blob_name: &str) -> Result<ObjectKey, ApiError> {
    if blob_name.trim().is_empty() {
        return Err(ApiError::bad_request("blob name must not be empty"));
    }
    ObjectKey::parse(blob_name).map_err(|e| ApiError::from(GatewayError::from(e)))
}

/// `attachment` disposition with a quoted ASCII fallback name and the exact
/// name as RFC 5987 `filename*`.
fn attachment_disposition(file_id: &str) -> String {
    let fallback: String = file_id
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(file_id)
    )
}

/// Record the user association and notify downstream. Neither failure affects
/// the upload, which is already durable.
pub(super) async fn announce_upload(state: &AppState, user_id: Uuid, result: &UploadResult) {
    let key = &result.relative_key;

    if let Err(e) = state
        .associations
        .record_association(user_id, key, &result.file_url)
    {
        tracing::warn!(
            user_id = %user_id,
            tenant_id = key.tenant_id(),
            company = key.company(),
            category = key.category(),
            file_id = key.file_id(),
            error = %e,
            "Failed to record file association"
        );
    }

    let event = FileCreated {
        user_id,
        company: key.company().to_string(),
        category: key.category().to_string(),
        file_url: result.file_url.clone(),
        relative_path: key.to_string(),
        created_at: Utc::now(),
    };
    state.notifier.file_created(&event).await;
}

/// Read every multipart field, buffering the `file` part and collecting text fields.
pub(super) async fn read_upload_form(
    mut multipart: Multipart,
    max_upload_size: u64,
) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm {
        file: None,
        fields: HashMap::new(),
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        if field_name == "file" {
            let file_name = field.file_name().map(|s| s.to_string());
            let declared_type = field.content_type().map(|s| s.to_string());

            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed to read file: {e}")))?;

            if data.len() as u64 > max_upload_size {
                return Err(ApiError::payload_too_large(format!(
                    "File exceeds maximum upload size of {max_upload_size} bytes"
                )));
            }

            form.file = Some(FilePart {
                data,
                content_type: resolve_content_type(declared_type, file_name.as_deref()),
            });
        } else if !field_name.is_empty() {
            let value = field
                .text()
                .await
                .map_err(|e| ApiError::bad_request(format!("Invalid {field_name}: {e}")))?;
            form.fields.insert(field_name, value);
        }
    }

    Ok(form)
}

/// Multipart Content-Type, or a guess from the filename, or octet-stream.
fn resolve_content_type(declared: Option<String>, file_name: Option<&str>) -> String {
    declared
        .filter(|ct| ct != "application/octet-stream")
        .or_else(|| {
            file_name
                .and_then(|n| mime_guess::from_path(n).first())
                .map(|m| m.to_string())
        })
        .unwrap_or_else(|| "application/octet-stream".to_string())
}
