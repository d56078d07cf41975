use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use uuid::Uuid;

use duet_types::api::UploadResponse;

use crate::error::ApiError;
use crate::state::AppState;

/// 25 MB upload limit
pub const MAX_UPLOAD_SIZE: usize = 25 * 1024 * 1024;

/// Public path prefix uploaded files are served under.
pub const UPLOAD_URL_PREFIX: &str = "/uploads";

/// File extension for a media content type. Unknown types are stored as `.bin`.
pub fn extension_for(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        "audio/webm" => "weba",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/mp4" | "audio/aac" => "m4a",
        _ => "bin",
    }
}

/// POST /upload: raw body, media type in `Content-Type`. Writes the bytes to
/// the upload dir and returns the public URL to put in a message's `mediaUrl`.
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("empty upload"));
    }
    if bytes.len() > MAX_UPLOAD_SIZE {
        return Err(ApiError::PayloadTooLarge);
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let file_name = format!("{}.{}", Uuid::new_v4(), extension_for(&content_type));
    let sha256 = hex::encode(Sha256::digest(&bytes));

    // Ensure uploads directory exists
    tokio::fs::create_dir_all(&state.upload_dir).await.map_err(|e| {
        error!("Failed to create upload dir {}: {}", state.upload_dir.display(), e);
        ApiError::Internal(e.into())
    })?;

    let file_path = state.upload_dir.join(&file_name);
    let mut file = tokio::fs::File::create(&file_path).await.map_err(|e| {
        error!("Failed to create file {}: {}", file_path.display(), e);
        ApiError::Internal(e.into())
    })?;
    file.write_all(&bytes).await.map_err(|e| {
        error!("Failed to write file {}: {}", file_path.display(), e);
        ApiError::Internal(e.into())
    })?;
    file.flush().await.map_err(|e| ApiError::Internal(e.into()))?;

    info!("Stored upload {} ({} bytes, {})", file_name, bytes.len(), content_type);

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            url: format!("{}/{}", UPLOAD_URL_PREFIX, file_name),
            size: bytes.len() as u64,
            content_type,
            sha256,
        }),
    ))
}
