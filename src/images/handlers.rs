use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    routing::post,
    Json, Router,
};
use tracing::{debug, instrument};

use super::dto::UploadResponse;
use super::services::{upload_profile_image, FileUpload};
use crate::{error::AppError, state::AppState};

// Boundaries, part headers and the `size` field on top of the file itself.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

pub fn upload_routes(max_upload_bytes: u64) -> Router<AppState> {
    let limit = usize::try_from(max_upload_bytes.saturating_add(MULTIPART_OVERHEAD))
        .unwrap_or(usize::MAX);
    Router::new()
        .route("/users/:id/profile-image", post(upload_profile_image_multipart))
        .layer(DefaultBodyLimit::max(limit))
}

/// POST /users/:id/profile-image (multipart)
/// Parts: optional `size` (declared byte count) first, then `file`.
#[instrument(skip(state, mp))]
pub async fn upload_profile_image_multipart(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    mut mp: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut declared_size = None;

    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "size" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("read size part: {e}")))?;
                let size = text.trim().parse::<u64>().map_err(|_| {
                    AppError::Validation(format!("size must be a byte count, got {text:?}"))
                })?;
                declared_size = Some(size);
            }
            "file" => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::Validation("file part has no filename".into()))?;
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                if declared_size.is_none() {
                    // A size part after the file is never read.
                    debug!(
                        max = state.config.max_upload_bytes,
                        "no size part before file; bounding by config"
                    );
                }

                let user = upload_profile_image(
                    &state,
                    &user_id,
                    FileUpload {
                        filename,
                        content_type,
                        declared_size,
                        body: field,
                    },
                )
                .await?;

                return Ok(Json(UploadResponse {
                    success: true,
                    image_uri: user.image_uri,
                }));
            }
            other => debug!(part = other, "ignoring multipart part"),
        }
    }

    Err(AppError::Validation("multipart body has no file part".into()))
}
