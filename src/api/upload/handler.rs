// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Upload endpoint handler

use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use tracing::{debug, warn};

use super::response::UploadResponse;
use crate::api::errors::ApiError;
use crate::api::http_server::AppState;
use crate::vision::{PipelineError, UploadedImage, ValidationError};

/// Multipart field carrying the image file
pub const IMAGE_FIELD: &str = "image";

/// POST /upload - Detect objects in an uploaded image
///
/// Accepts `multipart/form-data` with the image in the `image` field and
/// returns the detections found in it.
///
/// # Response
/// - `predictions`: list of `{ bbox: [x, y, width, height], className, probability }`
///
/// # Errors
/// - 503 Service Unavailable: detector still loading (checked before the body is read)
/// - 400 Bad Request: wrong file extension, missing `image` field, malformed multipart
/// - 413 Payload Too Large: file larger than the configured limit
/// - 500 Internal Server Error: image could not be decoded or detection failed
pub async fn upload_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let pipeline = state.pipeline.as_ref();

    // 1. Gate first, so nothing is read while the detector is unavailable
    if let Err(e) = pipeline.check_ready() {
        return Err(pipeline.reject(e).into());
    }

    let mut multipart = multipart.map_err(|e| {
        warn!("Malformed multipart request: {}", e);
        pipeline.reject(ValidationError::Malformed(e.to_string()).into())
    })?;

    // 2. Find the image field, stopping as soon as it exceeds the size limit
    let limit = pipeline.upload_policy().max_bytes;
    let mut upload = None;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| pipeline.reject(multipart_error(e, limit).into()))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| pipeline.reject(multipart_error(e, limit).into()))?
        {
            bytes.extend_from_slice(&chunk);
            if let Err(e) = pipeline.upload_policy().check_size(bytes.len()) {
                debug!("Upload '{}' exceeded {} bytes", filename, limit);
                return Err(pipeline.reject(PipelineError::Validation(e)).into());
            }
        }

        upload = Some(UploadedImage::new(bytes, filename, content_type));
        break;
    }

    let upload = upload.ok_or_else(|| {
        pipeline.reject(ValidationError::MissingField(IMAGE_FIELD.to_string()).into())
    })?;

    debug!(
        "Upload received: '{}' ({} bytes)",
        upload.filename,
        upload.byte_len()
    );

    // 3. Validate, decode, detect
    let predictions = pipeline.run(upload).await?;
    Ok(Json(UploadResponse::from(predictions)))
}

fn multipart_error(err: MultipartError, limit: usize) -> ValidationError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ValidationError::BodyTooLarge { limit };
    }
    warn!("Failed to read multipart body: {}", err);
    ValidationError::Malformed(err.body_text())
}
