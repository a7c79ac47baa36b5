// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

use crate::vision::{PipelineError, ValidationError};

/// Body of every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    /// HTTP reason phrase of the status
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum ApiError {
    ServiceUnavailable(String),
    InvalidFileType(String),
    InvalidRequest(String),
    PayloadTooLarge { limit: usize },
    /// Detail is logged, never returned to the client
    InternalError(String),
}

impl ApiError {
    pub fn to_response(&self) -> ErrorResponse {
        let message = match self {
            ApiError::ServiceUnavailable(msg)
            | ApiError::InvalidFileType(msg)
            | ApiError::InvalidRequest(msg) => msg.clone(),
            ApiError::PayloadTooLarge { limit } => format!(
                "File exceeds the maximum upload size of {} bytes",
                limit
            ),
            ApiError::InternalError(_) => "Internal Server Error".to_string(),
        };

        ErrorResponse {
            error: self.reason().to_string(),
            message,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::InvalidFileType(_) | ApiError::InvalidRequest(_) => 400,
            ApiError::PayloadTooLarge { .. } => 413,
            ApiError::InternalError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            ApiError::InvalidFileType(_) | ApiError::InvalidRequest(_) => "Bad Request",
            ApiError::PayloadTooLarge { .. } => "Payload Too Large",
            ApiError::InternalError(_) => "Internal Server Error",
            ApiError::ServiceUnavailable(_) => "Service Unavailable",
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            ApiError::InvalidFileType(msg) => write!(f, "Invalid file type: {}", msg),
            ApiError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ApiError::PayloadTooLarge { limit } => {
                write!(f, "Payload too large (limit {} bytes)", limit)
            }
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::TooLarge { limit, .. } | ValidationError::BodyTooLarge { limit } => {
                ApiError::PayloadTooLarge { limit }
            }
            e @ ValidationError::UnsupportedType { .. } => ApiError::InvalidFileType(e.to_string()),
            e @ (ValidationError::MissingField(_) | ValidationError::Malformed(_)) => {
                ApiError::InvalidRequest(e.to_string())
            }
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotReady => ApiError::ServiceUnavailable(err.to_string()),
            PipelineError::Validation(e) => e.into(),
            PipelineError::Decode(e) => ApiError::InternalError(e.to_string()),
            PipelineError::Tensor(e) => ApiError::InternalError(e.to_string()),
            PipelineError::Inference(e) => ApiError::InternalError(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::InternalError(detail) = &self {
            error!("Request failed: {}", detail);
        }
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_response())).into_response()
    }
}
