// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Upload validation
//!
//! Enforces the declared file type and the maximum payload size before any
//! decoding work is done. Only the filename extension is inspected; the file
//! content is not sniffed here, so this is not a security boundary.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Default maximum upload size (5MB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Extensions accepted by default
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// An image as handed over by the multipart receiver
#[derive(Debug, Clone)]
pub struct UploadedImage {
    /// Raw file bytes
    pub bytes: Vec<u8>,
    /// Filename declared by the client
    pub filename: String,
    /// Content type declared by the client, if any
    pub content_type: Option<String>,
}

impl UploadedImage {
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>, content_type: Option<String>) -> Self {
        Self {
            bytes,
            filename: filename.into(),
            content_type,
        }
    }

    /// Size of the payload in bytes
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Lowercased extension of the declared filename
    pub fn extension(&self) -> Option<String> {
        file_extension(&self.filename)
    }
}

fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("File is too large: {size} bytes (max: {limit} bytes)")]
    TooLarge { size: usize, limit: usize },

    #[error("Only image files are allowed ({})", .allowed.join(", "))]
    UnsupportedType {
        filename: String,
        allowed: Vec<String>,
    },

    #[error("Request body exceeds the maximum upload size of {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("No file uploaded in field '{0}'")]
    MissingField(String),

    #[error("{0}")]
    Malformed(String),
}

/// Upload limits, configurable per deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadPolicy {
    /// Maximum accepted payload size in bytes
    pub max_bytes: usize,
    /// Accepted filename extensions (compared case-insensitively)
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl UploadPolicy {
    /// Check a payload size against the limit
    pub fn check_size(&self, size: usize) -> Result<(), ValidationError> {
        if size > self.max_bytes {
            return Err(ValidationError::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Check that the filename carries one of the allowed extensions
    pub fn check_extension(&self, filename: &str) -> Result<(), ValidationError> {
        let extension = file_extension(filename);

        let allowed = extension.as_deref().is_some_and(|ext| {
            self.allowed_extensions
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(ext))
        });

        if !allowed {
            return Err(ValidationError::UnsupportedType {
                filename: filename.to_string(),
                allowed: self.allowed_extensions.clone(),
            });
        }
        Ok(())
    }

    /// Validate an upload; size is checked first, then the extension.
    pub fn validate(&self, upload: UploadedImage) -> Result<UploadedImage, ValidationError> {
        self.check_size(upload.byte_len())?;
        if let Err(e) = self.check_extension(&upload.filename) {
            debug!(extension = ?upload.extension(), "Extension not allowed");
            return Err(e);
        }
        Ok(upload)
    }
}
