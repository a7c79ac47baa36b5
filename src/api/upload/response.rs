// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Upload response types

use serde::{Deserialize, Serialize};

use crate::vision::{Detection, DetectionBatch};

/// Response from a successful detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Detections in detector order, possibly empty
    pub predictions: Vec<Detection>,
}

impl From<DetectionBatch> for UploadResponse {
    fn from(predictions: DetectionBatch) -> Self {
        Self { predictions }
    }
}
