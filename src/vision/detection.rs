// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Detection schema and the detector capability
//!
//! Detectors return [`RawDetection`]s in whatever form their runtime
//! produces; [`normalize_detections`] turns them into the fixed
//! [`Detection`] schema right after the call so nothing downstream depends
//! on a detector's native output.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use super::tensor::Tensor;

/// One predicted object
///
/// `bbox` is `[x, y, width, height]` in pixels, with `(x, y)` the top-left
/// corner. Serialized with the canonical wire names `className` and
/// `probability`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: [f64; 4],
    #[serde(rename = "className")]
    pub class_name: String,
    pub probability: f64,
}

impl Detection {
    /// Scale the box by per-axis factors
    pub fn scaled(mut self, sx: f64, sy: f64) -> Self {
        self.bbox = [
            self.bbox[0] * sx,
            self.bbox[1] * sy,
            self.bbox[2] * sx,
            self.bbox[3] * sy,
        ];
        self
    }
}

/// Detections in detector output order
pub type DetectionBatch = Vec<Detection>;

/// Detector output before schema validation
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    /// `[x, y, width, height]` in tensor pixel units
    pub bbox: [f64; 4],
    pub label: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectionError {
    #[error("Detection {index} has a non-finite value")]
    NonFinite { index: usize },

    #[error("Detection {index} has a negative box extent")]
    NegativeExtent { index: usize },
}

/// Validate raw detector output into the wire schema.
///
/// Scores are clamped into `[0, 1]`; boxes with non-finite numbers or
/// negative width/height are rejected. Order is preserved.
pub fn normalize_detections(raw: Vec<RawDetection>) -> Result<DetectionBatch, DetectionError> {
    raw.into_iter()
        .enumerate()
        .map(|(index, det)| {
            if det.bbox.iter().any(|v| !v.is_finite()) || !det.score.is_finite() {
                return Err(DetectionError::NonFinite { index });
            }
            if det.bbox[2] < 0.0 || det.bbox[3] < 0.0 {
                return Err(DetectionError::NegativeExtent { index });
            }
            Ok(Detection {
                bbox: det.bbox,
                class_name: det.label,
                probability: det.score.clamp(0.0, 1.0),
            })
        })
        .collect()
}

/// Opaque object detection capability
pub trait Detector: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Whether `detect` may run concurrently from several threads.
    /// Detectors returning `false` get their calls serialized.
    fn concurrency_safe(&self) -> bool {
        false
    }

    /// Run detection on one image tensor
    fn detect(&self, tensor: &Tensor) -> anyhow::Result<Vec<RawDetection>>;
}

/// Produces detector handles; called once for the shared instance, or once
/// per worker in offloaded mode.
pub trait DetectorFactory: Send + Sync {
    fn load(&self) -> anyhow::Result<Arc<dyn Detector>>;
}

impl<F> DetectorFactory for F
where
    F: Fn() -> anyhow::Result<Arc<dyn Detector>> + Send + Sync,
{
    fn load(&self) -> anyhow::Result<Arc<dyn Detector>> {
        self()
    }
}
