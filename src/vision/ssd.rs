// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! SSD object detection model on ONNX Runtime
//!
//! Expects the TensorFlow object detection export layout: an image input of
//! shape `[1, H, W, 3]` and four outputs (boxes as normalized
//! `[ymin, xmin, ymax, xmax]`, class ids, scores, detection count).

use anyhow::{anyhow, Context, Result};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::detection::{Detector, DetectorFactory, RawDetection};
use super::labels::LabelMap;
use super::tensor::{Tensor, TensorData};

/// Output tensor names of the exported model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsdOutputNames {
    pub boxes: String,
    pub classes: String,
    pub scores: String,
    pub count: String,
}

impl Default for SsdOutputNames {
    fn default() -> Self {
        Self {
            boxes: "detection_boxes".to_string(),
            classes: "detection_classes".to_string(),
            scores: "detection_scores".to_string(),
            count: "num_detections".to_string(),
        }
    }
}

/// Configuration for loading the SSD detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsdDetectorConfig {
    /// Path to the ONNX model file
    pub model_path: PathBuf,
    /// Optional labels file; COCO categories are used when absent
    pub labels_path: Option<PathBuf>,
    /// Minimum score for a detection to be reported
    pub score_threshold: f32,
    /// Maximum number of detections reported per image
    pub max_detections: usize,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
    pub outputs: SsdOutputNames,
}

impl Default for SsdDetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("./models/ssd_mobilenet.onnx"),
            labels_path: None,
            score_threshold: 0.5,
            max_detections: 20,
            intra_threads: 4,
            outputs: SsdOutputNames::default(),
        }
    }
}

/// Positions of the four outputs in the session's output list
#[derive(Debug, Clone, Copy)]
struct OutputSlots {
    boxes: usize,
    classes: usize,
    scores: usize,
    count: usize,
}

/// SSD detector backed by an ONNX Runtime session
///
/// The session is guarded by a mutex, so concurrent callers are serialized
/// inside the detector.
pub struct OnnxSsdDetector {
    /// ONNX Runtime session (thread-safe)
    session: Arc<Mutex<Session>>,
    /// Model input name
    input_name: String,
    slots: OutputSlots,
    labels: LabelMap,
    score_threshold: f32,
    max_detections: usize,
}

impl std::fmt::Debug for OnnxSsdDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxSsdDetector")
            .field("input_name", &self.input_name)
            .field("score_threshold", &self.score_threshold)
            .field("max_detections", &self.max_detections)
            .finish_non_exhaustive()
    }
}

impl OnnxSsdDetector {
    /// Load the detection model from disk
    ///
    /// # Errors
    /// Returns error if:
    /// - Model or labels file not found
    /// - ONNX Runtime initialization fails
    /// - One of the configured outputs is missing from the model
    pub fn load(config: &SsdDetectorConfig) -> Result<Self> {
        let model_path = config.model_path.as_path();
        if !model_path.exists() {
            anyhow::bail!("Detection model not found: {}", model_path.display());
        }

        let labels = match &config.labels_path {
            Some(path) => LabelMap::from_file(path)?,
            None => LabelMap::coco(),
        };

        info!("Loading detection model from {}", model_path.display());

        let session = Session::builder()
            .context("Failed to create session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("Failed to set optimization level")?
            .with_intra_threads(config.intra_threads)
            .context("Failed to set intra threads")?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("Failed to load detection model from {}", model_path.display())
            })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| anyhow!("Detection model has no inputs"))?;

        let output_names: Vec<String> = session
            .outputs
            .iter()
            .map(|output| output.name.clone())
            .collect();
        let slots = OutputSlots {
            boxes: output_slot(&output_names, &config.outputs.boxes)?,
            classes: output_slot(&output_names, &config.outputs.classes)?,
            scores: output_slot(&output_names, &config.outputs.scores)?,
            count: output_slot(&output_names, &config.outputs.count)?,
        };

        debug!(
            "Detection model loaded - input: {}, outputs: {:?}",
            input_name, output_names
        );
        info!("✅ Detection model loaded ({} labels)", labels.len());

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            input_name,
            slots,
            labels,
            score_threshold: config.score_threshold.clamp(0.0, 1.0),
            max_detections: config.max_detections,
        })
    }
}

fn output_slot(names: &[String], wanted: &str) -> Result<usize> {
    names
        .iter()
        .position(|name| name == wanted)
        .ok_or_else(|| anyhow!("Model output '{}' not found (have {:?})", wanted, names))
}

impl Detector for OnnxSsdDetector {
    fn name(&self) -> &str {
        "onnx-ssd"
    }

    fn concurrency_safe(&self) -> bool {
        true
    }

    fn detect(&self, tensor: &Tensor) -> Result<Vec<RawDetection>> {
        let dims = tensor.image_dimensions();

        // Models accept a batch axis; single images get one added
        let input_value = match tensor.data() {
            TensorData::U8(_) => {
                let array = tensor
                    .to_batched_u8()
                    .ok_or_else(|| anyhow!("Invalid input shape: {:?}", tensor.shape()))?;
                Value::from_array(array)
                    .context("Failed to create input tensor")?
                    .into_dyn()
            }
            TensorData::F32(_) => {
                let array = tensor
                    .to_batched_f32()
                    .ok_or_else(|| anyhow!("Invalid input shape: {:?}", tensor.shape()))?;
                Value::from_array(array)
                    .context("Failed to create input tensor")?
                    .into_dyn()
            }
        };

        let (boxes, classes, scores, count) = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| anyhow!("Detection session lock poisoned"))?;

            let outputs = session
                .run(ort::inputs![&self.input_name => input_value])
                .context("Detection inference failed")?;

            let extract = |slot: usize| -> Result<Vec<f32>> {
                let array = outputs[slot]
                    .try_extract_array::<f32>()
                    .context("Failed to extract output tensor")?;
                Ok(array.iter().copied().collect())
            };

            (
                extract(self.slots.boxes)?,
                extract(self.slots.classes)?,
                extract(self.slots.scores)?,
                extract(self.slots.count)?,
            )
        };

        let count = count.first().map(|c| c.max(0.0) as usize).unwrap_or(scores.len());
        let detections = decode_ssd_outputs(
            &SsdOutputs {
                boxes: &boxes,
                classes: &classes,
                scores: &scores,
                count,
            },
            dims,
            &self.labels,
            self.score_threshold,
            self.max_detections,
        );

        debug!("Detected {} objects", detections.len());
        Ok(detections)
    }
}

/// Flattened SSD output tensors for one image
pub struct SsdOutputs<'a> {
    pub boxes: &'a [f32],
    pub classes: &'a [f32],
    pub scores: &'a [f32],
    pub count: usize,
}

/// Convert SSD outputs to pixel-space `[x, y, width, height]` detections
///
/// `dims` is the `(height, width)` of the input image. Detections below
/// `threshold` are dropped; output order is the model's.
pub fn decode_ssd_outputs(
    outputs: &SsdOutputs<'_>,
    dims: (usize, usize),
    labels: &LabelMap,
    threshold: f32,
    max_detections: usize,
) -> Vec<RawDetection> {
    let (height, width) = (dims.0 as f64, dims.1 as f64);
    let available = outputs
        .count
        .min(outputs.scores.len())
        .min(outputs.classes.len())
        .min(outputs.boxes.len() / 4);

    (0..available)
        .filter(|&i| outputs.scores[i] >= threshold)
        .take(max_detections)
        .map(|i| {
            let b = &outputs.boxes[i * 4..i * 4 + 4];
            let ymin = (b[0] as f64).clamp(0.0, 1.0);
            let xmin = (b[1] as f64).clamp(0.0, 1.0);
            let ymax = (b[2] as f64).clamp(0.0, 1.0);
            let xmax = (b[3] as f64).clamp(0.0, 1.0);
            RawDetection {
                bbox: [
                    xmin * width,
                    ymin * height,
                    (xmax - xmin).max(0.0) * width,
                    (ymax - ymin).max(0.0) * height,
                ],
                label: labels.name(outputs.classes[i].round() as u32),
                score: outputs.scores[i] as f64,
            }
        })
        .collect()
}

/// Loads [`OnnxSsdDetector`] handles from a fixed configuration
#[derive(Debug, Clone)]
pub struct SsdDetectorFactory {
    config: SsdDetectorConfig,
}

impl SsdDetectorFactory {
    pub fn new(config: SsdDetectorConfig) -> Self {
        Self { config }
    }
}

impl DetectorFactory for SsdDetectorFactory {
    fn load(&self) -> Result<Arc<dyn Detector>> {
        Ok(Arc::new(OnnxSsdDetector::load(&self.config)?))
    }
}
