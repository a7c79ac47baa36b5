// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Object detection on uploaded images
//!
//! This module provides:
//! - Upload validation, decoding and resizing to the detector resolution
//! - Tensor construction in the detector's configured layout and dtype
//! - The lifecycle gate that owns the loaded detector
//! - Inline or worker-pool inference dispatch
//! - An ONNX Runtime adapter for SSD-style detection models

pub mod detection;
pub mod dispatcher;
pub mod image_utils;
pub mod labels;
pub mod lifecycle;
pub mod pipeline;
pub mod ssd;
pub mod tensor;
pub mod validator;
pub mod worker;

pub use detection::{
    normalize_detections, Detection, DetectionBatch, DetectionError, Detector, DetectorFactory,
    RawDetection,
};
pub use dispatcher::{
    DetectionBackend, DispatchConfig, DispatchError, ExecutionMode, InferenceDispatcher,
};
pub use image_utils::{
    decode_image_bytes, detect_format, DecodedImage, ImageConfig, ImageError, ResizePolicy,
};
pub use labels::LabelMap;
pub use lifecycle::{load_outcome, DetectorGate, LoadError, ModelState, FATAL_LOAD_EXIT_CODE};
pub use pipeline::{DetectionPipeline, PipelineError, PipelineSettings};
pub use ssd::{OnnxSsdDetector, SsdDetectorConfig, SsdDetectorFactory};
pub use tensor::{build_tensor, Tensor, TensorData, TensorDtype, TensorLayout, TensorSpec};
pub use validator::{UploadPolicy, UploadedImage, ValidationError};
pub use worker::WorkerPool;
