// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Upload-to-detections pipeline
//!
//! gate -> validate -> decode/resize -> tensor -> dispatch -> (rescale)
//!
//! The readiness gate is checked before anything touches the upload bytes,
//! so a request arriving while the detector loads never reaches the decoder.

use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::detection::DetectionBatch;
use super::dispatcher::{DetectionBackend, DispatchConfig, DispatchError, InferenceDispatcher};
use super::image_utils::{decode_image_bytes, ImageConfig, ImageError};
use super::lifecycle::DetectorGate;
use super::tensor::{build_tensor, TensorError, TensorSpec};
use super::validator::{UploadPolicy, UploadedImage, ValidationError};
use crate::monitoring::{Outcome, Stage, StageObserver, TracingObserver};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Model is not loaded")]
    NotReady,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Decode(#[from] ImageError),

    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error(transparent)]
    Inference(#[from] DispatchError),
}

impl PipelineError {
    pub fn outcome(&self) -> Outcome {
        match self {
            PipelineError::NotReady => Outcome::NotReady,
            PipelineError::Validation(_) => Outcome::Rejected,
            PipelineError::Decode(_) | PipelineError::Tensor(_) => Outcome::DecodeFailed,
            PipelineError::Inference(_) => Outcome::InferenceFailed,
        }
    }
}

/// Per-deployment pipeline settings
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub upload: UploadPolicy,
    pub image: ImageConfig,
    pub tensor: TensorSpec,
    pub dispatch: DispatchConfig,
}

pub struct DetectionPipeline {
    gate: Arc<DetectorGate>,
    upload_policy: UploadPolicy,
    image_config: ImageConfig,
    tensor_spec: TensorSpec,
    dispatcher: InferenceDispatcher,
    observer: Arc<dyn StageObserver>,
}

impl DetectionPipeline {
    pub fn new(gate: Arc<DetectorGate>, settings: PipelineSettings) -> Self {
        Self {
            gate,
            dispatcher: InferenceDispatcher::new(&settings.dispatch),
            upload_policy: settings.upload,
            image_config: settings.image,
            tensor_spec: settings.tensor,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn gate(&self) -> &Arc<DetectorGate> {
        &self.gate
    }

    pub fn upload_policy(&self) -> &UploadPolicy {
        &self.upload_policy
    }

    /// Ready backend, or `NotReady` while the detector is loading or failed
    pub fn check_ready(&self) -> Result<Arc<DetectionBackend>, PipelineError> {
        self.gate.get().ok_or(PipelineError::NotReady)
    }

    /// Record a request that was turned away before reaching [`run`](Self::run)
    pub fn reject(&self, error: PipelineError) -> PipelineError {
        self.observer.on_outcome(error.outcome());
        error
    }

    /// Run one upload through the pipeline
    pub async fn run(&self, upload: UploadedImage) -> Result<DetectionBatch, PipelineError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("detect", %request_id);
        let result = self.process(upload).instrument(span).await;

        match &result {
            Ok(batch) => {
                info!(%request_id, detections = batch.len(), "Detection complete");
                self.observer.on_outcome(Outcome::Success);
            }
            Err(e) => {
                match e {
                    PipelineError::NotReady | PipelineError::Validation(_) => {
                        debug!(%request_id, "Upload rejected: {}", e)
                    }
                    _ => warn!(%request_id, "Detection failed: {}", e),
                }
                self.observer.on_outcome(e.outcome());
            }
        }
        result
    }

    async fn process(&self, upload: UploadedImage) -> Result<DetectionBatch, PipelineError> {
        let backend = self.check_ready()?;

        let start = Instant::now();
        let validated = self.upload_policy.validate(upload);
        self.observer.on_stage(Stage::Validate, start.elapsed());
        let upload = validated?;
        debug!(
            filename = %upload.filename,
            bytes = upload.byte_len(),
            "Upload accepted"
        );

        let image_config = self.image_config;
        let tensor_spec = self.tensor_spec;
        let observer = self.observer.clone();
        let (tensor, scale) = tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            let decoded = decode_image_bytes(&upload.bytes, &image_config);
            observer.on_stage(Stage::Decode, start.elapsed());
            let image = decoded?;

            let start = Instant::now();
            let tensor = build_tensor(&image, &tensor_spec);
            observer.on_stage(Stage::TensorBuild, start.elapsed());
            Ok::<_, PipelineError>((tensor?, image.scale_to_source()))
        })
        .await
        .map_err(|e| PipelineError::Decode(ImageError::DecodeFailed(e.to_string())))??;
        debug!(shape = ?tensor.shape(), "Tensor built");

        let start = Instant::now();
        let dispatched = self.dispatcher.dispatch(&backend, tensor).await;
        self.observer.on_stage(Stage::Inference, start.elapsed());
        let batch = dispatched?;

        if image_config.rescale_to_original {
            let (sx, sy) = scale;
            return Ok(batch.into_iter().map(|d| d.scaled(sx, sy)).collect());
        }
        Ok(batch)
    }
}
