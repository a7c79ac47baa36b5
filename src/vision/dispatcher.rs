// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Inference dispatch
//!
//! Runs the detector for one request, either inline against the shared
//! detector or offloaded to the worker pool, and turns every failure into a
//! [`DispatchError`]. There is one call per request and no retry.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::detection::{normalize_detections, DetectionBatch, Detector, DetectorFactory};
use super::lifecycle::LoadError;
use super::tensor::Tensor;
use super::worker::WorkerPool;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Detector error: {0}")]
    Detector(String),

    #[error("Detector returned invalid output: {0}")]
    InvalidOutput(String),

    #[error("Detector panicked")]
    Panicked,

    #[error("No detector worker available")]
    WorkerUnavailable,

    #[error("Worker protocol error: {0}")]
    Protocol(String),

    #[error("Detection timed out after {0}ms")]
    Timeout(u64),
}

/// Where detector calls run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Shared detector, called from the request's task
    #[default]
    Inline,
    /// Dedicated worker threads with their own detectors
    Offloaded,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Inline => f.write_str("inline"),
            ExecutionMode::Offloaded => f.write_str("offloaded"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inline" => Ok(ExecutionMode::Inline),
            "offloaded" | "worker" => Ok(ExecutionMode::Offloaded),
            other => Err(format!(
                "unknown execution mode '{}' (expected inline or offloaded)",
                other
            )),
        }
    }
}

/// Dispatch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub mode: ExecutionMode,
    /// Worker threads in offloaded mode
    pub worker_pool_size: usize,
    /// Upper bound on one detector call; unbounded when unset
    pub timeout_ms: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Inline,
            worker_pool_size: 1,
            timeout_ms: None,
        }
    }
}

/// Shared detector with optional call serialization
pub struct InlineDetector {
    detector: Arc<dyn Detector>,
    /// Single slot held for the whole call when the detector is not
    /// safe for concurrent use
    slot: Option<Arc<Mutex<()>>>,
}

impl InlineDetector {
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        let slot = (!detector.concurrency_safe()).then(|| Arc::new(Mutex::new(())));
        Self { detector, slot }
    }

    pub fn is_serialized(&self) -> bool {
        self.slot.is_some()
    }

    async fn detect(&self, tensor: Tensor) -> Result<DetectionBatch, DispatchError> {
        // The guard moves into the blocking call so the slot stays taken
        // until the detector actually returns, even if the caller times out.
        let guard = match &self.slot {
            Some(slot) => Some(slot.clone().lock_owned().await),
            None => None,
        };
        let detector = self.detector.clone();

        let raw = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            detector.detect(&tensor)
        })
        .await
        .map_err(|e| {
            if e.is_panic() {
                DispatchError::Panicked
            } else {
                DispatchError::WorkerUnavailable
            }
        })?
        .map_err(|e| DispatchError::Detector(format!("{:#}", e)))?;

        normalize_detections(raw).map_err(|e| DispatchError::InvalidOutput(e.to_string()))
    }
}

/// The loaded detection backend owned by the lifecycle gate
pub enum DetectionBackend {
    Inline(InlineDetector),
    Offloaded(WorkerPool),
}

impl DetectionBackend {
    pub fn inline(detector: Arc<dyn Detector>) -> Self {
        DetectionBackend::Inline(InlineDetector::new(detector))
    }

    /// Build the backend for `config`: one shared detector loaded on the
    /// blocking pool, or a worker pool with one detector per worker.
    pub async fn load(
        config: DispatchConfig,
        factory: Arc<dyn DetectorFactory>,
    ) -> Result<Self, LoadError> {
        match config.mode {
            ExecutionMode::Inline => {
                let detector = tokio::task::spawn_blocking(move || factory.load())
                    .await
                    .map_err(|e| LoadError::Detector(e.to_string()))?
                    .map_err(|e| LoadError::Detector(format!("{:#}", e)))?;
                debug!("Loaded shared detector '{}'", detector.name());
                Ok(DetectionBackend::inline(detector))
            }
            ExecutionMode::Offloaded => {
                let pool = WorkerPool::spawn(config.worker_pool_size, factory).await?;
                Ok(DetectionBackend::Offloaded(pool))
            }
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        match self {
            DetectionBackend::Inline(_) => ExecutionMode::Inline,
            DetectionBackend::Offloaded(_) => ExecutionMode::Offloaded,
        }
    }

    async fn detect(&self, tensor: Tensor) -> Result<DetectionBatch, DispatchError> {
        match self {
            DetectionBackend::Inline(inline) => inline.detect(tensor).await,
            DetectionBackend::Offloaded(pool) => pool.submit(&tensor).await,
        }
    }
}

/// Invokes the backend with the configured timeout policy
#[derive(Debug, Clone, Default)]
pub struct InferenceDispatcher {
    timeout: Option<Duration>,
}

impl InferenceDispatcher {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            timeout: config.timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn dispatch(
        &self,
        backend: &DetectionBackend,
        tensor: Tensor,
    ) -> Result<DetectionBatch, DispatchError> {
        let call = backend.detect(tensor);
        match self.timeout {
            None => call.await,
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Detection exceeded {}ms", limit.as_millis());
                    Err(DispatchError::Timeout(limit.as_millis() as u64))
                }
            },
        }
    }
}
