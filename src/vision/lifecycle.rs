// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Detector lifecycle gate
//!
//! Owns the process-wide detection backend and its load state. The state
//! only moves forward: `Unloaded -> Loading -> Ready | Failed`, and loading
//! can be started once per gate.

use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::dispatcher::DetectionBackend;

/// Process exit status when the detector cannot be loaded
pub const FATAL_LOAD_EXIT_CODE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

impl std::fmt::Display for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelState::Unloaded => "unloaded",
            ModelState::Loading => "loading",
            ModelState::Ready => "ready",
            ModelState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("Detector loading was already started")]
    AlreadyStarted,

    #[error("Worker pool size must be at least 1")]
    InvalidPoolSize,

    #[error("Failed to load detector: {0}")]
    Detector(String),

    #[error("Detector worker failed: {0}")]
    Worker(String),
}

/// State-guarded holder of the shared detection backend
pub struct DetectorGate {
    state: watch::Sender<ModelState>,
    backend: OnceLock<Arc<DetectionBackend>>,
}

impl std::fmt::Debug for DetectorGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorGate")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Default for DetectorGate {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ModelState::Unloaded);
        Self {
            state,
            backend: OnceLock::new(),
        }
    }

    pub fn state(&self) -> ModelState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ModelState::Ready
    }

    /// The loaded backend; `None` unless the state is `Ready`
    pub fn get(&self) -> Option<Arc<DetectionBackend>> {
        if !self.is_ready() {
            return None;
        }
        self.backend.get().cloned()
    }

    /// Begin loading the backend in the background.
    ///
    /// Moves to `Loading` before returning. The returned handle resolves to
    /// the load outcome; the caller decides what a failure means for the
    /// process. Calling this a second time returns `AlreadyStarted`.
    pub fn start_load<F, Fut>(
        self: &Arc<Self>,
        load: F,
    ) -> Result<JoinHandle<Result<(), LoadError>>, LoadError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<DetectionBackend, LoadError>> + Send + 'static,
    {
        let started = self.state.send_if_modified(|state| {
            if *state == ModelState::Unloaded {
                *state = ModelState::Loading;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(LoadError::AlreadyStarted);
        }

        info!("🧠 Loading detector...");
        let gate = self.clone();
        Ok(tokio::spawn(async move {
            let start = Instant::now();
            match load().await {
                Ok(backend) => {
                    let mode = backend.mode();
                    // Only this task ever sets the backend
                    let _ = gate.backend.set(Arc::new(backend));
                    gate.state.send_replace(ModelState::Ready);
                    info!(
                        "✅ Detector ready ({} mode) in {}ms",
                        mode,
                        start.elapsed().as_millis()
                    );
                    Ok(())
                }
                Err(e) => {
                    gate.state.send_replace(ModelState::Failed);
                    error!("❌ Detector failed to load: {}", e);
                    Err(e)
                }
            }
        }))
    }

    /// Wait until loading has finished, returning `Ready` or `Failed`.
    /// Returns the current state immediately if loading never started.
    pub async fn wait_settled(&self) -> ModelState {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(|state| {
                matches!(
                    state,
                    ModelState::Ready | ModelState::Failed | ModelState::Unloaded
                )
            })
            .await
            .map(|state| *state);
        settled.unwrap_or_else(|_| self.state())
    }
}

/// Outcome of a background load started by [`DetectorGate::start_load`].
/// A load task that panicked or was cancelled counts as a detector failure.
pub async fn load_outcome(handle: JoinHandle<Result<(), LoadError>>) -> Result<(), LoadError> {
    handle
        .await
        .map_err(|e| LoadError::Detector(format!("load task aborted: {}", e)))?
}
