// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Offloaded detection on dedicated worker threads
//!
//! Each worker owns its own detector handle. Requests and results cross the
//! thread boundary only as bincode-encoded messages: a shared task channel
//! feeds the workers, and a result channel is drained by a router task that
//! hands each result to the request waiting on the same `request_id`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::detection::{normalize_detections, DetectionBatch, Detector, DetectorFactory};
use super::dispatcher::DispatchError;
use super::lifecycle::LoadError;
use super::tensor::{Tensor, TensorDtype};

/// Detection request sent to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub request_id: Uuid,
    pub shape: Vec<usize>,
    pub dtype: TensorDtype,
    /// Little-endian element bytes
    pub data: Vec<u8>,
}

impl TaskMessage {
    pub fn new(request_id: Uuid, tensor: &Tensor) -> Self {
        Self {
            request_id,
            shape: tensor.shape().to_vec(),
            dtype: tensor.dtype(),
            data: tensor.to_le_bytes(),
        }
    }

    pub fn into_tensor(self) -> Result<Tensor, String> {
        Tensor::from_le_bytes(self.shape, self.dtype, self.data).map_err(|e| e.to_string())
    }
}

/// Why a worker could not produce detections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerFailure {
    /// The task payload could not be turned back into a tensor
    BadTask(String),
    /// The detector returned an error
    Detector(String),
    /// The detector output did not fit the detection schema
    InvalidOutput(String),
    /// The detector panicked
    Panicked,
}

/// Result posted back by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub request_id: Uuid,
    pub outcome: Result<DetectionBatch, WorkerFailure>,
}

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Result<DetectionBatch, WorkerFailure>>>>>;

/// Removes a pending entry when the waiting request goes away (e.g. timeout)
struct PendingGuard {
    pending: PendingMap,
    request_id: Uuid,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.request_id);
        }
    }
}

/// Pool of detector worker threads
pub struct WorkerPool {
    task_tx: std_mpsc::Sender<Vec<u8>>,
    pending: PendingMap,
    size: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Start `size` workers, each loading its own detector through `factory`.
    ///
    /// Resolves once every worker has loaded its detector; fails if any of
    /// them could not. Must be called from within a tokio runtime.
    pub async fn spawn(size: usize, factory: Arc<dyn DetectorFactory>) -> Result<Self, LoadError> {
        if size == 0 {
            return Err(LoadError::InvalidPoolSize);
        }

        let (task_tx, task_rx) = std_mpsc::channel::<Vec<u8>>();
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (result_tx, result_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let mut ready = Vec::with_capacity(size);
        for index in 0..size {
            let (ready_tx, ready_rx) = oneshot::channel();
            let factory = factory.clone();
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();

            thread::Builder::new()
                .name(format!("detector-worker-{}", index))
                .spawn(move || {
                    let detector = match factory.load() {
                        Ok(detector) => {
                            let _ = ready_tx.send(Ok(()));
                            detector
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(format!("{:#}", e)));
                            return;
                        }
                    };
                    worker_loop(index, detector, task_rx, result_tx);
                })
                .map_err(|e| LoadError::Worker(e.to_string()))?;

            ready.push(ready_rx);
        }
        drop(result_tx);

        for (index, ready_rx) in ready.into_iter().enumerate() {
            match ready_rx.await {
                Ok(Ok(())) => debug!("Detector worker {} ready", index),
                Ok(Err(e)) => return Err(LoadError::Detector(e)),
                Err(_) => {
                    return Err(LoadError::Worker(format!(
                        "worker {} exited while loading",
                        index
                    )))
                }
            }
        }

        tokio::spawn(route_results(result_rx, pending.clone()));
        info!("✅ Detector worker pool started ({} workers)", size);

        Ok(Self {
            task_tx,
            pending,
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of submitted tasks still waiting for a result
    pub fn in_flight(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Send one tensor to the pool and wait for its detections
    pub async fn submit(&self, tensor: &Tensor) -> Result<DetectionBatch, DispatchError> {
        let request_id = Uuid::new_v4();
        let payload = bincode::serialize(&TaskMessage::new(request_id, tensor))
            .map_err(|e| DispatchError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| DispatchError::Protocol("pending table poisoned".to_string()))?
            .insert(request_id, tx);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            request_id,
        };

        self.task_tx
            .send(payload)
            .map_err(|_| DispatchError::WorkerUnavailable)?;

        match rx.await {
            Ok(Ok(batch)) => Ok(batch),
            Ok(Err(WorkerFailure::Detector(msg))) => Err(DispatchError::Detector(msg)),
            Ok(Err(WorkerFailure::InvalidOutput(msg))) => Err(DispatchError::InvalidOutput(msg)),
            Ok(Err(WorkerFailure::BadTask(msg))) => Err(DispatchError::Protocol(msg)),
            Ok(Err(WorkerFailure::Panicked)) => Err(DispatchError::Panicked),
            Err(_) => Err(DispatchError::WorkerUnavailable),
        }
    }
}

fn worker_loop(
    index: usize,
    detector: Arc<dyn Detector>,
    task_rx: Arc<Mutex<std_mpsc::Receiver<Vec<u8>>>>,
    result_tx: mpsc::UnboundedSender<Vec<u8>>,
) {
    loop {
        // Lock is released as soon as one task is taken
        let message = match task_rx.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => break,
        };
        let Ok(bytes) = message else {
            debug!("Detector worker {} shutting down", index);
            break;
        };

        let Some(result) = handle_task(detector.as_ref(), &bytes) else {
            continue;
        };

        match bincode::serialize(&result) {
            Ok(encoded) => {
                if result_tx.send(encoded).is_err() {
                    break;
                }
            }
            Err(e) => error!("Worker {} failed to encode result: {}", index, e),
        }
    }
}

/// Run one task. Returns `None` only when the task cannot be attributed to
/// a request at all.
fn handle_task(detector: &dyn Detector, bytes: &[u8]) -> Option<ResultMessage> {
    let task: TaskMessage = match bincode::deserialize(bytes) {
        Ok(task) => task,
        Err(e) => {
            error!("Dropping undecodable task message: {}", e);
            return None;
        }
    };
    let request_id = task.request_id;

    let outcome = match task.into_tensor() {
        Err(e) => Err(WorkerFailure::BadTask(e)),
        Ok(tensor) => match panic::catch_unwind(AssertUnwindSafe(|| detector.detect(&tensor))) {
            Err(_) => Err(WorkerFailure::Panicked),
            Ok(Err(e)) => Err(WorkerFailure::Detector(format!("{:#}", e))),
            Ok(Ok(raw)) => {
                normalize_detections(raw).map_err(|e| WorkerFailure::InvalidOutput(e.to_string()))
            }
        },
    };

    Some(ResultMessage {
        request_id,
        outcome,
    })
}

async fn route_results(mut result_rx: mpsc::UnboundedReceiver<Vec<u8>>, pending: PendingMap) {
    while let Some(bytes) = result_rx.recv().await {
        let message: ResultMessage = match bincode::deserialize(&bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!("Discarding undecodable worker result: {}", e);
                continue;
            }
        };

        let waiter = pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(&message.request_id));
        match waiter {
            Some(tx) => {
                let _ = tx.send(message.outcome);
            }
            None => debug!(
                "No waiter for result {} (request gave up)",
                message.request_id
            ),
        }
    }
    debug!("Worker result channel closed");
}
