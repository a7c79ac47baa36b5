// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Pipeline observation: stage timings, outcomes and metrics export

pub mod metrics;

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub use metrics::PipelineMetrics;

/// A timed step of the detection pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Validate,
    Decode,
    TensorBuild,
    Inference,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Validate,
        Stage::Decode,
        Stage::TensorBuild,
        Stage::Inference,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Decode => "decode",
            Stage::TensorBuild => "tensor_build",
            Stage::Inference => "inference",
        }
    }
}

/// How a request left the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    NotReady,
    Rejected,
    DecodeFailed,
    InferenceFailed,
}

impl Outcome {
    pub const ALL: [Outcome; 5] = [
        Outcome::Success,
        Outcome::NotReady,
        Outcome::Rejected,
        Outcome::DecodeFailed,
        Outcome::InferenceFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::NotReady => "not_ready",
            Outcome::Rejected => "rejected",
            Outcome::DecodeFailed => "decode_failed",
            Outcome::InferenceFailed => "inference_failed",
        }
    }
}

/// Hook called by the pipeline after each stage and once per request
pub trait StageObserver: Send + Sync {
    fn on_stage(&self, stage: Stage, elapsed: Duration);

    fn on_outcome(&self, _outcome: Outcome) {}
}

/// Logs stage timings at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl StageObserver for TracingObserver {
    fn on_stage(&self, stage: Stage, elapsed: Duration) {
        debug!(
            stage = stage.as_str(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Pipeline stage finished"
        );
    }

    fn on_outcome(&self, outcome: Outcome) {
        debug!(outcome = outcome.as_str(), "Detection request finished");
    }
}

/// Forwards every event to each wrapped observer in order
#[derive(Default, Clone)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn StageObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl StageObserver for ObserverSet {
    fn on_stage(&self, stage: Stage, elapsed: Duration) {
        for observer in &self.observers {
            observer.on_stage(stage, elapsed);
        }
    }

    fn on_outcome(&self, outcome: Outcome) {
        for observer in &self.observers {
            observer.on_outcome(outcome);
        }
    }
}
