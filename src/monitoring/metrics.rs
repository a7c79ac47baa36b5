// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Detection pipeline metrics
//!
//! Atomic counters for requests, outcomes and per-stage timings, exported in
//! Prometheus text format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{Outcome, Stage, StageObserver};

#[derive(Debug, Default)]
struct StageCounters {
    count: AtomicU64,
    duration_us: AtomicU64,
}

impl StageCounters {
    fn record(&self, elapsed: Duration) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.duration_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }
}

/// Pipeline counters shared between the request path and `/metrics`
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    requests_total: AtomicU64,
    succeeded: AtomicU64,
    not_ready: AtomicU64,
    rejected: AtomicU64,
    decode_failed: AtomicU64,
    inference_failed: AtomicU64,
    validate: StageCounters,
    decode: StageCounters,
    tensor_build: StageCounters,
    inference: StageCounters,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn stage(&self, stage: Stage) -> &StageCounters {
        match stage {
            Stage::Validate => &self.inner.validate,
            Stage::Decode => &self.inner.decode,
            Stage::TensorBuild => &self.inner.tensor_build,
            Stage::Inference => &self.inner.inference,
        }
    }

    /// Total requests that reached the pipeline
    pub fn requests_total(&self) -> u64 {
        self.inner.requests_total.load(Ordering::Relaxed)
    }

    pub fn outcome_count(&self, outcome: Outcome) -> u64 {
        let counter = match outcome {
            Outcome::Success => &self.inner.succeeded,
            Outcome::NotReady => &self.inner.not_ready,
            Outcome::Rejected => &self.inner.rejected,
            Outcome::DecodeFailed => &self.inner.decode_failed,
            Outcome::InferenceFailed => &self.inner.inference_failed,
        };
        counter.load(Ordering::Relaxed)
    }

    /// How many times `stage` has run
    pub fn stage_count(&self, stage: Stage) -> u64 {
        self.stage(stage).count.load(Ordering::Relaxed)
    }

    /// Average stage duration in milliseconds
    pub fn avg_stage_ms(&self, stage: Stage) -> f64 {
        let counters = self.stage(stage);
        let count = counters.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        counters.duration_us.load(Ordering::Relaxed) as f64 / count as f64 / 1000.0
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP detection_requests_total Total number of detection requests\n");
        out.push_str("# TYPE detection_requests_total counter\n");
        out.push_str(&format!("detection_requests_total {}\n\n", self.requests_total()));

        out.push_str("# HELP detection_outcomes_total Detection requests by outcome\n");
        out.push_str("# TYPE detection_outcomes_total counter\n");
        for outcome in Outcome::ALL {
            out.push_str(&format!(
                "detection_outcomes_total{{outcome=\"{}\"}} {}\n",
                outcome.as_str(),
                self.outcome_count(outcome)
            ));
        }
        out.push('\n');

        out.push_str("# HELP detection_stage_runs_total Number of times each pipeline stage ran\n");
        out.push_str("# TYPE detection_stage_runs_total counter\n");
        for stage in Stage::ALL {
            out.push_str(&format!(
                "detection_stage_runs_total{{stage=\"{}\"}} {}\n",
                stage.as_str(),
                self.stage_count(stage)
            ));
        }
        out.push('\n');

        out.push_str(
            "# HELP detection_stage_duration_avg_ms Average stage duration in milliseconds\n",
        );
        out.push_str("# TYPE detection_stage_duration_avg_ms gauge\n");
        for stage in Stage::ALL {
            out.push_str(&format!(
                "detection_stage_duration_avg_ms{{stage=\"{}\"}} {:.3}\n",
                stage.as_str(),
                self.avg_stage_ms(stage)
            ));
        }

        out
    }

    /// Reset all counters (for testing)
    #[cfg(test)]
    pub fn reset(&self) {
        let inner = &self.inner;
        for counter in [
            &inner.requests_total,
            &inner.succeeded,
            &inner.not_ready,
            &inner.rejected,
            &inner.decode_failed,
            &inner.inference_failed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        for stage in Stage::ALL {
            self.stage(stage).count.store(0, Ordering::Relaxed);
            self.stage(stage).duration_us.store(0, Ordering::Relaxed);
        }
    }
}

impl StageObserver for PipelineMetrics {
    fn on_stage(&self, stage: Stage, elapsed: Duration) {
        self.stage(stage).record(elapsed);
    }

    fn on_outcome(&self, outcome: Outcome) {
        self.inner.requests_total.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Outcome::Success => &self.inner.succeeded,
            Outcome::NotReady => &self.inner.not_ready,
            Outcome::Rejected => &self.inner.rejected,
            Outcome::DecodeFailed => &self.inner.decode_failed,
            Outcome::InferenceFailed => &self.inner.inference_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
