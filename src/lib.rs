// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod api;
pub mod cli;
pub mod config;
pub mod monitoring;
pub mod version;
pub mod vision;

pub use api::{build_router, AppState};
pub use config::{ConfigError, NodeConfig};
pub use monitoring::{PipelineMetrics, StageObserver};
pub use vision::{
    Detection, DetectionBackend, DetectionPipeline, Detector, DetectorFactory, DetectorGate,
    ModelState, PipelineSettings,
};
