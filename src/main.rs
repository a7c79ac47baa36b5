// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{Context, Result};
use clap::Parser;
use fabstir_vision_node::{
    api::{build_router, start_server, AppState},
    cli::Cli,
    monitoring::{ObserverSet, PipelineMetrics, TracingObserver},
    version,
    vision::{
        load_outcome, DetectionBackend, DetectionPipeline, DetectorFactory, DetectorGate,
        PipelineSettings, SsdDetectorFactory, FATAL_LOAD_EXIT_CODE,
    },
};
use std::{env, sync::Arc};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing subscriber for logging
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    info!("🚀 Starting {}", version::get_version_string());

    let cli = Cli::parse();
    let config = cli.resolve().context("Invalid configuration")?;
    let addr = config.server.socket_addr()?;

    info!(
        "📦 Detector: {} ({} mode, {} worker(s))",
        config.detector.model_path.display(),
        config.dispatch.mode,
        config.dispatch.worker_pool_size
    );

    // The server comes up while the detector loads; uploads get 503 until ready
    let gate = Arc::new(DetectorGate::new());
    let factory: Arc<dyn DetectorFactory> =
        Arc::new(SsdDetectorFactory::new(config.detector.clone()));
    let dispatch = config.dispatch.clone();
    let load = gate.start_load(move || DetectionBackend::load(dispatch, factory))?;

    tokio::spawn(async move {
        if let Err(e) = load_outcome(load).await {
            error!("❌ Cannot serve without a detector: {}", e);
            std::process::exit(FATAL_LOAD_EXIT_CODE);
        }
    });

    let metrics = PipelineMetrics::new();
    let observer = ObserverSet::new()
        .with(Arc::new(metrics.clone()))
        .with(Arc::new(TracingObserver));

    let settings = PipelineSettings {
        upload: config.upload.clone(),
        image: config.image,
        tensor: config.tensor,
        dispatch: config.dispatch.clone(),
    };
    let pipeline = DetectionPipeline::new(gate, settings).with_observer(Arc::new(observer));

    let state = AppState {
        pipeline: Arc::new(pipeline),
        metrics,
        execution_mode: config.dispatch.mode,
    };
    let router = build_router(state, &config.server.cors_origins);

    start_server(router, addr).await?;

    info!("👋 Goodbye!");
    Ok(())
}
