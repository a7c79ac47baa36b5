// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::upload::upload_handler;
use crate::monitoring::PipelineMetrics;
use crate::vision::{DetectionPipeline, ExecutionMode, ModelState};

/// Multipart framing allowance on top of the file size limit
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<DetectionPipeline>,
    pub metrics: PipelineMetrics,
    /// Configured mode, reported by /health before the backend exists
    pub execution_mode: ExecutionMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub model_state: String,
    pub execution_mode: ExecutionMode,
    pub version: String,
}

/// Build the HTTP router
///
/// `cors_origins` empty means any origin is allowed.
pub fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    let body_limit = state.pipeline.upload_policy().max_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        // Detection endpoint
        .route("/upload", post(upload_handler))
        // Health check
        .route("/health", get(health_handler))
        // Metrics endpoint
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let gate = state.pipeline.gate();
    let model_state = gate.state();
    let execution_mode = gate
        .get()
        .map(|backend| backend.mode())
        .unwrap_or(state.execution_mode);

    let (status, label) = match model_state {
        ModelState::Ready => (StatusCode::OK, "ok"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
    };

    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
            model_state: model_state.to_string(),
            execution_mode,
            version: crate::version::VERSION_NUMBER.to_string(),
        }),
    )
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.export_prometheus(),
    )
}

/// Serve `router` on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")
}

/// Bind `addr` and serve until Ctrl-C
pub async fn start_server(router: Router, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("🌐 Detection API listening on {}", addr);

    serve(listener, router, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("⏹️  Shutting down...");
    })
    .await
}
