// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! GET /health and GET /metrics tests

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use fabstir_vision_node::vision::{DetectionBackend, ModelState, PipelineSettings};
use serde_json::json;
use std::sync::Arc;
use tower::util::ServiceExt;

use crate::common::*;

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[cfg(test)]
mod health_metrics_tests {
    use super::*;

    /// Test 1: health reports loading with 503, then ready with 200
    #[tokio::test]
    async fn test_health_follows_model_state() {
        let (gate, release) = loading_gate(DetectionBackend::inline(Arc::new(
            ScriptedDetector::fixed(vec![]),
        )));
        let app = app_with_gate(gate.clone(), PipelineSettings::default());

        let response = app.router.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["status"], json!("unavailable"));
        assert_eq!(body["model_state"], json!("loading"));
        assert_eq!(body["execution_mode"], json!("inline"));

        release.send(()).unwrap();
        assert_eq!(gate.wait_settled().await, ModelState::Ready);

        let response = app.router.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], json!("ok"));
        assert_eq!(body["model_state"], json!("ready"));
    }

    /// Test 2: uploads after the gate opens are served
    #[tokio::test]
    async fn test_upload_served_once_ready() {
        let (gate, release) = loading_gate(DetectionBackend::inline(Arc::new(
            ScriptedDetector::fixed(vec![person_at_10()]),
        )));
        let app = app_with_gate(gate.clone(), PipelineSettings::default());

        let early = app
            .router
            .clone()
            .oneshot(image_upload("a.png", &png_bytes(30, 30)))
            .await
            .unwrap();
        assert_eq!(early.status(), StatusCode::SERVICE_UNAVAILABLE);

        release.send(()).unwrap();
        gate.wait_settled().await;

        let late = app
            .router
            .clone()
            .oneshot(image_upload("a.png", &png_bytes(30, 30)))
            .await
            .unwrap();
        assert_eq!(late.status(), StatusCode::OK);
    }

    /// Test 3: metrics export counts outcomes and stages
    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = ready_app(
            DetectionBackend::inline(Arc::new(ScriptedDetector::fixed(vec![person_at_10()]))),
            PipelineSettings::default(),
        )
        .await;

        for _ in 0..2 {
            let response = app
                .router
                .clone()
                .oneshot(image_upload("a.png", &png_bytes(30, 30)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.router.clone().oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/plain"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("detection_requests_total 2"));
        assert!(text.contains("detection_outcomes_total{outcome=\"success\"} 2"));
        assert!(text.contains("detection_stage_runs_total{stage=\"inference\"} 2"));
    }

    /// Test 4: CORS preflight is answered for any origin by default
    #[tokio::test]
    async fn test_cors_preflight() {
        let app = ready_app(
            DetectionBackend::inline(Arc::new(ScriptedDetector::fixed(vec![]))),
            PipelineSettings::default(),
        )
        .await;

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/upload")
            .header("origin", "http://localhost:3000")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert!(response
            .headers()
            .contains_key("access-control-allow-origin"));
    }
}
