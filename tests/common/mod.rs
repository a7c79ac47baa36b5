// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Shared fixtures: a scripted detector, in-memory images and multipart bodies
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request},
    Router,
};
use fabstir_vision_node::{
    api::{build_router, AppState},
    monitoring::PipelineMetrics,
    vision::{
        DetectionBackend, DetectionPipeline, Detector, DetectorGate, ExecutionMode, LoadError,
        PipelineSettings, RawDetection, Tensor, TensorData,
    },
};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

pub const BOUNDARY: &str = "fabstir-test-boundary";

/// What the scripted detector returns
#[derive(Clone)]
pub enum Script {
    /// Always the same detections
    Fixed(Vec<RawDetection>),
    /// One detection whose label and score encode the first red value seen
    EchoPixel,
    /// Always an error
    Fail(String),
}

/// Test detector with call counting and overlap detection
pub struct ScriptedDetector {
    script: Script,
    delay: Duration,
    safe: bool,
    busy: AtomicBool,
    pub calls: Arc<AtomicUsize>,
    pub overlaps: Arc<AtomicUsize>,
    pub shapes: Arc<Mutex<Vec<Vec<usize>>>>,
}

impl ScriptedDetector {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            delay: Duration::ZERO,
            safe: false,
            busy: AtomicBool::new(false),
            calls: Arc::new(AtomicUsize::new(0)),
            overlaps: Arc::new(AtomicUsize::new(0)),
            shapes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn fixed(detections: Vec<RawDetection>) -> Self {
        Self::new(Script::Fixed(detections))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn thread_safe(mut self, safe: bool) -> Self {
        self.safe = safe;
        self
    }

    /// Share counters with other instances (one per worker)
    pub fn with_counters(mut self, calls: Arc<AtomicUsize>, overlaps: Arc<AtomicUsize>) -> Self {
        self.calls = calls;
        self.overlaps = overlaps;
        self
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn concurrency_safe(&self) -> bool {
        self.safe
    }

    fn detect(&self, tensor: &Tensor) -> anyhow::Result<Vec<RawDetection>> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.shapes.lock().unwrap().push(tensor.shape().to_vec());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let result = match &self.script {
            Script::Fixed(detections) => Ok(detections.clone()),
            Script::Fail(message) => Err(anyhow::anyhow!(message.clone())),
            Script::EchoPixel => {
                let red = match tensor.data() {
                    TensorData::U8(data) => data[0] as f64,
                    TensorData::F32(data) => (data[0] as f64 * 255.0).round(),
                };
                Ok(vec![RawDetection {
                    bbox: [0.0, 0.0, 1.0, 1.0],
                    label: format!("red{}", red as u32),
                    score: red / 255.0,
                }])
            }
        };

        self.busy.store(false, Ordering::SeqCst);
        result
    }
}

pub fn person_at_10() -> RawDetection {
    RawDetection {
        bbox: [10.0, 10.0, 20.0, 20.0],
        label: "person".to_string(),
        score: 0.91,
    }
}

pub fn solid_image(width: u32, height: u32, rgb: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb(rgb)))
}

pub fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(&solid_image(width, height, [120, 60, 30]), ImageFormat::Png)
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(&solid_image(width, height, [120, 60, 30]), ImageFormat::Jpeg)
}

/// `multipart/form-data` body with a single file field
pub fn multipart_body(field: &str, filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn image_upload(filename: &str, data: &[u8]) -> Request<Body> {
    upload_request(multipart_body("image", filename, "image/png", data))
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub struct TestApp {
    pub router: Router,
    pub metrics: PipelineMetrics,
    pub gate: Arc<DetectorGate>,
}

pub fn app_with_gate(gate: Arc<DetectorGate>, settings: PipelineSettings) -> TestApp {
    let metrics = PipelineMetrics::new();
    let execution_mode = settings.dispatch.mode;
    let pipeline =
        DetectionPipeline::new(gate.clone(), settings).with_observer(Arc::new(metrics.clone()));
    let state = AppState {
        pipeline: Arc::new(pipeline),
        metrics: metrics.clone(),
        execution_mode,
    };
    TestApp {
        router: build_router(state, &[]),
        metrics,
        gate,
    }
}

/// Gate already holding `backend`
pub async fn ready_gate(backend: DetectionBackend) -> Arc<DetectorGate> {
    let gate = Arc::new(DetectorGate::new());
    gate.start_load(move || async move { Ok(backend) })
        .unwrap()
        .await
        .unwrap()
        .unwrap();
    gate
}

pub async fn ready_app(backend: DetectionBackend, settings: PipelineSettings) -> TestApp {
    app_with_gate(ready_gate(backend).await, settings)
}

/// Gate stuck in `Loading` until the returned sender fires
pub fn loading_gate(
    backend: DetectionBackend,
) -> (Arc<DetectorGate>, oneshot::Sender<()>) {
    let gate = Arc::new(DetectorGate::new());
    let (release_tx, release_rx) = oneshot::channel::<()>();
    gate.start_load(move || async move {
        release_rx
            .await
            .map_err(|_| LoadError::Detector("load cancelled".to_string()))?;
        Ok(backend)
    })
    .unwrap();
    (gate, release_tx)
}

pub fn offloaded(settings: PipelineSettings, workers: usize) -> PipelineSettings {
    let mut settings = settings;
    settings.dispatch.mode = ExecutionMode::Offloaded;
    settings.dispatch.worker_pool_size = workers;
    settings
}
