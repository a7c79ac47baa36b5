// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Dispatch tests across inline and offloaded execution

use fabstir_vision_node::vision::{
    DetectionBackend, Detector, DetectorFactory, DispatchConfig, DispatchError, ExecutionMode,
    InferenceDispatcher, LoadError, RawDetection, Tensor, TensorData,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::common::*;

fn tensor(red: u8) -> Tensor {
    Tensor::new(vec![2, 2, 3], TensorData::U8(vec![red; 12])).unwrap()
}

fn offloaded_config(workers: usize, timeout_ms: Option<u64>) -> DispatchConfig {
    DispatchConfig {
        mode: ExecutionMode::Offloaded,
        worker_pool_size: workers,
        timeout_ms,
    }
}

fn scripted_factory(script: Script, delay: Duration) -> Arc<dyn DetectorFactory> {
    Arc::new(move || -> anyhow::Result<Arc<dyn Detector>> {
        Ok(Arc::new(
            ScriptedDetector::new(script.clone()).with_delay(delay),
        ))
    })
}

#[cfg(test)]
mod worker_dispatch_tests {
    use super::*;

    /// Test 1: offloaded results come back to the request that sent them
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_offloaded_correlates_results() {
        let backend = Arc::new(
            DetectionBackend::load(
                offloaded_config(3, None),
                scripted_factory(Script::EchoPixel, Duration::from_millis(2)),
            )
            .await
            .unwrap(),
        );
        let dispatcher = InferenceDispatcher::default();

        let mut tasks = Vec::new();
        for red in [5u8, 50, 100, 150, 200, 250] {
            let backend = backend.clone();
            let dispatcher = dispatcher.clone();
            tasks.push(tokio::spawn(async move {
                (red, dispatcher.dispatch(&backend, tensor(red)).await)
            }));
        }

        for task in tasks {
            let (red, result) = task.await.unwrap();
            let batch = result.unwrap();
            assert_eq!(batch[0].class_name, format!("red{}", red));
        }
    }

    /// Test 2: a timed-out request returns Timeout and leaves no pending entry
    #[tokio::test]
    async fn test_offloaded_timeout_cleans_up() {
        let config = offloaded_config(1, Some(20));
        let backend = DetectionBackend::load(
            config.clone(),
            scripted_factory(Script::Fixed(vec![]), Duration::from_millis(300)),
        )
        .await
        .unwrap();
        let dispatcher = InferenceDispatcher::new(&config);

        let err = dispatcher.dispatch(&backend, tensor(1)).await.unwrap_err();
        assert_eq!(err, DispatchError::Timeout(20));

        match &backend {
            DetectionBackend::Offloaded(pool) => assert_eq!(pool.in_flight(), 0),
            DetectionBackend::Inline(_) => panic!("expected worker pool"),
        }
    }

    /// Test 3: detector errors become inference errors in both modes
    #[tokio::test]
    async fn test_detector_error_in_both_modes() {
        let inline = DetectionBackend::inline(Arc::new(ScriptedDetector::new(Script::Fail(
            "weights corrupt".to_string(),
        ))));
        let offloaded = DetectionBackend::load(
            offloaded_config(1, None),
            scripted_factory(Script::Fail("weights corrupt".to_string()), Duration::ZERO),
        )
        .await
        .unwrap();

        for backend in [inline, offloaded] {
            let err = InferenceDispatcher::default()
                .dispatch(&backend, tensor(1))
                .await
                .unwrap_err();
            assert!(
                matches!(&err, DispatchError::Detector(msg) if msg.contains("weights corrupt")),
                "{:?}",
                err
            );
        }
    }

    /// Test 4: malformed detector output is rejected at the boundary
    #[tokio::test]
    async fn test_malformed_output_rejected() {
        let bad = RawDetection {
            bbox: [0.0, 0.0, f64::NAN, 1.0],
            label: "ghost".to_string(),
            score: 0.5,
        };
        let backend = DetectionBackend::load(
            offloaded_config(1, None),
            scripted_factory(Script::Fixed(vec![bad]), Duration::ZERO),
        )
        .await
        .unwrap();

        let err = InferenceDispatcher::default()
            .dispatch(&backend, tensor(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidOutput(_)));
    }

    /// Test 5: out-of-range scores are clamped
    #[tokio::test]
    async fn test_probability_clamped() {
        let loud = RawDetection {
            bbox: [1.0, 2.0, 3.0, 4.0],
            label: "dog".to_string(),
            score: 1.7,
        };
        let backend = DetectionBackend::inline(Arc::new(ScriptedDetector::fixed(vec![loud])));

        let batch = InferenceDispatcher::default()
            .dispatch(&backend, tensor(1))
            .await
            .unwrap();
        assert_eq!(batch[0].probability, 1.0);
        assert_eq!(batch[0].bbox, [1.0, 2.0, 3.0, 4.0]);
    }

    /// Test 6: a worker that cannot load fails the whole pool
    #[tokio::test]
    async fn test_pool_load_failure() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let factory: Arc<dyn DetectorFactory> = {
            let attempts = attempts.clone();
            Arc::new(move || -> anyhow::Result<Arc<dyn Detector>> {
                if attempts.fetch_add(1, Ordering::SeqCst) == 1 {
                    anyhow::bail!("second worker out of memory");
                }
                Ok(Arc::new(ScriptedDetector::fixed(vec![])))
            })
        };

        let result = DetectionBackend::load(offloaded_config(2, None), factory).await;
        assert!(matches!(result, Err(LoadError::Detector(msg)) if msg.contains("out of memory")));
    }
}
