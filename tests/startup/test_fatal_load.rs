// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Startup failure tests
//!
//! The node must not keep serving 503s forever when the detector can never
//! load: it logs the failure and exits with status 1.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

const EXIT_DEADLINE: Duration = Duration::from_secs(30);

fn spawn_node(args: &[&str], model_path: &str) -> Child {
    let mut command = Command::new(env!("CARGO_BIN_EXE_fabstir-vision-node"));
    for var in [
        "NODE_CONFIG",
        "LABELS_PATH",
        "EXECUTION_MODE",
        "WORKER_POOL_SIZE",
        "MAX_UPLOAD_BYTES",
        "INFERENCE_TIMEOUT_MS",
        "CORS_ORIGINS",
    ] {
        command.env_remove(var);
    }
    command
        .args(args)
        .env("MODEL_PATH", model_path)
        .env("BIND_HOST", "127.0.0.1")
        .env("PORT", "0")
        .env("RUST_LOG", "info")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap()
}

/// Wait for the process to exit, killing it if it outlives the deadline
fn wait_for_exit(child: &mut Child) -> (ExitStatus, String) {
    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if start.elapsed() > EXIT_DEADLINE {
            child.kill().unwrap();
            panic!("node still running after {:?}", EXIT_DEADLINE);
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    let mut output = String::new();
    if let Some(mut stdout) = child.stdout.take() {
        stdout.read_to_string(&mut output).unwrap();
    }
    if let Some(mut stderr) = child.stderr.take() {
        stderr.read_to_string(&mut output).unwrap();
    }
    (status, output)
}

#[cfg(test)]
mod fatal_load_tests {
    use super::*;

    /// Test 1: a missing model file exits with status 1 after logging why
    #[test]
    fn test_missing_model_exits_with_status_1() {
        let mut child = spawn_node(&[], "/nonexistent/ssd_mobilenet.onnx");
        let (status, output) = wait_for_exit(&mut child);

        assert_eq!(status.code(), Some(1), "output:\n{}", output);
        assert!(
            output.contains("Cannot serve without a detector"),
            "output:\n{}",
            output
        );
        assert!(output.contains("Detection model not found"), "output:\n{}", output);
    }

    /// Test 2: an unreadable config file fails before anything is served
    #[test]
    fn test_missing_config_exits_with_failure() {
        let mut child = spawn_node(
            &["--config", "/nonexistent/node.toml"],
            "/nonexistent/ssd_mobilenet.onnx",
        );
        let (status, output) = wait_for_exit(&mut child);

        assert!(!status.success(), "output:\n{}", output);
        assert!(!output.contains("Cannot serve without a detector"));
    }
}
