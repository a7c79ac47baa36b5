// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Node configuration file tests

use fabstir_vision_node::config::{ConfigError, NodeConfig};
use fabstir_vision_node::vision::{ExecutionMode, ResizePolicy};
use std::io::Write;
use tempfile::NamedTempFile;

#[cfg(test)]
mod node_config_tests {
    use super::*;

    /// Test 1: a full config file round-trips into every section
    #[test]
    fn test_load_full_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
host = "127.0.0.1"
port = 5001
cors_origins = ["http://localhost:3000", "https://detect.example.com"]

[upload]
max_bytes = 1048576
allowed_extensions = ["jpg", "png", "webp"]

[image]
rescale_to_original = true
max_output_pixels = 1000000

[image.resize]
policy = "exact"
width = 300
height = 300

[tensor]
layout = "nhwc"
dtype = "u8"

[dispatch]
mode = "offloaded"
worker_pool_size = 2

[detector]
model_path = "/models/ssd.onnx"
labels_path = "/models/labels.txt"
score_threshold = 0.4
max_detections = 10
"#
        )
        .unwrap();

        let config = NodeConfig::load(file.path()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.socket_addr().unwrap().port(), 5001);
        assert_eq!(config.server.cors_origins.len(), 2);
        assert_eq!(config.upload.max_bytes, 1_048_576);
        assert!(config.upload.allowed_extensions.contains(&"webp".to_string()));
        assert!(config.image.rescale_to_original);
        assert_eq!(config.image.max_output_pixels, 1_000_000);
        assert_eq!(
            config.image.resize,
            ResizePolicy::Exact {
                width: 300,
                height: 300
            }
        );
        assert_eq!(config.dispatch.mode, ExecutionMode::Offloaded);
        assert_eq!(config.dispatch.timeout_ms, None);
        assert_eq!(config.detector.max_detections, 10);
        assert!(config.detector.labels_path.is_some());
    }

    /// Test 2: an empty file is the default configuration
    #[test]
    fn test_empty_file_is_default() {
        let file = NamedTempFile::new().unwrap();
        assert_eq!(NodeConfig::load(file.path()).unwrap(), NodeConfig::default());
    }

    /// Test 3: malformed TOML is a parse error
    #[test]
    fn test_malformed_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[server\nport = ").unwrap();
        assert!(matches!(
            NodeConfig::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    /// Test 4: unknown execution mode is a parse error
    #[test]
    fn test_unknown_mode() {
        assert!(NodeConfig::from_toml("[dispatch]\nmode = \"gpu\"\n").is_err());
    }
}
