// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use clap::Parser;
use std::path::PathBuf;

use crate::config::{ConfigError, NodeConfig};
use crate::vision::ExecutionMode;

/// Fabstir Vision Node
///
/// Flags override the config file; each flag can also be set through the
/// named environment variable.
#[derive(Parser, Debug, Default)]
#[command(name = "fabstir-vision-node")]
#[command(version)]
#[command(about = "Object detection over HTTP image uploads", long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, short = 'c', env = "NODE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind host
    #[arg(long, env = "BIND_HOST")]
    pub host: Option<String>,

    /// Bind port
    #[arg(long, short = 'p', env = "PORT")]
    pub port: Option<u16>,

    /// ONNX detection model
    #[arg(long, env = "MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    /// Labels file, one class name per line
    #[arg(long, env = "LABELS_PATH")]
    pub labels_path: Option<PathBuf>,

    /// Where detector calls run (inline or offloaded)
    #[arg(long, env = "EXECUTION_MODE")]
    pub execution_mode: Option<ExecutionMode>,

    /// Worker threads in offloaded mode
    #[arg(long, env = "WORKER_POOL_SIZE")]
    pub worker_pool_size: Option<usize>,

    /// Maximum upload size in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: Option<usize>,

    /// Per-request detection timeout in milliseconds
    #[arg(long, env = "INFERENCE_TIMEOUT_MS")]
    pub inference_timeout_ms: Option<u64>,

    /// Allowed CORS origins (comma separated)
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,
}

impl Cli {
    /// Load the config file (or defaults) and apply overrides
    pub fn resolve(&self) -> Result<NodeConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut NodeConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(origins) = &self.cors_origins {
            config.server.cors_origins = origins.clone();
        }
        if let Some(path) = &self.model_path {
            config.detector.model_path = path.clone();
        }
        if let Some(path) = &self.labels_path {
            config.detector.labels_path = Some(path.clone());
        }
        if let Some(mode) = self.execution_mode {
            config.dispatch.mode = mode;
        }
        if let Some(size) = self.worker_pool_size {
            config.dispatch.worker_pool_size = size;
        }
        if let Some(bytes) = self.max_upload_bytes {
            config.upload.max_bytes = bytes;
        }
        if let Some(timeout) = self.inference_timeout_ms {
            config.dispatch.timeout_ms = Some(timeout);
        }
    }
}
