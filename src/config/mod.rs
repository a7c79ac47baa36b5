// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Node configuration
//!
//! Everything tunable per deployment lives in [`NodeConfig`]. Values come
//! from defaults, then an optional TOML file, then CLI flags and environment
//! variables (see `cli`).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

use crate::vision::{
    DispatchConfig, ExecutionMode, ImageConfig, ResizePolicy, SsdDetectorConfig, TensorSpec,
    UploadPolicy,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; any origin when empty
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                ConfigError::Invalid(format!("bind address {}:{}: {}", self.host, self.port, e))
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub server: ServerConfig,
    pub upload: UploadPolicy,
    pub image: ImageConfig,
    pub tensor: TensorSpec,
    pub dispatch: DispatchConfig,
    pub detector: SsdDetectorConfig,
}

impl NodeConfig {
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.socket_addr()?;

        if self.upload.max_bytes == 0 {
            return Err(ConfigError::Invalid(
                "upload.max_bytes must be greater than 0".to_string(),
            ));
        }
        if self.upload.allowed_extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "upload.allowed_extensions must not be empty".to_string(),
            ));
        }

        self.image.resize.validate().map_err(ConfigError::Invalid)?;
        if self.image.max_output_pixels == 0 {
            return Err(ConfigError::Invalid(
                "image.max_output_pixels must be greater than 0".to_string(),
            ));
        }
        if let ResizePolicy::Fit { width, height } | ResizePolicy::Exact { width, height } =
            self.image.resize
        {
            if width as u64 * height as u64 > self.image.max_output_pixels {
                return Err(ConfigError::Invalid(format!(
                    "image.resize {}x{} exceeds image.max_output_pixels {}",
                    width, height, self.image.max_output_pixels
                )));
            }
        }

        if self.dispatch.mode == ExecutionMode::Offloaded && self.dispatch.worker_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.dispatch.timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "dispatch.timeout_ms must be greater than 0 when set".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detector.score_threshold) {
            return Err(ConfigError::Invalid(format!(
                "detector.score_threshold must be within [0, 1], got {}",
                self.detector.score_threshold
            )));
        }
        if self.detector.max_detections == 0 {
            return Err(ConfigError::Invalid(
                "detector.max_detections must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
