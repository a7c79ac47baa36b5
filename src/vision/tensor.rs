// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Tensor construction for the detector input
//!
//! The layout (with or without a leading batch axis) and element type are
//! part of the detector's contract and come from configuration; they are
//! never inferred from the image.

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::image_utils::{DecodedImage, RGB_CHANNELS};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    #[error("Tensor buffer has {actual} elements but shape {shape:?} needs {expected}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("Tensor byte payload of {0} bytes is not a whole number of elements")]
    TruncatedPayload(usize),
}

/// Axis layout of the tensor handed to the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorLayout {
    /// `[H, W, C]`
    #[default]
    Hwc,
    /// `[1, H, W, C]`
    Nhwc,
}

/// Element type of the tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorDtype {
    /// Raw 0-255 pixel values
    #[default]
    U8,
    /// Pixel values scaled to 0.0-1.0
    F32,
}

/// Tensor contract of the deployed detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TensorSpec {
    pub layout: TensorLayout,
    pub dtype: TensorDtype,
}

/// Backing buffer of a tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorData {
    U8(Vec<u8>),
    F32(Vec<f32>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::U8(data) => data.len(),
            TensorData::F32(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> TensorDtype {
        match self {
            TensorData::U8(_) => TensorDtype::U8,
            TensorData::F32(_) => TensorDtype::F32,
        }
    }
}

/// Shaped pixel tensor. `data.len()` always equals the product of `shape`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: TensorData,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: TensorData) -> Result<Self, TensorError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(TensorError::ShapeMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn dtype(&self) -> TensorDtype {
        self.data.dtype()
    }

    pub fn is_batched(&self) -> bool {
        self.shape.len() == 4
    }

    /// `(height, width)` of the image held by the tensor
    pub fn image_dimensions(&self) -> (usize, usize) {
        let offset = if self.is_batched() { 1 } else { 0 };
        (
            self.shape.get(offset).copied().unwrap_or(0),
            self.shape.get(offset + 1).copied().unwrap_or(0),
        )
    }

    /// Raw little-endian bytes of the buffer, for crossing a worker boundary
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match &self.data {
            TensorData::U8(data) => data.clone(),
            TensorData::F32(data) => data.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    /// Rebuild a tensor from the output of [`Tensor::to_le_bytes`]
    pub fn from_le_bytes(
        shape: Vec<usize>,
        dtype: TensorDtype,
        bytes: Vec<u8>,
    ) -> Result<Self, TensorError> {
        let data = match dtype {
            TensorDtype::U8 => TensorData::U8(bytes),
            TensorDtype::F32 => {
                if bytes.len() % 4 != 0 {
                    return Err(TensorError::TruncatedPayload(bytes.len()));
                }
                TensorData::F32(
                    bytes
                        .chunks_exact(4)
                        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                        .collect(),
                )
            }
        };
        Self::new(shape, data)
    }

    /// View as an ndarray with a leading batch axis, as ONNX models expect
    pub fn to_batched_u8(&self) -> Option<ArrayD<u8>> {
        match &self.data {
            TensorData::U8(data) => {
                ArrayD::from_shape_vec(IxDyn(&self.batched_shape()), data.clone()).ok()
            }
            TensorData::F32(_) => None,
        }
    }

    pub fn to_batched_f32(&self) -> Option<ArrayD<f32>> {
        match &self.data {
            TensorData::F32(data) => {
                ArrayD::from_shape_vec(IxDyn(&self.batched_shape()), data.clone()).ok()
            }
            TensorData::U8(_) => None,
        }
    }

    fn batched_shape(&self) -> Vec<usize> {
        if self.is_batched() {
            self.shape.clone()
        } else {
            std::iter::once(1).chain(self.shape.iter().copied()).collect()
        }
    }
}

/// Build the detector input tensor from a decoded image
///
/// Pure and deterministic: the same image and spec always produce the
/// same buffer.
pub fn build_tensor(image: &DecodedImage, spec: &TensorSpec) -> Result<Tensor, TensorError> {
    let (h, w, c) = (image.height as usize, image.width as usize, RGB_CHANNELS);
    let shape = match spec.layout {
        TensorLayout::Hwc => vec![h, w, c],
        TensorLayout::Nhwc => vec![1, h, w, c],
    };

    let data = match spec.dtype {
        TensorDtype::U8 => TensorData::U8(image.pixels.clone()),
        TensorDtype::F32 => {
            TensorData::F32(image.pixels.iter().map(|&p| p as f32 / 255.0).collect())
        }
    };

    Tensor::new(shape, data)
}
