// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image decoding and resizing for detection
//!
//! Turns the raw upload bytes into a 3-channel RGB pixel buffer at the
//! resolution selected by the deployment's [`ResizePolicy`].

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Channel count of every decoded image (RGB)
pub const RGB_CHANNELS: usize = 3;

/// Largest resize output accepted by default (4096 x 4096)
pub const DEFAULT_MAX_OUTPUT_PIXELS: u64 = 4096 * 4096;

/// Custom error types for image processing
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Unsupported image format")]
    UnsupportedFormat,

    #[error("Failed to decode image: {0}")]
    DecodeFailed(String),

    #[error("Image data is empty")]
    EmptyData,

    #[error("Image has zero width or height")]
    ZeroDimension,

    #[error("Resized image would be {width}x{height}, above the limit of {limit} pixels")]
    OutputTooLarge { width: u32, height: u32, limit: u64 },
}

/// How an uploaded image is brought to the detector's input resolution.
///
/// The policies are not interchangeable: the tensor shape the detector sees
/// follows from the policy, so a deployment picks exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ResizePolicy {
    /// Scale to fit inside `width` x `height`, preserving aspect ratio.
    /// Output dimensions vary with the input aspect ratio.
    Fit { width: u32, height: u32 },
    /// Scale to exactly `width` x `height`; aspect ratio may be distorted.
    Exact { width: u32, height: u32 },
    /// Scale so the shorter side equals `size`, preserving aspect ratio.
    ShortSide { size: u32 },
}

impl Default for ResizePolicy {
    fn default() -> Self {
        ResizePolicy::Fit {
            width: 100,
            height: 100,
        }
    }
}

impl ResizePolicy {
    /// Output dimensions for an input of `width` x `height`
    pub fn target_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        match *self {
            ResizePolicy::Exact { width, height } => (width, height),
            ResizePolicy::Fit {
                width: box_w,
                height: box_h,
            } => {
                let scale = (box_w as f64 / width as f64).min(box_h as f64 / height as f64);
                let new_w = ((width as f64 * scale).round() as u32).clamp(1, box_w);
                let new_h = ((height as f64 * scale).round() as u32).clamp(1, box_h);
                (new_w, new_h)
            }
            ResizePolicy::ShortSide { size } => {
                let scale = size as f64 / width.min(height) as f64;
                let new_w = ((width as f64 * scale).round() as u32).max(1);
                let new_h = ((height as f64 * scale).round() as u32).max(1);
                (new_w, new_h)
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let ok = match *self {
            ResizePolicy::Fit { width, height } | ResizePolicy::Exact { width, height } => {
                width > 0 && height > 0
            }
            ResizePolicy::ShortSide { size } => size > 0,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("resize target must be non-zero: {:?}", self))
        }
    }
}

/// Image decoding settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub resize: ResizePolicy,
    /// Report boxes in original image pixels instead of resized image pixels
    pub rescale_to_original: bool,
    /// Upper bound on `width * height` of the resized image
    pub max_output_pixels: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            resize: ResizePolicy::default(),
            rescale_to_original: false,
            max_output_pixels: DEFAULT_MAX_OUTPUT_PIXELS,
        }
    }
}

impl From<ResizePolicy> for ImageConfig {
    fn from(resize: ResizePolicy) -> Self {
        Self {
            resize,
            ..Self::default()
        }
    }
}

/// Row-major RGB pixel buffer at detector resolution
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    /// Interleaved RGB bytes, `width * height * 3` long
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Dimensions of the upload before resizing
    pub source_width: u32,
    pub source_height: u32,
}

impl DecodedImage {
    pub fn channels(&self) -> usize {
        RGB_CHANNELS
    }

    /// Factors mapping resized coordinates back onto the source image
    pub fn scale_to_source(&self) -> (f64, f64) {
        (
            self.source_width as f64 / self.width as f64,
            self.source_height as f64 / self.height as f64,
        )
    }
}

/// Decode raw image bytes (for multipart uploads) and resize per `config`
///
/// # Arguments
/// * `bytes` - Raw image bytes
/// * `config` - Resize policy and output limit of the deployment
///
/// # Returns
/// * `Ok(DecodedImage)` - RGB pixels at the target resolution
/// * `Err(ImageError)` - If the bytes are not a decodable image, or the
///   resized output would exceed `config.max_output_pixels`
pub fn decode_image_bytes(bytes: &[u8], config: &ImageConfig) -> Result<DecodedImage, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::EmptyData);
    }

    // Detect format from magic bytes
    let format = detect_format(bytes)?;

    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ImageError::DecodeFailed(e.to_string()))?;

    resize_to_rgb(&img, config)
}

/// Resize an already decoded image and force it to 3 channels
pub fn resize_to_rgb(img: &DynamicImage, config: &ImageConfig) -> Result<DecodedImage, ImageError> {
    let (source_width, source_height) = (img.width(), img.height());
    if source_width == 0 || source_height == 0 {
        return Err(ImageError::ZeroDimension);
    }

    let (width, height) = config.resize.target_dimensions(source_width, source_height);
    if width as u64 * height as u64 > config.max_output_pixels {
        return Err(ImageError::OutputTooLarge {
            width,
            height,
            limit: config.max_output_pixels,
        });
    }

    // Alpha and grayscale inputs are flattened to RGB
    let rgb = if (width, height) == (source_width, source_height) {
        img.to_rgb8()
    } else {
        img.resize_exact(width, height, FilterType::Lanczos3).to_rgb8()
    };

    Ok(DecodedImage {
        pixels: rgb.into_raw(),
        width,
        height,
        source_width,
        source_height,
    })
}

/// Detect image format from magic bytes
///
/// # Arguments
/// * `bytes` - Raw image data
///
/// # Returns
/// * `Ok(ImageFormat)` - Detected format
/// * `Err(ImageError::UnsupportedFormat)` - If format cannot be detected
pub fn detect_format(bytes: &[u8]) -> Result<ImageFormat, ImageError> {
    if bytes.len() < 4 {
        return Err(ImageError::UnsupportedFormat);
    }

    match bytes {
        // PNG: 89 50 4E 47 (0x89 P N G)
        [0x89, 0x50, 0x4E, 0x47, ..] => Ok(ImageFormat::Png),

        // JPEG: FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Ok(ImageFormat::Jpeg),

        // WebP: RIFF .... WEBP
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Ok(ImageFormat::WebP),

        // GIF: GIF87a or GIF89a
        [0x47, 0x49, 0x46, 0x38, x, ..] if *x == 0x37 || *x == 0x39 => Ok(ImageFormat::Gif),

        // BMP: BM
        [0x42, 0x4D, ..] => Ok(ImageFormat::Bmp),

        _ => Err(ImageError::UnsupportedFormat),
    }
}
