//! Owned frame buffers.
//!
//! A `Frame` is exclusively owned by the pipeline stage currently holding it.
//! It is intentionally not `Clone`: stages hand frames to each other by value,
//! so the capture worker and the display side never alias one buffer.

use std::time::Instant;

use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

use crate::error::{PipelineError, Result};

/// Raw pixel buffer with interleaved channels, row-major, 8 bits per channel.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    captured_at: Instant,
}

impl Frame {
    /// Wrap a pixel buffer captured now.
    ///
    /// `channels` must be 1 (gray), 3 (RGB) or 4 (RGBA) and the buffer length
    /// must match the dimensions exactly.
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8) -> Result<Self> {
        Self::with_capture_time(data, width, height, channels, Instant::now())
    }

    pub fn with_capture_time(
        data: Vec<u8>,
        width: u32,
        height: u32,
        channels: u8,
        captured_at: Instant,
    ) -> Result<Self> {
        if !matches!(channels, 1 | 3 | 4) {
            return Err(PipelineError::Shape(format!(
                "unsupported channel count {}",
                channels
            )));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(channels as usize))
            .ok_or_else(|| PipelineError::Shape("frame dimensions overflow".into()))?;
        if data.len() != expected {
            return Err(PipelineError::Shape(format!(
                "frame buffer length mismatch: expected {}, got {}",
                expected,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
            captured_at,
        })
    }

    /// Take ownership of an RGB image, keeping the given capture time.
    pub fn from_rgb_image(image: RgbImage, captured_at: Instant) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            channels: 3,
            captured_at,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Borrowing RGB conversion. Copies the buffer.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        self.as_dynamic(self.data.clone()).map(DynamicImage::into_rgb8)
    }

    /// Consuming RGB conversion. Reuses the buffer when already RGB.
    pub fn into_rgb_image(self) -> Result<RgbImage> {
        let Frame {
            data,
            width,
            height,
            channels,
            ..
        } = self;
        Self::dynamic_from_parts(data, width, height, channels).map(DynamicImage::into_rgb8)
    }

    fn as_dynamic(&self, data: Vec<u8>) -> Result<DynamicImage> {
        Self::dynamic_from_parts(data, self.width, self.height, self.channels)
    }

    fn dynamic_from_parts(
        data: Vec<u8>,
        width: u32,
        height: u32,
        channels: u8,
    ) -> Result<DynamicImage> {
        let image = match channels {
            1 => GrayImage::from_raw(width, height, data).map(DynamicImage::ImageLuma8),
            3 => RgbImage::from_raw(width, height, data).map(DynamicImage::ImageRgb8),
            4 => RgbaImage::from_raw(width, height, data).map(DynamicImage::ImageRgba8),
            _ => None,
        };
        image.ok_or_else(|| {
            PipelineError::Shape(format!(
                "buffer does not describe a {}x{}x{} image",
                width, height, channels
            ))
        })
    }
}
