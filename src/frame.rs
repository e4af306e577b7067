//! Captured frame: grayscale pixel buffer plus brightness estimate and
//! timestamps. Frames are immutable once captured and shared as `Arc<Frame>`
//! between the capture thread and the control loop.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use chrono::{DateTime, Utc};
use image::{codecs::jpeg::JpegEncoder, GrayImage, Luma};
use std::time::Instant;

use crate::error::{Result, SentinelError};

#[derive(Debug, Clone)]
pub struct Frame {
    image: GrayImage,
    /// Mean intensity, 0–255.
    pub brightness: f64,
    /// Monotonic capture time, used for every duration computation.
    pub captured_at: Instant,
    /// Wall-clock capture time, used only for alert payloads.
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: GrayImage, captured_at: Instant) -> Self {
        let brightness = mean_intensity(image.as_raw());
        Self {
            image,
            brightness,
            captured_at,
            timestamp: Utc::now(),
        }
    }

    /// Wrap a raw row-major 8-bit buffer.
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>, captured_at: Instant) -> Result<Self> {
        let image = GrayImage::from_raw(width, height, pixels)
            .ok_or(SentinelError::FrameSize { width, height })?;
        Ok(Self::new(image, captured_at))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    /// JPEG-encode the frame and return it base64 encoded for alert payloads.
    pub fn to_jpeg_base64(&self, quality: u8) -> Result<String> {
        let mut buf = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
        self.image.write_with_encoder(encoder)?;
        Ok(B64.encode(&buf))
    }
}

pub fn mean_intensity(pixels: &[u8]) -> f64 {
    if pixels.is_empty() {
        return 0.0;
    }
    let sum: u64 = pixels.iter().map(|&p| p as u64).sum();
    sum as f64 / pixels.len() as f64
}

/// Deterministic textured scene at a given illumination `gain`.
///
/// The texture has enough structure that a shifted or occluded copy is
/// distinguishable from a uniformly brighter or darker copy.
pub fn textured_scene(width: u32, height: u32, gain: f64) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let cell = ((x / 8) + (y / 8)) % 2;
        let ramp = (x * 40 / width.max(1)) as f64;
        let base = if cell == 0 { 70.0 } else { 110.0 } + ramp;
        Luma([(base * gain).round().clamp(0.0, 255.0) as u8])
    })
}

/// Paint a filled rectangle of intensity `value` into `image`.
pub fn paint_rect(image: &mut GrayImage, x: u32, y: u32, w: u32, h: u32, value: u8) {
    let x_end = (x + w).min(image.width());
    let y_end = (y + h).min(image.height());
    for yy in y..y_end {
        for xx in x..x_end {
            image.put_pixel(xx, yy, Luma([value]));
        }
    }
}
