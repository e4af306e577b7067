//! Motion Detection: raw per-frame motion observation.
//!
//! The control loop only depends on the `MotionDetector` trait; the
//! `FrameDiffDetector` here is a lightweight running-average background
//! subtractor good enough for a single fixed viewpoint between servo moves.

use std::time::Instant;

use crate::frame::Frame;
use crate::error::Result;

// ─── Observation ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn perimeter(&self) -> f64 {
        2.0 * (self.width as f64 + self.height as f64)
    }
}

/// One frame's raw motion result. Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionObservation {
    pub detected: bool,
    pub area_pixels: u32,
    pub centroid: (f64, f64),
    pub bbox: BoundingBox,
    /// 0–1
    pub confidence: f64,
    /// width / height of the bounding box
    pub aspect_ratio: f64,
    /// normalized perimeter²/area, 0–1
    pub compactness: f64,
    /// 0–255
    pub frame_brightness: f64,
    pub observed_at: Instant,
}

impl MotionObservation {
    pub fn none(frame_brightness: f64, observed_at: Instant) -> Self {
        Self {
            detected: false,
            area_pixels: 0,
            centroid: (0.0, 0.0),
            bbox: BoundingBox::default(),
            confidence: 0.0,
            aspect_ratio: 1.0,
            compactness: 0.0,
            frame_brightness,
            observed_at,
        }
    }

    /// Sanity check used before enrichment; NaNs or a zero-area detection
    /// are treated as "no motion" downstream.
    pub fn is_well_formed(&self) -> bool {
        self.detected
            && self.area_pixels > 0
            && self.centroid.0.is_finite()
            && self.centroid.1.is_finite()
            && self.confidence.is_finite()
            && self.aspect_ratio.is_finite()
            && self.compactness.is_finite()
            && self.frame_brightness.is_finite()
    }
}

/// Shape compactness from bounding-box perimeter: perimeter²/area scaled so
/// that a highly irregular blob saturates at 1.0 (a circle sits near 0.25).
pub fn compactness(perimeter: f64, area: f64) -> f64 {
    if area <= 0.0 {
        return 0.0;
    }
    (perimeter * perimeter / area / 50.0).min(1.0)
}

pub trait MotionDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<MotionObservation>;

    /// Drop the learned background (called after the camera moves).
    fn reset(&mut self);

    fn set_min_area_ratio(&mut self, _ratio: f64) {}
}

// ─── Frame-difference detector ───────────────────────────────────────────────

pub struct FrameDiffDetector {
    background: Option<Vec<f32>>,
    width: u32,
    height: u32,
    pixel_threshold: f32,
    learning_rate: f32,
    min_area_ratio: f64,
}

impl FrameDiffDetector {
    pub fn new(pixel_threshold: u8, learning_rate: f32, min_area_ratio: f64) -> Self {
        Self {
            background: None,
            width: 0,
            height: 0,
            pixel_threshold: pixel_threshold as f32,
            learning_rate: learning_rate.clamp(0.0, 1.0),
            min_area_ratio,
        }
    }
}

impl MotionDetector for FrameDiffDetector {
    fn detect(&mut self, frame: &Frame) -> Result<MotionObservation> {
        let pixels = frame.pixels();
        let (w, h) = (frame.width(), frame.height());

        let background = match self.background.as_mut() {
            Some(bg) if self.width == w && self.height == h => bg,
            _ => {
                self.background = Some(pixels.iter().map(|&p| p as f32).collect());
                self.width = w;
                self.height = h;
                return Ok(MotionObservation::none(frame.brightness, frame.captured_at));
            }
        };

        let mut count: u64 = 0;
        let (mut sum_x, mut sum_y) = (0u64, 0u64);
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);
        let alpha = self.learning_rate;

        for (i, (&p, bg)) in pixels.iter().zip(background.iter_mut()).enumerate() {
            let value = p as f32;
            if (value - *bg).abs() > self.pixel_threshold {
                let x = (i as u32) % w;
                let y = (i as u32) / w;
                count += 1;
                sum_x += x as u64;
                sum_y += y as u64;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
            *bg += (value - *bg) * alpha;
        }

        let frame_area = (w as f64) * (h as f64);
        if count == 0 || (count as f64) < frame_area * self.min_area_ratio {
            return Ok(MotionObservation::none(frame.brightness, frame.captured_at));
        }

        let bbox = BoundingBox {
            x: min_x,
            y: min_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
        };
        let area = count as f64;

        Ok(MotionObservation {
            detected: true,
            area_pixels: count as u32,
            centroid: (sum_x as f64 / area, sum_y as f64 / area),
            bbox,
            confidence: (area / (frame_area * 0.5)).min(1.0),
            aspect_ratio: bbox.width as f64 / bbox.height as f64,
            compactness: compactness(bbox.perimeter(), area),
            frame_brightness: frame.brightness,
            observed_at: frame.captured_at,
        })
    }

    fn reset(&mut self) {
        self.background = None;
    }

    fn set_min_area_ratio(&mut self, ratio: f64) {
        self.min_area_ratio = ratio;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{paint_rect, textured_scene};
    use std::time::Duration;

    fn frame_with_block(x: u32, at: Instant) -> Frame {
        let mut img = textured_scene(160, 120, 1.0);
        paint_rect(&mut img, x, 40, 16, 32, 250);
        Frame::new(img, at)
    }

    #[test]
    fn first_frame_learns_background() {
        let mut det = FrameDiffDetector::new(25, 0.05, 0.015);
        let obs = det.detect(&frame_with_block(10, Instant::now())).unwrap();
        assert!(!obs.detected);
    }

    #[test]
    fn detects_new_block() {
        let t0 = Instant::now();
        let mut det = FrameDiffDetector::new(25, 0.05, 0.015);
        det.detect(&Frame::new(textured_scene(160, 120, 1.0), t0)).unwrap();

        let obs = det
            .detect(&frame_with_block(60, t0 + Duration::from_millis(66)))
            .unwrap();
        assert!(obs.detected);
        assert_eq!(obs.bbox.width, 16);
        assert_eq!(obs.bbox.height, 32);
        assert!((obs.aspect_ratio - 0.5).abs() < 1e-9);
        assert!((obs.centroid.0 - 67.5).abs() < 1e-9);
        assert!(obs.confidence > 0.0 && obs.confidence <= 1.0);
    }

    #[test]
    fn static_scene_is_quiet() {
        let t0 = Instant::now();
        let mut det = FrameDiffDetector::new(25, 0.05, 0.015);
        for i in 0..5 {
            let obs = det
                .detect(&Frame::new(textured_scene(160, 120, 1.0), t0 + Duration::from_millis(66 * i)))
                .unwrap();
            assert!(!obs.detected);
        }
    }

    #[test]
    fn reset_relearns() {
        let t0 = Instant::now();
        let mut det = FrameDiffDetector::new(25, 0.05, 0.015);
        det.detect(&Frame::new(textured_scene(160, 120, 1.0), t0)).unwrap();
        det.reset();
        let obs = det.detect(&frame_with_block(60, t0)).unwrap();
        assert!(!obs.detected);
    }

    #[test]
    fn compactness_saturates() {
        assert_eq!(compactness(100.0, 0.0), 0.0);
        assert_eq!(compactness(1000.0, 10.0), 1.0);
        assert!(compactness(96.0, 512.0) < 0.4);
    }
}
