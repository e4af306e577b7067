//! Scene Change Detection: one rolling baseline per pan/tilt bucket.
//!
//! Each visit to a bucket compares the live frame (scaled to the baseline's
//! brightness) against the stored baseline and reports how much of the
//! scene changed structurally. Baselines absorb slow lighting drift by
//! blending; a surfaced change replaces the baseline outright once the alert
//! has been formed, so the same change is not reported twice.

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::SceneConfig;
use crate::frame::Frame;
use crate::geometry::{BucketKey, ServoPosition};

/// Brightness delta (0–255 scale) above which the blend factor is tripled.
const LIGHTING_SHIFT: f64 = 0.1 * 255.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SceneSettings {
    pub bucket_degrees: f64,
    pub pixel_threshold: f32,
    pub min_change_ratio: f64,
    pub mean_threshold: f64,
    pub blend_factor: f64,
    pub cooldown: Duration,
}

impl From<&SceneConfig> for SceneSettings {
    fn from(cfg: &SceneConfig) -> Self {
        Self {
            bucket_degrees: cfg.bucket_degrees.max(0.5),
            pixel_threshold: cfg.pixel_threshold as f32,
            min_change_ratio: cfg.min_change_ratio.clamp(0.0, 1.0),
            mean_threshold: cfg.mean_threshold.clamp(0.0, 1.0),
            blend_factor: cfg.baseline_blend.clamp(0.0, 1.0),
            cooldown: Duration::from_secs_f64(cfg.cooldown_secs.max(0.0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeResult {
    pub bucket: BucketKey,
    /// First visit: the frame became the baseline, nothing was compared.
    pub baseline_missing: bool,
    pub is_structural: bool,
    /// Structural and outside the bucket's alert cooldown.
    pub alert_worthy: bool,
    pub change_ratio: f64,
    pub mean_diff: f64,
    pub baseline_age_secs: f64,
}

impl ChangeResult {
    fn first_visit(bucket: BucketKey) -> Self {
        Self {
            bucket,
            baseline_missing: true,
            is_structural: false,
            alert_worthy: false,
            change_ratio: 0.0,
            mean_diff: 0.0,
            baseline_age_secs: 0.0,
        }
    }
}

struct SceneBaseline {
    image: Vec<f32>,
    width: u32,
    height: u32,
    brightness: f64,
    last_updated: Instant,
    last_alert: Option<Instant>,
}

impl SceneBaseline {
    fn from_frame(frame: &Frame, brightness: f64, now: Instant) -> Self {
        Self {
            image: frame.pixels().iter().map(|&p| p as f32).collect(),
            width: frame.width(),
            height: frame.height(),
            brightness,
            last_updated: now,
            last_alert: None,
        }
    }

    fn matches(&self, frame: &Frame) -> bool {
        self.width == frame.width() && self.height == frame.height()
    }
}

pub struct SceneChangeDetector {
    settings: SceneSettings,
    baselines: HashMap<BucketKey, SceneBaseline>,
    pending: HashMap<BucketKey, (Vec<f32>, f64)>,
}

impl SceneChangeDetector {
    pub fn new(settings: SceneSettings) -> Self {
        Self {
            settings,
            baselines: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn reconfigure(&mut self, settings: SceneSettings) {
        if settings.bucket_degrees != self.settings.bucket_degrees {
            // Keys no longer line up with the new grid.
            self.reset();
        }
        self.settings = settings;
    }

    pub fn settings(&self) -> &SceneSettings {
        &self.settings
    }

    pub fn bucket_for(&self, position: &ServoPosition) -> BucketKey {
        BucketKey::from_position(position, self.settings.bucket_degrees)
    }

    pub fn describe_bucket(&self, bucket: &BucketKey) -> String {
        bucket.describe(self.settings.bucket_degrees)
    }

    pub fn baseline_count(&self) -> usize {
        self.baselines.len()
    }

    pub fn baseline_brightness(&self, bucket: &BucketKey) -> Option<f64> {
        self.baselines.get(bucket).map(|b| b.brightness)
    }

    /// Compare `frame` with the bucket's baseline and update the baseline.
    pub fn evaluate(&mut self, bucket: BucketKey, frame: &Frame, frame_brightness: f64, now: Instant) -> ChangeResult {
        if self.baselines.get(&bucket).map_or(true, |b| !b.matches(frame)) {
            self.baselines
                .insert(bucket, SceneBaseline::from_frame(frame, frame_brightness, now));
            self.pending.remove(&bucket);
            debug!("Scene baseline created for {:?}", bucket);
            return ChangeResult::first_visit(bucket);
        }
        let Some(baseline) = self.baselines.get_mut(&bucket) else {
            return ChangeResult::first_visit(bucket);
        };

        let s = &self.settings;
        let ratio = (baseline.brightness / frame_brightness.max(1.0)) as f32;
        let pixels = frame.pixels();

        let mut changed = 0usize;
        let mut diff_sum = 0.0f64;
        for (&p, &b) in pixels.iter().zip(baseline.image.iter()) {
            let normalized = (p as f32 * ratio).min(255.0);
            let diff = (normalized - b).abs();
            if diff > s.pixel_threshold {
                changed += 1;
            }
            diff_sum += diff as f64;
        }
        let n = pixels.len().max(1) as f64;
        let change_ratio = changed as f64 / n;
        let mean_diff = diff_sum / n / 255.0;
        let baseline_age_secs = now.saturating_duration_since(baseline.last_updated).as_secs_f64();

        let is_structural = change_ratio >= s.min_change_ratio && mean_diff >= s.mean_threshold;
        let cooldown_ready = baseline
            .last_alert
            .map_or(true, |t| now.saturating_duration_since(t) >= s.cooldown);
        let alert_worthy = is_structural && cooldown_ready;

        // Rolling update runs on every comparison.
        let mut blend = s.blend_factor;
        if (frame_brightness - baseline.brightness).abs() > LIGHTING_SHIFT {
            blend = (blend * 3.0).min(1.0);
        }
        let keep = 1.0 - blend as f32;
        let take = blend as f32;
        for (b, &p) in baseline.image.iter_mut().zip(pixels.iter()) {
            *b = *b * keep + p as f32 * take;
        }
        baseline.brightness = baseline.brightness * (1.0 - blend) + frame_brightness * blend;
        baseline.last_updated = now;

        if alert_worthy {
            baseline.last_alert = Some(now);
            self.pending
                .insert(bucket, (pixels.iter().map(|&p| p as f32).collect(), frame_brightness));
        }

        ChangeResult {
            bucket,
            baseline_missing: false,
            is_structural,
            alert_worthy,
            change_ratio,
            mean_diff,
            baseline_age_secs,
        }
    }

    /// Adopt the frame behind the last alert-worthy result as the new normal.
    pub fn commit_change(&mut self, bucket: BucketKey, now: Instant) {
        let Some((image, brightness)) = self.pending.remove(&bucket) else {
            return;
        };
        if let Some(baseline) = self.baselines.get_mut(&bucket) {
            baseline.image = image;
            baseline.brightness = brightness;
            baseline.last_updated = now;
        }
    }

    pub fn reset(&mut self) {
        self.baselines.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{paint_rect, textured_scene};

    fn settings() -> SceneSettings {
        SceneSettings {
            bucket_degrees: 5.0,
            pixel_threshold: 25.0,
            min_change_ratio: 0.03,
            mean_threshold: 0.06,
            blend_factor: 0.2,
            cooldown: Duration::from_secs(10),
        }
    }

    fn scene(gain: f64, at: Instant) -> Frame {
        Frame::new(textured_scene(160, 120, gain), at)
    }

    fn intruded(x: u32, at: Instant) -> Frame {
        let mut img = textured_scene(160, 120, 1.0);
        paint_rect(&mut img, x, 30, 60, 60, 250);
        Frame::new(img, at)
    }

    fn key() -> BucketKey {
        BucketKey { pan: 18, tilt: 33 }
    }

    #[test]
    fn first_visit_never_alerts() {
        let t0 = Instant::now();
        let mut det = SceneChangeDetector::new(settings());
        let f = intruded(10, t0);
        let r = det.evaluate(key(), &f, f.brightness, t0);
        assert!(r.baseline_missing);
        assert!(!r.is_structural);
        assert!(!r.alert_worthy);
        assert_eq!(det.baseline_count(), 1);
    }

    #[test]
    fn identical_frame_is_quiet() {
        let t0 = Instant::now();
        let mut det = SceneChangeDetector::new(settings());
        let f = scene(1.0, t0);
        det.evaluate(key(), &f, f.brightness, t0);
        let r = det.evaluate(key(), &f, f.brightness, t0 + Duration::from_secs(1));
        assert!(!r.is_structural);
        assert!(r.change_ratio < 1e-9);
        assert!((r.baseline_age_secs - 1.0).abs() < 1e-9);
    }

    #[test]
    fn uniform_brightness_scale_is_not_structural() {
        let t0 = Instant::now();
        let mut det = SceneChangeDetector::new(settings());
        let base = scene(1.0, t0);
        det.evaluate(key(), &base, base.brightness, t0);

        for (i, gain) in [0.6, 1.4, 0.8, 1.25].iter().enumerate() {
            let f = scene(*gain, t0 + Duration::from_secs(1 + i as u64));
            let r = det.evaluate(key(), &f, f.brightness, f.captured_at);
            assert!(!r.is_structural, "gain {} flagged: {:?}", gain, r);
        }
    }

    #[test]
    fn intrusion_is_structural() {
        let t0 = Instant::now();
        let mut det = SceneChangeDetector::new(settings());
        let base = scene(1.0, t0);
        det.evaluate(key(), &base, base.brightness, t0);

        let f = intruded(50, t0 + Duration::from_secs(1));
        let r = det.evaluate(key(), &f, f.brightness, f.captured_at);
        assert!(r.is_structural);
        assert!(r.alert_worthy);
        assert!(r.change_ratio >= 0.03);
        assert!(r.mean_diff >= 0.06);
    }

    #[test]
    fn cooldown_limits_alerts_per_bucket() {
        let t0 = Instant::now();
        let mut det = SceneChangeDetector::new(settings());
        let base = scene(1.0, t0);
        det.evaluate(key(), &base, base.brightness, t0);

        let first = intruded(10, t0 + Duration::from_secs(1));
        let r1 = det.evaluate(key(), &first, first.brightness, first.captured_at);
        assert!(r1.alert_worthy);
        det.commit_change(key(), first.captured_at);

        // A different change inside the cooldown window.
        let second = intruded(90, t0 + Duration::from_secs(4));
        let r2 = det.evaluate(key(), &second, second.brightness, second.captured_at);
        assert!(r2.is_structural);
        assert!(!r2.alert_worthy);

        // Once the cooldown has elapsed, a fresh change surfaces again.
        let third = scene(1.0, t0 + Duration::from_secs(12));
        let r3 = det.evaluate(key(), &third, third.brightness, third.captured_at);
        assert!(r3.is_structural);
        assert!(r3.alert_worthy);
    }

    #[test]
    fn commit_adopts_changed_scene() {
        let t0 = Instant::now();
        let mut det = SceneChangeDetector::new(settings());
        let base = scene(1.0, t0);
        det.evaluate(key(), &base, base.brightness, t0);

        let changed = intruded(50, t0 + Duration::from_secs(1));
        assert!(det.evaluate(key(), &changed, changed.brightness, changed.captured_at).alert_worthy);
        det.commit_change(key(), changed.captured_at);

        let again = intruded(50, t0 + Duration::from_secs(20));
        let r = det.evaluate(key(), &again, again.brightness, again.captured_at);
        assert!(!r.is_structural);
    }

    #[test]
    fn sunrise_drift_converges_without_alerts() {
        let t0 = Instant::now();
        let mut det = SceneChangeDetector::new(settings());
        let mut at = t0;
        let first = scene(0.5, at);
        det.evaluate(key(), &first, first.brightness, at);

        let mut gain = 0.5;
        while gain < 1.5 {
            gain += 0.01;
            at += Duration::from_secs(1);
            let f = scene(gain, at);
            let r = det.evaluate(key(), &f, f.brightness, at);
            assert!(!r.is_structural, "drift flagged at gain {:.2}: {:?}", gain, r);
        }

        let settled = scene(gain, at);
        for _ in 0..20 {
            at += Duration::from_secs(1);
            det.evaluate(key(), &settled, settled.brightness, at);
        }
        let b = det.baseline_brightness(&key()).unwrap();
        assert!((b - settled.brightness).abs() < 1.0, "baseline {} vs {}", b, settled.brightness);
    }

    #[test]
    fn size_change_rebuilds_baseline() {
        let t0 = Instant::now();
        let mut det = SceneChangeDetector::new(settings());
        let f = scene(1.0, t0);
        det.evaluate(key(), &f, f.brightness, t0);
        let small = Frame::new(textured_scene(80, 60, 1.0), t0);
        let r = det.evaluate(key(), &small, small.brightness, t0);
        assert!(r.baseline_missing);
    }

    #[test]
    fn changing_bucket_width_clears_baselines() {
        let t0 = Instant::now();
        let mut det = SceneChangeDetector::new(settings());
        let f = scene(1.0, t0);
        det.evaluate(key(), &f, f.brightness, t0);
        det.reconfigure(SceneSettings { bucket_degrees: 10.0, ..settings() });
        assert_eq!(det.baseline_count(), 0);
    }
}
