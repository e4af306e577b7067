//! Motion Intelligence: turns raw observations into classified, scored motion.
//!
//! Keeps a short trajectory of centroids and a detection window, and derives:
//! - velocity / speed (px/s) from the last three centroids
//! - persistence (fraction of recent frames with motion)
//! - lighting context from frame brightness
//! - heuristic classification (ordered rule ladder, first match wins)
//! - threat level and adjusted confidence, both clamped to [0, 1]

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Instant;

use crate::motion::{BoundingBox, MotionObservation};

const VELOCITY_SAMPLES: usize = 3;
const MIN_OSCILLATION_SAMPLES: usize = 5;
const OSCILLATION_RATIO: f64 = 0.6;

// ─── Labels ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionClass {
    Person,
    Vehicle,
    Animal,
    Environmental,
    Unknown,
}

impl MotionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionClass::Person        => "person",
            MotionClass::Vehicle       => "vehicle",
            MotionClass::Animal        => "animal",
            MotionClass::Environmental => "environmental",
            MotionClass::Unknown       => "unknown",
        }
    }

    pub fn base_threat(&self) -> f64 {
        match self {
            MotionClass::Person        => 0.7,
            MotionClass::Vehicle       => 0.6,
            MotionClass::Animal        => 0.3,
            MotionClass::Environmental => 0.1,
            MotionClass::Unknown       => 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LightingContext {
    Unknown,
    Night,
    Dawn,
    Dusk,
    Day,
}

impl LightingContext {
    /// Threat multiplier applied after the additive score.
    pub fn threat_factor(&self) -> f64 {
        match self {
            LightingContext::Night => 1.3,
            LightingContext::Dawn | LightingContext::Dusk => 1.15,
            LightingContext::Day | LightingContext::Unknown => 1.0,
        }
    }

    fn from_brightness(brightness: f64, previous: Option<f64>) -> Self {
        if brightness < 50.0 {
            LightingContext::Night
        } else if brightness < 100.0 {
            match previous {
                Some(prev) if brightness > prev => LightingContext::Dawn,
                _ => LightingContext::Dusk,
            }
        } else {
            LightingContext::Day
        }
    }
}

// ─── Classification rules ────────────────────────────────────────────────────

/// Inputs of the classification ladder. Pure data, no history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeFeatures {
    pub aspect_ratio: f64,
    pub area_ratio: f64,
    /// px/s
    pub speed: f64,
    pub compactness: f64,
    pub oscillating: bool,
}

pub struct ClassRule {
    pub label: MotionClass,
    pub matches: fn(&ShapeFeatures) -> bool,
}

fn near_lens_artifact(f: &ShapeFeatures) -> bool {
    f.area_ratio < 0.02 && f.speed > 30.0 && f.compactness > 0.6
}

fn upright_walker(f: &ShapeFeatures) -> bool {
    (0.4..=0.8).contains(&f.aspect_ratio)
        && (0.03..=0.30).contains(&f.area_ratio)
        && f.speed > 15.0
        && f.speed < 100.0
}

fn wide_fast_mover(f: &ShapeFeatures) -> bool {
    f.aspect_ratio > 1.5 && f.speed > 50.0 && f.compactness < 0.5
}

fn small_irregular_mover(f: &ShapeFeatures) -> bool {
    f.compactness < 0.4 && (10.0..=80.0).contains(&f.speed) && f.area_ratio < 0.15
}

fn background_churn(f: &ShapeFeatures) -> bool {
    f.speed < 10.0 || f.area_ratio > 0.40 || f.oscillating
}

/// Evaluated top to bottom; the first matching rule wins. The order is part
/// of the contract: an insect near the lens must be caught before it can
/// look like a person, and the broad environmental catch-all comes last.
pub const CLASSIFICATION_RULES: [ClassRule; 5] = [
    ClassRule { label: MotionClass::Environmental, matches: near_lens_artifact },
    ClassRule { label: MotionClass::Person,        matches: upright_walker },
    ClassRule { label: MotionClass::Vehicle,       matches: wide_fast_mover },
    ClassRule { label: MotionClass::Animal,        matches: small_irregular_mover },
    ClassRule { label: MotionClass::Environmental, matches: background_churn },
];

pub fn classify(features: &ShapeFeatures) -> MotionClass {
    CLASSIFICATION_RULES
        .iter()
        .find(|rule| (rule.matches)(features))
        .map(|rule| rule.label)
        .unwrap_or(MotionClass::Unknown)
}

/// Additive score from class, speed, persistence and size, scaled by the
/// lighting factor. Clamped before and after scaling.
pub fn threat_level(
    class: MotionClass,
    speed: f64,
    persistence: f64,
    area_ratio: f64,
    lighting: LightingContext,
) -> f64 {
    let score = class.base_threat()
        + (speed / 500.0).min(0.2)
        + (persistence * 0.15).min(0.15)
        + (area_ratio * 0.25).min(0.1);
    (score.clamp(0.0, 1.0) * lighting.threat_factor()).clamp(0.0, 1.0)
}

// ─── Enriched motion ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedMotion {
    pub detected: bool,
    pub area_pixels: u32,
    pub area_ratio: f64,
    pub centroid: (f64, f64),
    pub bbox: BoundingBox,
    pub aspect_ratio: f64,
    pub compactness: f64,
    pub frame_brightness: f64,
    pub velocity: (f64, f64),
    pub speed: f64,
    pub persistence: f64,
    pub oscillating: bool,
    pub lighting: LightingContext,
    /// `None` when nothing was detected.
    pub classification: Option<MotionClass>,
    pub threat_level: f64,
    pub adjusted_confidence: f64,
}

impl EnrichedMotion {
    pub fn none(frame_brightness: f64, lighting: LightingContext) -> Self {
        Self {
            detected: false,
            area_pixels: 0,
            area_ratio: 0.0,
            centroid: (0.0, 0.0),
            bbox: BoundingBox::default(),
            aspect_ratio: 0.0,
            compactness: 0.0,
            frame_brightness,
            velocity: (0.0, 0.0),
            speed: 0.0,
            persistence: 0.0,
            oscillating: false,
            lighting,
            classification: None,
            threat_level: 0.0,
            adjusted_confidence: 0.0,
        }
    }

    pub fn requires_immediate_attention(&self) -> bool {
        self.detected && self.threat_level >= 0.6 && self.speed > 20.0
    }

    pub fn is_significant(&self, min_area_ratio: f64) -> bool {
        self.detected && self.area_ratio >= min_area_ratio && self.adjusted_confidence >= 0.3
    }
}

// ─── Trajectory ──────────────────────────────────────────────────────────────

struct Trajectory {
    samples: VecDeque<(f64, f64, Instant)>,
    capacity: usize,
}

impl Trajectory {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(2),
        }
    }

    fn push(&mut self, x: f64, y: f64, at: Instant) {
        self.samples.push_back((x, y, at));
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    fn clear(&mut self) {
        self.samples.clear();
    }

    /// Average displacement over the last three samples divided by elapsed time.
    fn velocity(&self) -> (f64, f64) {
        let n = self.samples.len();
        if n < 2 {
            return (0.0, 0.0);
        }
        let recent: Vec<_> = self.samples.iter().skip(n.saturating_sub(VELOCITY_SAMPLES)).collect();
        let (mut dx, mut dy, mut dt) = (0.0, 0.0, 0.0);
        for pair in recent.windows(2) {
            let (x1, y1, t1) = *pair[0];
            let (x2, y2, t2) = *pair[1];
            let step = t2.saturating_duration_since(t1).as_secs_f64();
            if step > 0.0 {
                dx += x2 - x1;
                dy += y2 - y1;
                dt += step;
            }
        }
        if dt == 0.0 {
            (0.0, 0.0)
        } else {
            (dx / dt, dy / dt)
        }
    }

    /// Direction reversals along the dominant axis, as a fraction of steps.
    fn is_oscillating(&self) -> bool {
        let n = self.samples.len();
        if n < MIN_OSCILLATION_SAMPLES {
            return false;
        }
        let steps: Vec<(f64, f64)> = self
            .samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .map(|(a, b)| (b.0 - a.0, b.1 - a.1))
            .collect();
        let span_x: f64 = steps.iter().map(|s| s.0.abs()).sum();
        let span_y: f64 = steps.iter().map(|s| s.1.abs()).sum();
        let axis: Vec<f64> = if span_x >= span_y {
            steps.iter().map(|s| s.0).collect()
        } else {
            steps.iter().map(|s| s.1).collect()
        };

        let reversals = axis
            .windows(2)
            .filter(|w| w[0] * w[1] < 0.0)
            .count();
        reversals as f64 / (n - 2) as f64 > OSCILLATION_RATIO
    }

    fn last(&self) -> Option<(f64, f64)> {
        self.samples.back().map(|s| (s.0, s.1))
    }
}

// ─── Analyzer ────────────────────────────────────────────────────────────────

pub struct MotionIntelligence {
    frame_width: u32,
    frame_height: u32,
    persistence_window: usize,
    detections: VecDeque<bool>,
    trajectory: Trajectory,
    last_brightness: Option<f64>,
    lighting: LightingContext,
}

impl MotionIntelligence {
    pub fn new(frame_width: u32, frame_height: u32, persistence_window: usize, trajectory_len: usize) -> Self {
        let persistence_window = persistence_window.max(1);
        Self {
            frame_width,
            frame_height,
            persistence_window,
            detections: VecDeque::with_capacity(persistence_window),
            trajectory: Trajectory::new(trajectory_len),
            last_brightness: None,
            lighting: LightingContext::Unknown,
        }
    }

    pub fn set_frame_size(&mut self, width: u32, height: u32) {
        self.frame_width = width;
        self.frame_height = height;
    }

    pub fn lighting(&self) -> LightingContext {
        self.lighting
    }

    /// Enrich one observation. Never fails: anything malformed is treated as
    /// "no motion" and yields a zero-valued result.
    pub fn analyze(&mut self, observation: &MotionObservation, current_brightness: f64) -> EnrichedMotion {
        let brightness = if current_brightness.is_finite() {
            current_brightness.clamp(0.0, 255.0)
        } else {
            observation.frame_brightness.clamp(0.0, 255.0)
        };
        self.lighting = LightingContext::from_brightness(brightness, self.last_brightness);

        if !observation.is_well_formed() {
            self.record_detection(false);
            self.trajectory.clear();
            self.last_brightness = Some(brightness);
            return EnrichedMotion::none(brightness, self.lighting);
        }

        self.record_detection(true);
        let persistence = self.persistence();

        self.trajectory
            .push(observation.centroid.0, observation.centroid.1, observation.observed_at);
        let velocity = self.trajectory.velocity();
        let speed = (velocity.0 * velocity.0 + velocity.1 * velocity.1).sqrt();

        let frame_area = (self.frame_width as f64 * self.frame_height as f64).max(1.0);
        let area_ratio = (observation.area_pixels as f64 / frame_area).min(1.0);

        let features = ShapeFeatures {
            aspect_ratio: observation.aspect_ratio,
            area_ratio,
            speed,
            compactness: observation.compactness,
            oscillating: self.trajectory.is_oscillating(),
        };
        let classification = classify(&features);
        let threat = threat_level(classification, speed, persistence, area_ratio, self.lighting);
        let adjusted_confidence = self.adjust_confidence(observation.confidence, persistence, brightness);
        self.last_brightness = Some(brightness);

        EnrichedMotion {
            detected: true,
            area_pixels: observation.area_pixels,
            area_ratio,
            centroid: observation.centroid,
            bbox: observation.bbox,
            aspect_ratio: observation.aspect_ratio,
            compactness: observation.compactness,
            frame_brightness: brightness,
            velocity,
            speed,
            persistence,
            oscillating: features.oscillating,
            lighting: self.lighting,
            classification: Some(classification),
            threat_level: threat,
            adjusted_confidence,
        }
    }

    /// Extrapolate the last centroid by the current velocity.
    pub fn predicted_position(&self, seconds_ahead: f64) -> Option<(f64, f64)> {
        if self.trajectory.samples.len() < 2 {
            return None;
        }
        let (vx, vy) = self.trajectory.velocity();
        self.trajectory
            .last()
            .map(|(x, y)| (x + vx * seconds_ahead, y + vy * seconds_ahead))
    }

    pub fn reset(&mut self) {
        self.detections.clear();
        self.trajectory.clear();
        self.last_brightness = None;
        self.lighting = LightingContext::Unknown;
    }

    fn record_detection(&mut self, detected: bool) {
        self.detections.push_back(detected);
        while self.detections.len() > self.persistence_window {
            self.detections.pop_front();
        }
    }

    fn persistence(&self) -> f64 {
        let hits = self.detections.iter().filter(|&&d| d).count();
        (hits as f64 / self.persistence_window as f64).min(1.0)
    }

    fn adjust_confidence(&self, base: f64, persistence: f64, brightness: f64) -> f64 {
        let mut adjusted = base.clamp(0.0, 1.0);
        if persistence > 0.5 {
            adjusted *= 1.0 + persistence * 0.2;
        }
        if brightness < 40.0 {
            adjusted *= 0.7;
        } else if brightness < 80.0 {
            adjusted *= 0.85;
        }
        if let Some(prev) = self.last_brightness {
            if (brightness - prev).abs() > 30.0 {
                adjusted *= 0.9;
            }
        }
        adjusted.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const W: u32 = 640;
    const H: u32 = 480;

    fn features(aspect_ratio: f64, area_ratio: f64, speed: f64, compactness: f64) -> ShapeFeatures {
        ShapeFeatures { aspect_ratio, area_ratio, speed, compactness, oscillating: false }
    }

    fn observation(x: f64, y: f64, area_ratio: f64, aspect: f64, compact: f64, conf: f64, at: Instant) -> MotionObservation {
        let area = (area_ratio * (W * H) as f64) as u32;
        MotionObservation {
            detected: true,
            area_pixels: area,
            centroid: (x, y),
            bbox: BoundingBox { x: x as u32, y: y as u32, width: 40, height: 60 },
            confidence: conf,
            aspect_ratio: aspect,
            compactness: compact,
            frame_brightness: 128.0,
            observed_at: at,
        }
    }

    #[test]
    fn rule_order_first_match_wins() {
        // Matches both the near-lens rule and the catch-all; near-lens is first.
        let f = features(1.0, 0.01, 40.0, 0.7);
        assert_eq!(classify(&f), MotionClass::Environmental);

        assert_eq!(classify(&features(0.6, 0.05, 25.0, 0.5)), MotionClass::Person);
        assert_eq!(classify(&features(2.0, 0.10, 70.0, 0.3)), MotionClass::Vehicle);
        assert_eq!(classify(&features(1.0, 0.05, 30.0, 0.3)), MotionClass::Animal);
        assert_eq!(classify(&features(1.0, 0.5, 3.0, 0.3)), MotionClass::Environmental);
        assert_eq!(classify(&features(1.2, 0.2, 120.0, 0.9)), MotionClass::Unknown);
    }

    #[test]
    fn oscillation_flag_forces_environmental() {
        let mut f = features(1.2, 0.2, 120.0, 0.9);
        f.oscillating = true;
        assert_eq!(classify(&f), MotionClass::Environmental);
    }

    #[test]
    fn classification_is_deterministic() {
        let grid = [0.3, 0.6, 1.0, 1.8];
        for &a in &grid {
            for &r in &[0.01, 0.05, 0.2, 0.5] {
                for &s in &[2.0, 20.0, 60.0, 150.0] {
                    for &c in &[0.2, 0.45, 0.8] {
                        let f = features(a, r, s, c);
                        let first = classify(&f);
                        for _ in 0..3 {
                            assert_eq!(classify(&f), first);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn threat_scores_and_clamps() {
        let day = threat_level(MotionClass::Animal, 0.0, 0.0, 0.0, LightingContext::Day);
        assert!((day - 0.3).abs() < 1e-9);

        let capped = threat_level(MotionClass::Person, 1000.0, 1.0, 1.0, LightingContext::Night);
        assert_eq!(capped, 1.0);

        let dusk = threat_level(MotionClass::Unknown, 50.0, 0.0, 0.0, LightingContext::Dusk);
        assert!((dusk - 0.5 * 1.15).abs() < 1e-9);
    }

    #[test]
    fn undetected_short_circuits() {
        let mut mi = MotionIntelligence::new(W, H, 10, 15);
        let enriched = mi.analyze(&MotionObservation::none(120.0, Instant::now()), 120.0);
        assert!(!enriched.detected);
        assert_eq!(enriched.classification, None);
        assert_eq!(enriched.threat_level, 0.0);
        assert_eq!(enriched.adjusted_confidence, 0.0);
    }

    #[test]
    fn malformed_observation_is_no_motion() {
        let mut mi = MotionIntelligence::new(W, H, 10, 15);
        let mut obs = observation(10.0, 10.0, 0.05, 0.6, 0.5, 0.9, Instant::now());
        obs.centroid.0 = f64::NAN;
        let enriched = mi.analyze(&obs, 120.0);
        assert!(!enriched.detected);
        assert_eq!(enriched.classification, None);
    }

    #[test]
    fn velocity_from_recent_centroids() {
        let t0 = Instant::now();
        let mut mi = MotionIntelligence::new(W, H, 10, 15);
        let mut last = None;
        for i in 0..4 {
            let at = t0 + Duration::from_millis(100 * i);
            let obs = observation(100.0 + 5.0 * i as f64, 200.0, 0.05, 0.6, 0.5, 0.8, at);
            last = Some(mi.analyze(&obs, 150.0));
        }
        let enriched = last.unwrap();
        assert!((enriched.velocity.0 - 50.0).abs() < 1e-6);
        assert!(enriched.velocity.1.abs() < 1e-9);
        assert!((enriched.speed - 50.0).abs() < 1e-6);

        let (px, _) = mi.predicted_position(1.0).unwrap();
        assert!((px - 165.0).abs() < 1e-6);
    }

    #[test]
    fn persistence_rises_and_decays() {
        let t0 = Instant::now();
        let mut mi = MotionIntelligence::new(W, H, 10, 15);
        let mut p = 0.0;
        for i in 0..5 {
            let at = t0 + Duration::from_millis(100 * i);
            p = mi.analyze(&observation(100.0, 100.0, 0.05, 0.6, 0.5, 0.8, at), 150.0).persistence;
        }
        assert!((p - 0.5).abs() < 1e-9);

        for _ in 0..3 {
            mi.analyze(&MotionObservation::none(150.0, t0), 150.0);
        }
        let after = mi
            .analyze(&observation(100.0, 100.0, 0.05, 0.6, 0.5, 0.8, t0 + Duration::from_secs(2)), 150.0)
            .persistence;
        assert!((after - 0.6).abs() < 1e-9);
    }

    #[test]
    fn oscillating_trajectory_detected() {
        let t0 = Instant::now();
        let mut mi = MotionIntelligence::new(W, H, 10, 15);
        let mut last = None;
        for i in 0..8u64 {
            let x = if i % 2 == 0 { 300.0 } else { 306.0 };
            let at = t0 + Duration::from_millis(100 * i);
            last = Some(mi.analyze(&observation(x, 200.0, 0.2, 1.2, 0.9, 0.8, at), 150.0));
        }
        let enriched = last.unwrap();
        assert!(enriched.oscillating);
        assert_eq!(enriched.classification, Some(MotionClass::Environmental));
    }

    #[test]
    fn confidence_penalties() {
        let t0 = Instant::now();
        let mut mi = MotionIntelligence::new(W, H, 10, 15);
        let dark = mi.analyze(&observation(10.0, 10.0, 0.05, 0.6, 0.5, 0.8, t0), 30.0);
        assert!((dark.adjusted_confidence - 0.8 * 0.7).abs() < 1e-9);

        // Jump of 90 into daylight: no low-light penalty, flicker penalty only.
        let jump = mi.analyze(&observation(12.0, 10.0, 0.05, 0.6, 0.5, 0.8, t0 + Duration::from_millis(100)), 120.0);
        assert!((jump.adjusted_confidence - 0.8 * 0.9).abs() < 1e-9);
    }

    #[test]
    fn lighting_context_tracks_direction() {
        let t0 = Instant::now();
        let mut mi = MotionIntelligence::new(W, H, 10, 15);
        mi.analyze(&MotionObservation::none(60.0, t0), 60.0);
        assert_eq!(mi.lighting(), LightingContext::Dusk);
        mi.analyze(&MotionObservation::none(70.0, t0), 70.0);
        assert_eq!(mi.lighting(), LightingContext::Dawn);
        mi.analyze(&MotionObservation::none(20.0, t0), 20.0);
        assert_eq!(mi.lighting(), LightingContext::Night);
        mi.analyze(&MotionObservation::none(200.0, t0), 200.0);
        assert_eq!(mi.lighting(), LightingContext::Day);
    }

    #[test]
    fn person_at_night_scores_high() {
        let t0 = Instant::now();
        let mut mi = MotionIntelligence::new(W, H, 10, 15);
        let mut last = None;
        for i in 0..10u64 {
            let at = t0 + Duration::from_millis(100 * i);
            let obs = observation(200.0 + 2.5 * i as f64, 240.0, 0.05, 0.6, 0.5, 0.9, at);
            last = Some(mi.analyze(&obs, 30.0));
        }
        let enriched = last.unwrap();
        assert_eq!(enriched.classification, Some(MotionClass::Person));
        assert!((enriched.speed - 25.0).abs() < 1e-6);
        assert!(enriched.threat_level >= 0.9);
        assert!(enriched.adjusted_confidence >= 0.7);
    }

    #[test]
    fn scores_stay_in_unit_range() {
        // Deterministic pseudo-random sweep.
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed % 10_000) as f64 / 10_000.0
        };
        let t0 = Instant::now();
        let mut mi = MotionIntelligence::new(W, H, 10, 15);
        for i in 0..500u64 {
            let at = t0 + Duration::from_millis(33 * i);
            let obs = observation(
                next() * W as f64,
                next() * H as f64,
                next(),
                next() * 4.0,
                next(),
                next() * 1.5,
                at,
            );
            let e = mi.analyze(&obs, next() * 255.0);
            assert!((0.0..=1.0).contains(&e.threat_level), "threat {}", e.threat_level);
            assert!((0.0..=1.0).contains(&e.adjusted_confidence), "conf {}", e.adjusted_confidence);
        }
    }
}
