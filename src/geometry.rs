//! Pan/tilt primitives: validated angles, servo positions and the
//! discretized bucket key that identifies one scene baseline.

use serde::Serialize;

use crate::error::{Result, SentinelError};

pub const ANGLE_MIN: f64 = 0.0;
pub const ANGLE_MAX: f64 = 180.0;
pub const CENTER_ANGLE: f64 = 90.0;

// ─── Angle ───────────────────────────────────────────────────────────────────

/// Servo angle in degrees, always within 0–180°.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct Angle(f64);

impl Angle {
    pub fn new(degrees: f64) -> Result<Self> {
        if !degrees.is_finite() || !(ANGLE_MIN..=ANGLE_MAX).contains(&degrees) {
            return Err(SentinelError::InvalidAngle(degrees));
        }
        Ok(Self(degrees))
    }

    /// Saturating constructor for computed targets (NaN maps to center).
    pub fn clamped(degrees: f64) -> Self {
        if degrees.is_nan() {
            return Self(CENTER_ANGLE);
        }
        Self(degrees.clamp(ANGLE_MIN, ANGLE_MAX))
    }

    pub fn degrees(self) -> f64 {
        self.0
    }

    pub fn difference(self, other: Angle) -> f64 {
        (self.0 - other.0).abs()
    }
}

impl std::fmt::Display for Angle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}°", self.0)
    }
}

// ─── Servo position ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ServoPosition {
    pub pan: Angle,
    pub tilt: Angle,
}

impl ServoPosition {
    pub fn new(pan: f64, tilt: f64) -> Result<Self> {
        Ok(Self {
            pan: Angle::new(pan)?,
            tilt: Angle::new(tilt)?,
        })
    }

    pub fn clamped(pan: f64, tilt: f64) -> Self {
        Self {
            pan: Angle::clamped(pan),
            tilt: Angle::clamped(tilt),
        }
    }

    pub fn centered() -> Self {
        Self::clamped(CENTER_ANGLE, CENTER_ANGLE)
    }

    /// `(pan delta, tilt delta)`, both absolute.
    pub fn difference_from(&self, other: &ServoPosition) -> (f64, f64) {
        (self.pan.difference(other.pan), self.tilt.difference(other.tilt))
    }

    pub fn max_difference_from(&self, other: &ServoPosition) -> f64 {
        let (pan, tilt) = self.difference_from(other);
        pan.max(tilt)
    }
}

impl std::fmt::Display for ServoPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pan={} tilt={}", self.pan, self.tilt)
    }
}

// ─── Bucket key ──────────────────────────────────────────────────────────────

/// Discretized (pan, tilt) cell keying one scene baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BucketKey {
    pub pan: i32,
    pub tilt: i32,
}

impl BucketKey {
    pub fn from_position(position: &ServoPosition, bucket_degrees: f64) -> Self {
        let width = bucket_degrees.max(0.5);
        Self {
            pan: (position.pan.degrees() / width).round() as i32,
            tilt: (position.tilt.degrees() / width).round() as i32,
        }
    }

    /// Human-readable cell center, e.g. `pan~90.0°/tilt~165.0°`.
    pub fn describe(&self, bucket_degrees: f64) -> String {
        let width = bucket_degrees.max(0.5);
        format!(
            "pan~{:.1}°/tilt~{:.1}°",
            self.pan as f64 * width,
            self.tilt as f64 * width
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_rejects_out_of_range() {
        assert!(Angle::new(-0.1).is_err());
        assert!(Angle::new(180.5).is_err());
        assert!(Angle::new(f64::NAN).is_err());
        assert_eq!(Angle::new(180.0).unwrap().degrees(), 180.0);
    }

    #[test]
    fn angle_clamps() {
        assert_eq!(Angle::clamped(200.0).degrees(), 180.0);
        assert_eq!(Angle::clamped(-5.0).degrees(), 0.0);
        assert_eq!(Angle::clamped(f64::NAN).degrees(), 90.0);
    }

    #[test]
    fn position_difference() {
        let a = ServoPosition::new(30.0, 150.0).unwrap();
        let b = ServoPosition::new(90.0, 165.0).unwrap();
        assert_eq!(a.difference_from(&b), (60.0, 15.0));
        assert_eq!(b.max_difference_from(&a), 60.0);
    }

    #[test]
    fn bucket_rounds_to_width() {
        let p = ServoPosition::new(92.4, 163.0).unwrap();
        let key = BucketKey::from_position(&p, 5.0);
        assert_eq!(key, BucketKey { pan: 18, tilt: 33 });
        assert_eq!(key.describe(5.0), "pan~90.0°/tilt~165.0°");
    }

    #[test]
    fn nearby_positions_share_bucket() {
        let a = ServoPosition::new(90.0, 165.0).unwrap();
        let b = ServoPosition::new(91.2, 166.1).unwrap();
        assert_eq!(
            BucketKey::from_position(&a, 5.0),
            BucketKey::from_position(&b, 5.0)
        );
    }
}
