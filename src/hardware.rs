//! Hardware seams: camera frames in, servo moves out.
//!
//! Drivers for real sensors and PWM controllers live outside this crate and
//! plug in through `FrameSource` / `ServoMover`. The simulated pair below is
//! what the binary runs against and what the integration tests drive.

use std::time::Instant;
use tracing::debug;

use crate::error::{Result, SentinelError};
use crate::frame::{paint_rect, textured_scene, Frame};
use crate::geometry::ServoPosition;

/// Produces frames on the capture thread.
pub trait FrameSource: Send {
    /// Blocking read of the next frame.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Re-open the device after a failed read.
    fn reconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoStatus {
    pub position: ServoPosition,
    pub settled: bool,
}

/// Moves the pan/tilt rig. Commands are fire-and-forget; the control loop
/// polls for the settled state on later ticks.
pub trait ServoMover: Send {
    fn move_to(&mut self, target: ServoPosition, speed_dps: f64, now: Instant) -> Result<()>;

    fn poll(&mut self, now: Instant) -> Result<ServoStatus>;
}

// ─── Simulated servo ─────────────────────────────────────────────────────────

/// Speed-limited mover: each poll advances both axes toward the target by
/// at most `speed × elapsed`, snapping once inside the dead-band.
pub struct SimulatedServo {
    position: ServoPosition,
    target: ServoPosition,
    speed_dps: f64,
    deadband: f64,
    last_poll: Option<Instant>,
}

impl SimulatedServo {
    pub fn new(start: ServoPosition, deadband: f64) -> Self {
        Self {
            position: start,
            target: start,
            speed_dps: 90.0,
            deadband: deadband.max(0.0),
            last_poll: None,
        }
    }

    fn step_axis(current: f64, target: f64, max_step: f64, deadband: f64) -> f64 {
        let delta = target - current;
        if delta.abs() <= deadband.max(f64::EPSILON) || delta.abs() <= max_step {
            target
        } else {
            current + max_step * delta.signum()
        }
    }
}

impl ServoMover for SimulatedServo {
    fn move_to(&mut self, target: ServoPosition, speed_dps: f64, now: Instant) -> Result<()> {
        if !(speed_dps.is_finite() && speed_dps > 0.0) {
            return Err(SentinelError::servo(format!("invalid speed {speed_dps}")));
        }
        // Bring the position up to date before retargeting.
        self.poll(now)?;
        debug!("Servo {} → {} at {:.0}°/s", self.position, target, speed_dps);
        self.target = target;
        self.speed_dps = speed_dps;
        Ok(())
    }

    fn poll(&mut self, now: Instant) -> Result<ServoStatus> {
        let elapsed = self
            .last_poll
            .map(|t| now.saturating_duration_since(t).as_secs_f64())
            .unwrap_or(0.0);
        self.last_poll = Some(now);

        let max_step = self.speed_dps * elapsed;
        let pan = Self::step_axis(self.position.pan.degrees(), self.target.pan.degrees(), max_step, self.deadband);
        let tilt = Self::step_axis(self.position.tilt.degrees(), self.target.tilt.degrees(), max_step, self.deadband);
        self.position = ServoPosition::clamped(pan, tilt);

        Ok(ServoStatus {
            position: self.position,
            settled: self.position == self.target,
        })
    }
}

// ─── Synthetic camera ────────────────────────────────────────────────────────

/// A bright block sweeping horizontally across the frame.
#[derive(Debug, Clone, Copy)]
pub struct Intruder {
    pub width: u32,
    pub height: u32,
    /// Pixels per frame.
    pub speed: u32,
    pub intensity: u8,
}

/// Renders the textured test scene with optional lighting drift and an
/// optional moving intruder.
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    frame_idx: u64,
    gain: f64,
    drift_per_frame: f64,
    intruder: Option<Intruder>,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_idx: 0,
            gain: 1.0,
            drift_per_frame: 0.0,
            intruder: None,
        }
    }

    /// Multiplicative illumination change added every frame.
    pub fn with_drift(mut self, per_frame: f64) -> Self {
        self.drift_per_frame = per_frame;
        self
    }

    pub fn with_intruder(mut self, intruder: Intruder) -> Self {
        self.intruder = Some(intruder);
        self
    }

    pub fn render(&mut self, captured_at: Instant) -> Frame {
        let gain = (self.gain + self.drift_per_frame * self.frame_idx as f64).clamp(0.1, 2.5);
        let mut image = textured_scene(self.width, self.height, gain);
        if let Some(intruder) = self.intruder {
            let travel = self.width.saturating_sub(intruder.width).max(1) as u64;
            let x = ((self.frame_idx * intruder.speed as u64) % travel) as u32;
            paint_rect(&mut image, x, self.height / 3, intruder.width, intruder.height, intruder.intensity);
        }
        self.frame_idx += 1;
        Frame::new(image, captured_at)
    }
}

impl FrameSource for SyntheticCamera {
    fn next_frame(&mut self) -> Result<Frame> {
        Ok(self.render(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn servo_is_speed_limited() {
        let t0 = Instant::now();
        let mut servo = SimulatedServo::new(ServoPosition::clamped(30.0, 150.0), 2.0);
        servo.move_to(ServoPosition::clamped(120.0, 150.0), 45.0, t0).unwrap();

        let status = servo.poll(t0 + Duration::from_secs(1)).unwrap();
        assert!(!status.settled);
        assert!((status.position.pan.degrees() - 75.0).abs() < 1e-9);

        let status = servo.poll(t0 + Duration::from_secs(2)).unwrap();
        assert!(status.settled);
        assert_eq!(status.position, ServoPosition::clamped(120.0, 150.0));
    }

    #[test]
    fn deadband_snaps_to_target() {
        let t0 = Instant::now();
        let mut servo = SimulatedServo::new(ServoPosition::clamped(90.0, 90.0), 2.0);
        servo.move_to(ServoPosition::clamped(91.5, 90.0), 45.0, t0).unwrap();
        assert!(servo.poll(t0 + Duration::from_millis(1)).unwrap().settled);
    }

    #[test]
    fn rejects_bad_speed() {
        let mut servo = SimulatedServo::new(ServoPosition::centered(), 2.0);
        assert!(servo.move_to(ServoPosition::centered(), 0.0, Instant::now()).is_err());
    }

    #[test]
    fn intruder_moves_between_frames() {
        let mut cam = SyntheticCamera::new(64, 48).with_intruder(Intruder {
            width: 8,
            height: 16,
            speed: 4,
            intensity: 250,
        });
        let t0 = Instant::now();
        let a = cam.render(t0);
        let b = cam.render(t0);
        assert_ne!(a.pixels(), b.pixels());
    }

    #[test]
    fn drift_brightens_scene() {
        let mut cam = SyntheticCamera::new(64, 48).with_drift(0.05);
        let t0 = Instant::now();
        let first = cam.render(t0).brightness;
        let second = cam.render(t0).brightness;
        assert!(second > first);
    }
}
