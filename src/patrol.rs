//! Patrol Scheduler: sweeps a pan×tilt grid, dwelling at each cell.
//!
//! The scheduler never looks at motion. It is advanced once per tick with
//! the servo's settled flag and answers with at most one move command.

use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::PatrolConfig;
use crate::geometry::ServoPosition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatrolPhase {
    Idle,
    Moving { since: Instant },
    Dwelling { since: Instant },
}

impl PatrolPhase {
    pub fn name(&self) -> &'static str {
        match self {
            PatrolPhase::Idle => "idle",
            PatrolPhase::Moving { .. } => "moving",
            PatrolPhase::Dwelling { .. } => "dwelling",
        }
    }
}

/// Inclusive `min..=max` stepped by `step`, tolerant to float accumulation.
fn stepped(min: f64, max: f64, step: f64) -> Vec<f64> {
    if step <= 0.0 || min > max {
        return vec![min];
    }
    let count = ((max - min) / step + 1e-9).floor() as usize + 1;
    (0..count).map(|i| min + i as f64 * step).collect()
}

/// Grid in tilt-major, pan-minor order.
pub fn generate_positions(cfg: &PatrolConfig) -> Vec<ServoPosition> {
    let pans = stepped(cfg.pan_min, cfg.pan_max, cfg.pan_step);
    let tilts = stepped(cfg.tilt_min, cfg.tilt_max, cfg.tilt_step);
    tilts
        .iter()
        .flat_map(|&tilt| pans.iter().map(move |&pan| ServoPosition::clamped(pan, tilt)))
        .collect()
}

pub struct PatrolScheduler {
    positions: Vec<ServoPosition>,
    current_index: usize,
    phase: PatrolPhase,
    enabled: bool,
    dwell: Duration,
    move_timeout: Duration,
}

impl PatrolScheduler {
    pub fn new(cfg: &PatrolConfig) -> Self {
        Self {
            positions: generate_positions(cfg),
            current_index: 0,
            phase: PatrolPhase::Idle,
            enabled: false,
            dwell: Duration::from_secs_f64(cfg.dwell_secs),
            move_timeout: Duration::from_secs_f64(cfg.move_timeout_secs),
        }
    }

    /// Pick up new timings; a changed grid restarts the sweep from its first cell.
    pub fn reconfigure(&mut self, cfg: &PatrolConfig) {
        self.dwell = Duration::from_secs_f64(cfg.dwell_secs);
        self.move_timeout = Duration::from_secs_f64(cfg.move_timeout_secs);
        let positions = generate_positions(cfg);
        if positions != self.positions {
            info!("Patrol grid changed: {} positions", positions.len());
            self.positions = positions;
            self.current_index = 0;
            if self.enabled {
                self.phase = PatrolPhase::Idle;
            }
        }
    }

    /// Enable patrol; the first move is issued by the next `advance`.
    pub fn start(&mut self) {
        if self.positions.is_empty() {
            return;
        }
        if !self.enabled {
            info!(
                "Patrol started at index {}/{}",
                self.current_index,
                self.positions.len()
            );
        }
        self.enabled = true;
    }

    /// Disable patrol. Idempotent; an outstanding move is not recalled.
    pub fn cancel(&mut self) {
        if self.enabled {
            info!("Patrol stopped");
        }
        self.enabled = false;
        self.phase = PatrolPhase::Idle;
    }

    /// Step the state machine. Returns the move command to issue, if any.
    pub fn advance(&mut self, now: Instant, servo_settled: bool) -> Option<ServoPosition> {
        if !self.enabled || self.positions.is_empty() {
            self.phase = PatrolPhase::Idle;
            return None;
        }

        match self.phase {
            PatrolPhase::Idle => self.move_to_current(now),
            PatrolPhase::Moving { since } => {
                let timed_out = now.saturating_duration_since(since) >= self.move_timeout;
                if servo_settled || timed_out {
                    if timed_out && !servo_settled {
                        debug!("Settle wait timed out at index {}", self.current_index);
                    }
                    self.phase = PatrolPhase::Dwelling { since: now };
                }
                None
            }
            PatrolPhase::Dwelling { since } => {
                if now.saturating_duration_since(since) >= self.dwell {
                    self.current_index = (self.current_index + 1) % self.positions.len();
                    self.move_to_current(now)
                } else {
                    None
                }
            }
        }
    }

    fn move_to_current(&mut self, now: Instant) -> Option<ServoPosition> {
        let target = self.positions[self.current_index];
        debug!(
            "Patrol → {} ({}/{})",
            target,
            self.current_index + 1,
            self.positions.len()
        );
        self.phase = PatrolPhase::Moving { since: now };
        Some(target)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_dwelling(&self) -> bool {
        matches!(self.phase, PatrolPhase::Dwelling { .. })
    }

    pub fn phase(&self) -> PatrolPhase {
        self.phase
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_target(&self) -> Option<ServoPosition> {
        self.positions.get(self.current_index).copied()
    }

    pub fn positions(&self) -> &[ServoPosition] {
        &self.positions
    }
}
