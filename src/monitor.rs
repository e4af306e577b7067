//! Monitoring Orchestrator: the per-frame control loop.
//!
//! One `tick` per frame period, always in this order:
//!   1. servo poll + settle gate
//!   2. motion detection → intelligence → priority decision
//!   3. scene comparison for the current bucket (dwelling / stationary only)
//!   4. patrol advancement (at most one move command)
//!   5. alert dispatch into the bounded queue
//!
//! The orchestrator is the single owner of the detector, the trajectory
//! history, the baselines and the patrol state. Everything the outside
//! world sees goes through `MonitorShared` (atomics) or `StatusSnapshot`.

use chrono::{DateTime, Utc};
use crossbeam::atomic::AtomicCell;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::alerts::{
    decide_motion, scene_priority, AlertContext, AlertDecision, AlertItem, AlertPayload, AlertQueue, Priority,
    Suppression,
};
use crate::config::{AppConfig, SharedConfig};
use crate::frame::Frame;
use crate::geometry::ServoPosition;
use crate::hardware::ServoMover;
use crate::intelligence::{EnrichedMotion, MotionIntelligence};
use crate::motion::MotionDetector;
use crate::patrol::PatrolScheduler;
use crate::scene::{ChangeResult, SceneChangeDetector, SceneSettings};
use crate::webhook::DeliveryStats;

// ─── Commands & shared state ─────────────────────────────────────────────────

/// Imperative entry points from the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MonitorCommand {
    StartMonitoring,
    StopMonitoring,
    StartPatrol,
    StopPatrol,
    MoveManual(ServoPosition),
    Center,
}

/// Lock-free flags and counters readable from any thread.
#[derive(Debug, Default)]
pub struct MonitorShared {
    pub monitoring: AtomicCell<bool>,
    pub patrol_enabled: AtomicCell<bool>,
    pub camera_degraded: AtomicCell<bool>,
    pub servo_degraded: AtomicCell<bool>,
    pub frames_processed: AtomicCell<u64>,
    pub motions_detected: AtomicCell<u64>,
    pub scene_changes: AtomicCell<u64>,
    pub alerts_queued: AtomicCell<u64>,
    pub alerts_suppressed: AtomicCell<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub frames_processed: u64,
    pub motions_detected: u64,
    pub scene_changes: u64,
    pub alerts_queued: u64,
    pub alerts_suppressed: u64,
    pub alerts_dropped: u64,
    pub alerts_sent: u64,
    pub delivery_failures: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub monitoring: bool,
    pub patrol_enabled: bool,
    pub patrol_phase: &'static str,
    pub patrol_index: usize,
    pub patrol_positions: usize,
    pub position: ServoPosition,
    pub servo_settled: bool,
    pub settling: bool,
    pub camera_degraded: bool,
    pub servo_degraded: bool,
    pub delivery_degraded: bool,
    pub last_motion: Option<EnrichedMotion>,
    pub predicted_centroid: Option<(f64, f64)>,
    pub last_scene: Option<ChangeResult>,
    pub baselines: usize,
    pub queue_len: usize,
    pub stats: SessionStats,
    pub session_started_at: Option<DateTime<Utc>>,
    pub session_secs: f64,
}

/// What one tick did. Mostly for tests and debug logging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Monitoring was off; only the servo was polled.
    pub idle: bool,
    /// The settle gate was closed, motion and scene were skipped.
    pub settling: bool,
    pub motion: Option<EnrichedMotion>,
    pub scene: Option<ChangeResult>,
    pub move_command: Option<ServoPosition>,
    pub queued: Vec<Priority>,
    pub suppressed: Vec<Suppression>,
    /// Already-queued alerts evicted to make room this tick.
    pub dropped: Vec<Priority>,
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

pub struct Monitor {
    config: Arc<SharedConfig>,
    cfg: Arc<AppConfig>,
    detector: Box<dyn MotionDetector>,
    intelligence: MotionIntelligence,
    scene: SceneChangeDetector,
    patrol: PatrolScheduler,
    servo: Box<dyn ServoMover>,
    queue: Arc<AlertQueue>,
    delivery: Arc<DeliveryStats>,
    shared: Arc<MonitorShared>,

    active: bool,
    position: ServoPosition,
    previous_position: Option<ServoPosition>,
    servo_settled: bool,
    last_move_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    last_motion: Option<EnrichedMotion>,
    last_scene: Option<ChangeResult>,
    session: Option<(Instant, DateTime<Utc>)>,
}

impl Monitor {
    pub fn new(
        config: Arc<SharedConfig>,
        detector: Box<dyn MotionDetector>,
        servo: Box<dyn ServoMover>,
        queue: Arc<AlertQueue>,
        delivery: Arc<DeliveryStats>,
    ) -> Self {
        let cfg = config.snapshot();
        let m = &cfg.motion;
        Self {
            intelligence: MotionIntelligence::new(cfg.camera.width, cfg.camera.height, m.persistence_window, m.trajectory_len),
            scene: SceneChangeDetector::new(SceneSettings::from(&cfg.scene)),
            patrol: PatrolScheduler::new(&cfg.patrol),
            detector,
            servo,
            queue,
            delivery,
            shared: Arc::new(MonitorShared::default()),
            active: false,
            position: ServoPosition::centered(),
            previous_position: None,
            servo_settled: true,
            last_move_at: None,
            last_frame_at: None,
            last_motion: None,
            last_scene: None,
            session: None,
            config,
            cfg,
        }
    }

    pub fn shared(&self) -> Arc<MonitorShared> {
        Arc::clone(&self.shared)
    }

    pub fn position(&self) -> ServoPosition {
        self.position
    }

    pub fn patrol(&self) -> &PatrolScheduler {
        &self.patrol
    }

    pub fn scene(&self) -> &SceneChangeDetector {
        &self.scene
    }

    /// Center the rig before the first tick.
    pub fn initialize(&mut self, now: Instant) {
        self.poll_servo(now);
        self.issue_move(ServoPosition::centered(), self.cfg.servo.manual_speed_dps, now);
        info!("Servos centered");
    }

    // ─── Modes ───────────────────────────────────────────────────────────────

    pub fn handle(&mut self, command: MonitorCommand, now: Instant) {
        debug!("Command: {:?}", command);
        match command {
            MonitorCommand::StartMonitoring => self.start_monitoring(now),
            MonitorCommand::StopMonitoring => self.stop_monitoring(),
            MonitorCommand::StartPatrol => self.start_patrol(),
            MonitorCommand::StopPatrol => self.stop_patrol(),
            MonitorCommand::MoveManual(target) => self.move_manual(target, now),
            MonitorCommand::Center => self.move_manual(ServoPosition::centered(), now),
        }
    }

    /// Idempotent. A fresh session starts with no baselines and no history.
    pub fn start_monitoring(&mut self, now: Instant) {
        self.shared.monitoring.store(true);
        if self.active {
            return;
        }
        self.active = true;
        self.scene.reset();
        self.intelligence.reset();
        self.detector.reset();
        self.last_motion = None;
        self.last_scene = None;
        self.session = Some((now, Utc::now()));
        if self.cfg.patrol.enabled {
            self.start_patrol();
        }
        info!("Monitoring started");
    }

    /// Idempotent. Halts motion evaluation and patrol; an outstanding move
    /// is left to finish on its own.
    pub fn stop_monitoring(&mut self) {
        self.shared.monitoring.store(false);
        self.patrol.cancel();
        self.shared.patrol_enabled.store(false);
        if !self.active {
            return;
        }
        self.active = false;
        if let Some((started, _)) = self.session {
            info!("Monitoring stopped after {:.0}s", started.elapsed().as_secs_f64());
        } else {
            info!("Monitoring stopped");
        }
    }

    pub fn start_patrol(&mut self) {
        self.patrol.start();
        self.shared.patrol_enabled.store(self.patrol.is_enabled());
    }

    pub fn stop_patrol(&mut self) {
        self.patrol.cancel();
        self.shared.patrol_enabled.store(false);
    }

    /// Manual override: cancels patrol until it is explicitly restarted.
    pub fn move_manual(&mut self, target: ServoPosition, now: Instant) {
        if self.patrol.is_enabled() {
            info!("Manual move to {}: patrol cancelled", target);
        }
        self.stop_patrol();
        self.issue_move(target, self.cfg.servo.manual_speed_dps, now);
    }

    /// Stop everything and park the rig at center.
    pub fn shutdown(&mut self, now: Instant) {
        self.stop_monitoring();
        self.issue_move(ServoPosition::centered(), self.cfg.servo.manual_speed_dps, now);
    }

    // ─── Tick ────────────────────────────────────────────────────────────────

    /// One frame period. Never panics and never fails; component errors
    /// end the tick early and leave the last-known state in place.
    pub fn tick(&mut self, frame: Option<&Frame>, now: Instant) -> TickReport {
        self.refresh_config();
        self.poll_servo(now);

        let mut report = TickReport::default();
        if !self.monitoring_active() {
            report.idle = true;
            return report;
        }

        let settling = self.is_settling(now);
        report.settling = settling;

        let fresh = frame.filter(|f| self.last_frame_at.map_or(true, |t| f.captured_at > t));
        let mut pending: Vec<AlertItem> = Vec::new();

        if let Some(frame) = fresh {
            self.last_frame_at = Some(frame.captured_at);
            self.shared.frames_processed.fetch_add(1);

            if !settling {
                // Motion.
                match self.evaluate_motion(frame, now, &mut report) {
                    Ok(Some(item)) => pending.push(item),
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Motion evaluation failed: {}", e);
                        return report;
                    }
                }

                // Scene.
                if self.scene_due() {
                    if let Some(item) = self.evaluate_scene(frame, now, &mut report) {
                        pending.push(item);
                    }
                }
            }
        }

        // Patrol.
        if !self.monitoring_active() {
            return report;
        }
        if let Some(target) = self.patrol.advance(now, self.servo_settled) {
            if self.issue_move(target, self.cfg.patrol.speed_dps, now) {
                report.move_command = Some(target);
            }
        }

        // Dispatch.
        if !self.monitoring_active() {
            return report;
        }
        for item in pending {
            let priority = item.priority;
            report.queued.push(priority);
            if let Some(evicted) = self.queue.enqueue(item) {
                debug!(
                    "{} alert displaced by {} ({:.1}s in queue)",
                    evicted.priority.as_str(),
                    priority.as_str(),
                    now.saturating_duration_since(evicted.enqueued_at).as_secs_f64()
                );
                report.dropped.push(evicted.priority);
            }
            self.shared.alerts_queued.fetch_add(1);
        }
        report
    }

    fn monitoring_active(&mut self) -> bool {
        if self.active && !self.shared.monitoring.load() {
            // Stop requested from outside since the last command drain.
            self.stop_monitoring();
        }
        self.active
    }

    /// Closed while the servo is still travelling or within the settle
    /// window after the last move command.
    pub fn is_settling(&self, now: Instant) -> bool {
        let window = Duration::from_secs_f64(self.cfg.servo.settle_secs);
        let recent_move = self
            .last_move_at
            .map_or(false, |t| now.saturating_duration_since(t) < window);
        !self.servo_settled || recent_move
    }

    fn scene_due(&self) -> bool {
        if !self.cfg.scene.enabled {
            return false;
        }
        if self.patrol.is_enabled() {
            self.patrol.is_dwelling()
        } else {
            self.servo_settled
        }
    }

    fn evaluate_motion(
        &mut self,
        frame: &Frame,
        now: Instant,
        report: &mut TickReport,
    ) -> crate::error::Result<Option<AlertItem>> {
        let observation = self.detector.detect(frame)?;
        self.intelligence.set_frame_size(frame.width(), frame.height());
        let enriched = self.intelligence.analyze(&observation, frame.brightness);
        report.motion = Some(enriched.clone());
        self.last_motion = Some(enriched.clone());

        if !enriched.detected {
            return Ok(None);
        }
        self.shared.motions_detected.fetch_add(1);

        let cfg = Arc::clone(&self.cfg);
        match decide_motion(&enriched, cfg.motion.min_area_ratio, cfg.alerts.send_low_priority) {
            AlertDecision::Suppress(priority, reason) => {
                debug!(
                    "Motion suppressed ({:?}, would be {}): {:?} threat {:.2}",
                    reason,
                    priority.as_str(),
                    enriched.classification,
                    enriched.threat_level
                );
                self.shared.alerts_suppressed.fetch_add(1);
                report.suppressed.push(reason);
                Ok(None)
            }
            AlertDecision::Enqueue(priority) => {
                info!(
                    "Motion alert [{}]: {} threat {:.2} conf {:.2} speed {:.1}px/s",
                    priority.as_str(),
                    enriched.classification.map_or("unknown", |c| c.as_str()),
                    enriched.threat_level,
                    enriched.adjusted_confidence,
                    enriched.speed
                );
                let ctx = self.alert_context(frame);
                Ok(Some(AlertItem {
                    priority,
                    payload: AlertPayload::for_motion(ctx, &enriched, priority),
                    enqueued_at: now,
                    snapshot: self.snapshot_of(frame),
                }))
            }
        }
    }

    fn evaluate_scene(&mut self, frame: &Frame, now: Instant, report: &mut TickReport) -> Option<AlertItem> {
        let bucket = self.scene.bucket_for(&self.position);
        let result = self.scene.evaluate(bucket, frame, frame.brightness, now);
        report.scene = Some(result.clone());
        self.last_scene = Some(result.clone());

        if result.is_structural {
            self.shared.scene_changes.fetch_add(1);
        }
        if !result.alert_worthy {
            return None;
        }

        let key = self.scene.describe_bucket(&bucket);
        info!(
            "Scene change at {}: {:.1}% changed, mean diff {:.3}",
            key,
            result.change_ratio * 100.0,
            result.mean_diff
        );
        let priority = scene_priority(&result);
        let payload = AlertPayload::for_scene(self.alert_context(frame), &result, key, priority);
        self.scene.commit_change(bucket, now);
        Some(AlertItem {
            priority,
            payload,
            enqueued_at: now,
            snapshot: self.snapshot_of(frame),
        })
    }

    fn alert_context(&self, frame: &Frame) -> AlertContext {
        AlertContext {
            camera_id: self.cfg.camera.camera_id.clone(),
            timestamp: frame.timestamp,
            position: self.position,
            previous_position: self.previous_position,
            image_base64: None,
        }
    }

    /// The JPEG encode happens in the delivery worker; the tick only pays
    /// for a buffer copy.
    fn snapshot_of(&self, frame: &Frame) -> Option<Arc<Frame>> {
        self.cfg.alerts.include_snapshot.then(|| Arc::new(frame.clone()))
    }

    // ─── Servo ───────────────────────────────────────────────────────────────

    fn poll_servo(&mut self, now: Instant) {
        match self.servo.poll(now) {
            Ok(status) => {
                self.position = status.position;
                self.servo_settled = status.settled;
                self.shared.servo_degraded.store(false);
            }
            Err(e) => {
                if !self.shared.servo_degraded.swap(true) {
                    warn!("Servo poll failed, keeping last position {}: {}", self.position, e);
                }
                self.servo_settled = false;
            }
        }
    }

    /// Returns whether the command was accepted by the mover.
    fn issue_move(&mut self, target: ServoPosition, speed_dps: f64, now: Instant) -> bool {
        match self.servo.move_to(target, speed_dps, now) {
            Ok(()) => {
                self.previous_position = Some(self.position);
                self.last_move_at = Some(now);
                self.servo_settled = false;
                // Background and trajectory belong to the old viewpoint.
                self.detector.reset();
                self.intelligence.reset();
                true
            }
            Err(e) => {
                warn!("Move to {} failed: {}", target, e);
                self.shared.servo_degraded.store(true);
                false
            }
        }
    }

    // ─── Config & status ─────────────────────────────────────────────────────

    fn refresh_config(&mut self) {
        let next = self.config.snapshot();
        if Arc::ptr_eq(&next, &self.cfg) {
            return;
        }
        self.scene.reconfigure(SceneSettings::from(&next.scene));
        self.patrol.reconfigure(&next.patrol);
        self.detector.set_min_area_ratio(next.motion.min_area_ratio);
        if next.patrol.enabled != self.cfg.patrol.enabled {
            if next.patrol.enabled && self.active {
                self.start_patrol();
            } else if !next.patrol.enabled {
                self.stop_patrol();
            }
        }
        debug!("Control loop picked up new configuration");
        self.cfg = next;
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_processed: self.shared.frames_processed.load(),
            motions_detected: self.shared.motions_detected.load(),
            scene_changes: self.shared.scene_changes.load(),
            alerts_queued: self.shared.alerts_queued.load(),
            alerts_suppressed: self.shared.alerts_suppressed.load(),
            alerts_dropped: self.queue.evicted_total(),
            alerts_sent: self.delivery.sent.load(),
            delivery_failures: self.delivery.failed.load(),
        }
    }

    pub fn status(&self, now: Instant) -> StatusSnapshot {
        StatusSnapshot {
            monitoring: self.active,
            patrol_enabled: self.patrol.is_enabled(),
            patrol_phase: self.patrol.phase().name(),
            patrol_index: self.patrol.current_index(),
            patrol_positions: self.patrol.positions().len(),
            position: self.position,
            servo_settled: self.servo_settled,
            settling: self.is_settling(now),
            camera_degraded: self.shared.camera_degraded.load(),
            servo_degraded: self.shared.servo_degraded.load(),
            delivery_degraded: self.delivery.degraded.load(),
            last_motion: self.last_motion.clone(),
            predicted_centroid: self.intelligence.predicted_position(1.0),
            last_scene: self.last_scene.clone(),
            baselines: self.scene.baseline_count(),
            queue_len: self.queue.len(),
            stats: self.stats(),
            session_started_at: self.session.map(|(_, wall)| wall),
            session_secs: self
                .session
                .filter(|_| self.active)
                .map_or(0.0, |(started, _)| now.saturating_duration_since(started).as_secs_f64()),
        }
    }
}
