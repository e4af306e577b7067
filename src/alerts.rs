//! Alert Prioritizer & Queue
//!
//! Motion and scene events are mapped to a priority tier, filtered, and
//! pushed into a bounded queue drained by the delivery worker. The producer
//! side never waits: a full queue evicts an already-queued item instead.

use chrono::{DateTime, Utc};
use crossbeam::atomic::AtomicCell;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::frame::Frame;
use crate::geometry::ServoPosition;
use crate::intelligence::{EnrichedMotion, LightingContext, MotionClass};
use crate::scene::ChangeResult;

// ─── Priority ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

/// Why an event did not make it into the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    Environmental,
    LowConfidence,
    LowPriority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    Enqueue(Priority),
    Suppress(Priority, Suppression),
}

/// Priority ladder for motion events, first match wins.
pub fn motion_priority(motion: &EnrichedMotion, min_area_ratio: f64) -> Priority {
    if motion.threat_level >= 0.8 && motion.adjusted_confidence >= 0.7 {
        Priority::Critical
    } else if motion.threat_level >= 0.6 || motion.requires_immediate_attention() {
        Priority::High
    } else if motion.threat_level >= 0.3 && motion.is_significant(min_area_ratio) {
        Priority::Normal
    } else {
        Priority::Low
    }
}

/// Classify, then apply the suppression rules.
pub fn decide_motion(motion: &EnrichedMotion, min_area_ratio: f64, send_low_priority: bool) -> AlertDecision {
    let priority = motion_priority(motion, min_area_ratio);
    if motion.classification == Some(MotionClass::Environmental) {
        return AlertDecision::Suppress(priority, Suppression::Environmental);
    }
    if motion.adjusted_confidence < 0.4 {
        return AlertDecision::Suppress(priority, Suppression::LowConfidence);
    }
    if priority == Priority::Low && !send_low_priority {
        return AlertDecision::Suppress(priority, Suppression::LowPriority);
    }
    AlertDecision::Enqueue(priority)
}

/// Scene changes are always normal priority; the detector's cooldown is
/// the only filter.
pub fn scene_priority(_change: &ChangeResult) -> Priority {
    Priority::Normal
}

// ─── Payload ─────────────────────────────────────────────────────────────────

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Where the camera was and what it saw when the alert was formed.
#[derive(Debug, Clone)]
pub struct AlertContext {
    pub camera_id: String,
    pub timestamp: DateTime<Utc>,
    pub position: ServoPosition,
    pub previous_position: Option<ServoPosition>,
    pub image_base64: Option<String>,
}

/// JSON body posted to the webhook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertPayload {
    pub camera_id: String,
    pub timestamp: String,
    pub date: String,
    pub time: String,
    pub pan_angle: f64,
    pub tilt_angle: f64,
    pub previous_pan_angle: Option<f64>,
    pub previous_tilt_angle: Option<f64>,
    pub pan_change: f64,
    pub tilt_change: f64,
    pub motion_detected: bool,
    pub image_base64: Option<String>,
    pub priority: Priority,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_change_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_change_mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_baseline_age: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_position_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub motion_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motion_classification: Option<MotionClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motion_threat_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motion_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motion_persistence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_brightness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lighting: Option<LightingContext>,
}

impl AlertPayload {
    fn base(ctx: AlertContext, motion_detected: bool, priority: Priority) -> Self {
        let (pan_change, tilt_change) = ctx
            .previous_position
            .map(|prev| ctx.position.difference_from(&prev))
            .unwrap_or((0.0, 0.0));
        Self {
            camera_id: ctx.camera_id,
            timestamp: ctx.timestamp.to_rfc3339(),
            date: ctx.timestamp.format("%Y-%m-%d").to_string(),
            time: ctx.timestamp.format("%H:%M:%S").to_string(),
            pan_angle: round_to(ctx.position.pan.degrees(), 1),
            tilt_angle: round_to(ctx.position.tilt.degrees(), 1),
            previous_pan_angle: ctx.previous_position.map(|p| round_to(p.pan.degrees(), 1)),
            previous_tilt_angle: ctx.previous_position.map(|p| round_to(p.tilt.degrees(), 1)),
            pan_change: round_to(pan_change, 1),
            tilt_change: round_to(tilt_change, 1),
            motion_detected,
            image_base64: ctx.image_base64,
            priority,
            scene_change_ratio: None,
            scene_change_mean: None,
            scene_baseline_age: None,
            scene_position_key: None,
            motion_confidence: None,
            motion_classification: None,
            motion_threat_level: None,
            motion_speed: None,
            motion_persistence: None,
            frame_brightness: None,
            lighting: None,
        }
    }

    pub fn for_motion(ctx: AlertContext, motion: &EnrichedMotion, priority: Priority) -> Self {
        Self {
            motion_confidence: Some(round_to(motion.adjusted_confidence, 3)),
            motion_classification: motion.classification,
            motion_threat_level: Some(round_to(motion.threat_level, 3)),
            motion_speed: Some(round_to(motion.speed, 2)),
            motion_persistence: Some(round_to(motion.persistence, 3)),
            frame_brightness: Some(round_to(motion.frame_brightness, 1)),
            lighting: Some(motion.lighting),
            ..Self::base(ctx, true, priority)
        }
    }

    pub fn for_scene(ctx: AlertContext, change: &ChangeResult, position_key: String, priority: Priority) -> Self {
        Self {
            scene_change_ratio: Some(round_to(change.change_ratio, 4)),
            scene_change_mean: Some(round_to(change.mean_diff, 4)),
            scene_baseline_age: Some(round_to(change.baseline_age_secs, 1)),
            scene_position_key: Some(position_key),
            ..Self::base(ctx, false, priority)
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertItem {
    pub priority: Priority,
    pub payload: AlertPayload,
    pub enqueued_at: Instant,
    /// Frame to attach as `image_base64`. Encoded by the delivery worker,
    /// off the control loop.
    pub snapshot: Option<Arc<Frame>>,
}

impl AlertItem {
    /// JPEG-encode the pending snapshot into the payload. An encoding
    /// failure leaves the alert without an image.
    pub fn render_snapshot(&mut self, jpeg_quality: u8) {
        let Some(frame) = self.snapshot.take() else {
            return;
        };
        match frame.to_jpeg_base64(jpeg_quality) {
            Ok(b64) => self.payload.image_base64 = Some(b64),
            Err(e) => warn!("Snapshot encoding failed: {}", e),
        }
    }
}

// ─── Queue ───────────────────────────────────────────────────────────────────

/// Bounded FIFO shared by the control loop (producer) and the delivery
/// worker (consumer). A one-slot doorbell channel wakes the consumer.
pub struct AlertQueue {
    items: Mutex<VecDeque<AlertItem>>,
    capacity: usize,
    doorbell_tx: flume::Sender<()>,
    doorbell_rx: flume::Receiver<()>,
    enqueued: AtomicCell<u64>,
    evicted: AtomicCell<u64>,
}

impl AlertQueue {
    pub fn new(capacity: usize) -> Self {
        let (doorbell_tx, doorbell_rx) = flume::bounded(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            doorbell_tx,
            doorbell_rx,
            enqueued: AtomicCell::new(0),
            evicted: AtomicCell::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AlertItem>> {
        match self.items.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Admit `item`, evicting the oldest non-critical item (or the oldest
    /// item if every queued alert is critical) when full. Returns the
    /// evicted item. Never blocks on the consumer.
    pub fn enqueue(&self, item: AlertItem) -> Option<AlertItem> {
        let priority = item.priority;
        let (evicted, len) = {
            let mut items = self.lock();
            let evicted = if items.len() >= self.capacity {
                let victim = items
                    .iter()
                    .position(|queued| queued.priority != Priority::Critical)
                    .unwrap_or(0);
                items.remove(victim)
            } else {
                None
            };
            items.push_back(item);
            (evicted, items.len())
        };

        self.enqueued.fetch_add(1);
        if let Some(dropped) = &evicted {
            self.evicted.fetch_add(1);
            warn!(
                "Alert queue full: dropped queued {} alert to admit {}",
                dropped.priority.as_str(),
                priority.as_str()
            );
        } else if len as f64 >= self.capacity as f64 * 0.8 {
            warn!("Alert queue filling up: {}/{}", len, self.capacity);
        }
        debug!("Alert queued ({}), depth {}", priority.as_str(), len);

        // Full doorbell means the worker is already due to wake.
        let _ = self.doorbell_tx.try_send(());
        evicted
    }

    pub fn pop(&self) -> Option<AlertItem> {
        self.lock().pop_front()
    }

    /// Block the calling (worker) thread until something is queued or the
    /// timeout elapses. Returns whether the queue is non-empty.
    pub fn wait(&self, timeout: Duration) -> bool {
        if !self.is_empty() {
            return true;
        }
        let _ = self.doorbell_rx.recv_timeout(timeout);
        !self.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn enqueued_total(&self) -> u64 {
        self.enqueued.load()
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted.load()
    }

    /// Drop everything still queued (used on shutdown).
    pub fn clear(&self) -> usize {
        let mut items = self.lock();
        let n = items.len();
        items.clear();
        n
    }
}
