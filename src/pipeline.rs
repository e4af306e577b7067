/// Monitoring Pipeline: runtime wiring
///
/// Architecture:
///   capture (blocking thread)
///     → [watch slot, newest frame only] → control loop (tokio interval, 1/fps)
///       → Monitor::tick → [AlertQueue, bounded] → delivery worker (blocking thread)
///                                                  → webhook sink
///   MonitorHandle → [flume channel] → control loop (commands)
///   control loop → [watch] → StatusSnapshot for the presentation layer
///
/// All component state lives inside the control-loop task.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::alerts::AlertQueue;
use crate::config::{AppConfig, ConfigPatch, SharedConfig};
use crate::error::{Result, SentinelError};
use crate::frame::Frame;
use crate::geometry::ServoPosition;
use crate::hardware::{FrameSource, ServoMover};
use crate::monitor::{Monitor, MonitorCommand, MonitorShared, StatusSnapshot};
use crate::motion::MotionDetector;
use crate::webhook::{run_delivery_worker, AlertSink, DeliveryStats, LogSink, WebhookSink};

const COMMAND_BUFFER: usize = 64;
const MAX_CAPTURE_BACKOFF: Duration = Duration::from_secs(5);

type FrameSlot = Option<Arc<Frame>>;

// ─── Handle for the presentation layer ───────────────────────────────────────

#[derive(Clone)]
pub struct MonitorHandle {
    commands: flume::Sender<MonitorCommand>,
    shared: Arc<MonitorShared>,
    status: watch::Receiver<StatusSnapshot>,
    config: Arc<SharedConfig>,
}

impl MonitorHandle {
    fn send(&self, command: MonitorCommand) -> Result<()> {
        self.commands.try_send(command).map_err(|e| match e {
            flume::TrySendError::Full(_) => SentinelError::ControlLoop("command queue full".into()),
            flume::TrySendError::Disconnected(_) => SentinelError::ControlLoop("stopped".into()),
        })
    }

    pub fn start_monitoring(&self) -> Result<()> {
        self.send(MonitorCommand::StartMonitoring)
    }

    /// Takes effect at the next stage boundary of the in-flight tick.
    pub fn stop_monitoring(&self) -> Result<()> {
        self.shared.monitoring.store(false);
        self.send(MonitorCommand::StopMonitoring)
    }

    pub fn start_patrol(&self) -> Result<()> {
        self.send(MonitorCommand::StartPatrol)
    }

    pub fn stop_patrol(&self) -> Result<()> {
        self.send(MonitorCommand::StopPatrol)
    }

    pub fn move_manual(&self, pan: f64, tilt: f64) -> Result<()> {
        let target = ServoPosition::new(pan, tilt)?;
        self.send(MonitorCommand::MoveManual(target))
    }

    pub fn center(&self) -> Result<()> {
        self.send(MonitorCommand::Center)
    }

    pub fn is_monitoring(&self) -> bool {
        self.shared.monitoring.load()
    }

    pub fn is_patrolling(&self) -> bool {
        self.shared.patrol_enabled.load()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    pub fn status_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&*self.status.borrow())?)
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    pub fn config(&self) -> Arc<AppConfig> {
        self.config.snapshot()
    }

    pub fn apply_config(&self, patch: &ConfigPatch) -> Result<Arc<AppConfig>> {
        self.config.apply(patch)
    }
}

/// A running pipeline that can be stopped via the stop signal.
pub struct PipelineHandle {
    pub monitor: MonitorHandle,
    pub started_at: DateTime<Utc>,
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Signal every worker to stop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop and wait for the workers to exit.
    pub async fn shutdown(self) {
        self.stop();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Pipeline task ended abnormally: {}", e);
            }
        }
        info!("Pipeline stopped");
    }
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

/// Build the sink on the delivery thread: the blocking HTTP client must not
/// be created or dropped inside the async runtime.
pub fn default_sink(config: Arc<SharedConfig>) -> Box<dyn AlertSink> {
    match WebhookSink::new(config) {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            warn!("Webhook client init failed (alerts will only be logged): {}", e);
            Box::new(LogSink)
        }
    }
}

pub struct Pipeline {
    config: Arc<SharedConfig>,
}

impl Pipeline {
    pub fn new(config: Arc<SharedConfig>) -> Self {
        Self { config }
    }

    /// Start capture, control loop and delivery in background tasks.
    /// Must be called from inside a tokio runtime.
    pub fn start<F>(
        self,
        source: Box<dyn FrameSource>,
        detector: Box<dyn MotionDetector>,
        servo: Box<dyn ServoMover>,
        make_sink: F,
    ) -> PipelineHandle
    where
        F: FnOnce(Arc<SharedConfig>) -> Box<dyn AlertSink> + Send + 'static,
    {
        let cfg = self.config.snapshot();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (frame_tx, frame_rx) = watch::channel::<FrameSlot>(None);
        let (cmd_tx, cmd_rx) = flume::bounded::<MonitorCommand>(COMMAND_BUFFER);

        let queue = Arc::new(AlertQueue::new(cfg.alerts.queue_capacity));
        let delivery = Arc::new(DeliveryStats::default());

        let mut monitor = Monitor::new(
            Arc::clone(&self.config),
            detector,
            servo,
            Arc::clone(&queue),
            Arc::clone(&delivery),
        );
        monitor.initialize(Instant::now());
        let shared = monitor.shared();
        let (status_tx, status_rx) = watch::channel(monitor.status(Instant::now()));

        let mut tasks = Vec::with_capacity(3);

        // ── Delivery worker (blocking thread) ───────────────────────────────
        let del_cfg = Arc::clone(&self.config);
        let del_queue = Arc::clone(&queue);
        let del_stats = Arc::clone(&delivery);
        let del_stop = stop_rx.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            let sink = make_sink(Arc::clone(&del_cfg));
            run_delivery_worker(del_queue, sink, del_cfg, del_stats, del_stop);
        }));

        // ── Capture loop (blocking thread) ──────────────────────────────────
        let cap_shared = Arc::clone(&shared);
        let cap_stop = stop_rx.clone();
        let frame_interval = cfg.frame_interval();
        tasks.push(tokio::task::spawn_blocking(move || {
            capture_loop(source, frame_tx, cap_shared, cap_stop, frame_interval);
        }));

        // ── Control loop ────────────────────────────────────────────────────
        let mut ctl_stop = stop_rx;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Control loop running at {:.1} Hz", 1.0 / frame_interval.as_secs_f64());

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = ctl_stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                if *ctl_stop.borrow() {
                    break;
                }

                let now = Instant::now();
                while let Ok(command) = cmd_rx.try_recv() {
                    monitor.handle(command, now);
                }

                let frame = frame_rx.borrow().clone();
                let report = monitor.tick(frame.as_deref(), now);
                if let Some(target) = report.move_command {
                    debug!("Tick issued move to {}", target);
                }
                status_tx.send_replace(monitor.status(now));
            }

            monitor.shutdown(Instant::now());
            status_tx.send_replace(monitor.status(Instant::now()));
            info!("Control loop exited");
        }));

        PipelineHandle {
            monitor: MonitorHandle {
                commands: cmd_tx,
                shared,
                status: status_rx,
                config: self.config,
            },
            started_at: Utc::now(),
            stop_tx,
            tasks,
        }
    }
}

/// Publish the newest frame into the slot, paced to the configured rate.
/// Read failures flag the camera as degraded and back off before retrying.
fn capture_loop(
    mut source: Box<dyn FrameSource>,
    frame_tx: watch::Sender<FrameSlot>,
    shared: Arc<MonitorShared>,
    stop: watch::Receiver<bool>,
    frame_interval: Duration,
) {
    info!("Capture loop started");
    let mut backoff = Duration::from_millis(250);

    while !*stop.borrow() {
        let started = Instant::now();
        match source.next_frame() {
            Ok(frame) => {
                if shared.camera_degraded.swap(false) {
                    info!("Camera recovered");
                }
                backoff = Duration::from_millis(250);
                frame_tx.send_replace(Some(Arc::new(frame)));
                if let Some(rest) = frame_interval.checked_sub(started.elapsed()) {
                    std::thread::sleep(rest);
                }
            }
            Err(e) => {
                if !shared.camera_degraded.swap(true) {
                    warn!("Capture error: {}, reconnecting", e);
                }
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_CAPTURE_BACKOFF);
                if let Err(re) = source.reconnect() {
                    debug!("Reconnect failed: {}", re);
                }
            }
        }
    }
    info!("Capture loop exited");
}
