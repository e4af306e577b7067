//! Alert delivery: the sink seam, the HTTP webhook sink and the blocking
//! worker that drains the alert queue with a minimum gap between sends.

use crossbeam::atomic::AtomicCell;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::alerts::{AlertItem, AlertQueue};
use crate::config::SharedConfig;
use crate::error::{Result, SentinelError};

const IDLE_POLL: Duration = Duration::from_millis(100);

pub trait AlertSink: Send {
    fn deliver(&mut self, item: &AlertItem) -> Result<()>;
}

/// POSTs the alert payload as JSON. The target URL is read from the live
/// config on every send so a runtime patch takes effect immediately; with no
/// URL configured the alert is only logged.
pub struct WebhookSink {
    client: reqwest::blocking::Client,
    config: Arc<SharedConfig>,
}

impl WebhookSink {
    pub fn new(config: Arc<SharedConfig>) -> Result<Self> {
        let timeout = Duration::from_secs_f64(config.snapshot().webhook.timeout_secs);
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }
}

impl AlertSink for WebhookSink {
    fn deliver(&mut self, item: &AlertItem) -> Result<()> {
        let cfg = self.config.snapshot();
        let Some(url) = cfg.webhook.url.as_deref().filter(|u| !u.is_empty()) else {
            return LogSink.deliver(item);
        };

        let resp = self.client.post(url).json(&item.payload).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SentinelError::delivery(format!("HTTP {}", status)));
        }
        info!(
            "Webhook sent ({}): {:.1}°/{:.1}°",
            item.priority.as_str(),
            item.payload.pan_angle,
            item.payload.tilt_angle
        );
        Ok(())
    }
}

/// Writes alerts to the log only.
pub struct LogSink;

impl AlertSink for LogSink {
    fn deliver(&mut self, item: &AlertItem) -> Result<()> {
        let what = match item.payload.motion_classification {
            Some(class) => class.as_str(),
            None if item.payload.scene_position_key.is_some() => "scene change",
            None => "motion",
        };
        info!(
            "ALERT [{}] {} at {:.1}°/{:.1}°",
            item.priority.as_str(),
            what,
            item.payload.pan_angle,
            item.payload.tilt_angle
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct DeliveryStats {
    pub sent: AtomicCell<u64>,
    pub failed: AtomicCell<u64>,
    /// Set after a failed delivery, cleared by the next success.
    pub degraded: AtomicCell<bool>,
}

/// Drain `queue` into `sink` until `stop` flips. Runs on a blocking thread.
///
/// At most one delivery per `webhook.cooldown_secs`, whatever the priority
/// mix. Failed deliveries are counted and not retried.
pub fn run_delivery_worker(
    queue: Arc<AlertQueue>,
    mut sink: Box<dyn AlertSink>,
    config: Arc<SharedConfig>,
    stats: Arc<DeliveryStats>,
    stop: watch::Receiver<bool>,
) {
    info!("Alert delivery worker started");
    let mut last_sent: Option<Instant> = None;

    while !*stop.borrow() {
        if !queue.wait(IDLE_POLL) {
            continue;
        }

        let cooldown = Duration::from_secs_f64(config.snapshot().webhook.cooldown_secs);
        if let Some(last) = last_sent {
            let since = last.elapsed();
            if since < cooldown {
                std::thread::sleep((cooldown - since).min(IDLE_POLL));
                continue;
            }
        }

        let Some(mut item) = queue.pop() else {
            continue;
        };
        item.render_snapshot(config.snapshot().camera.jpeg_quality);
        debug!(
            "Delivering {} alert queued {:?} ago",
            item.priority.as_str(),
            item.enqueued_at.elapsed()
        );

        match sink.deliver(&item) {
            Ok(()) => {
                stats.sent.fetch_add(1);
                stats.degraded.store(false);
            }
            Err(e) => {
                stats.failed.fetch_add(1);
                stats.degraded.store(true);
                warn!("Alert delivery failed: {}", e);
            }
        }
        last_sent = Some(Instant::now());
    }

    let dropped = queue.clear();
    if dropped > 0 {
        warn!("Delivery worker stopped with {} undelivered alerts", dropped);
    }
    info!("Alert delivery worker stopped");
}
