use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use servo_sentinel::alerts::AlertItem;
use servo_sentinel::config::{AppConfig, SharedConfig};
use servo_sentinel::error::{Result, SentinelError};
use servo_sentinel::geometry::ServoPosition;
use servo_sentinel::hardware::{SimulatedServo, SyntheticCamera};
use servo_sentinel::motion::FrameDiffDetector;
use servo_sentinel::pipeline::{MonitorHandle, Pipeline, PipelineHandle};
use servo_sentinel::webhook::AlertSink;

struct Collect(Arc<Mutex<Vec<AlertItem>>>);

impl AlertSink for Collect {
    fn deliver(&mut self, item: &AlertItem) -> Result<()> {
        self.0.lock().unwrap().push(item.clone());
        Ok(())
    }
}

fn small_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.camera.width = 64;
    cfg.camera.height = 48;
    cfg.camera.fps = 30;
    cfg.alerts.include_snapshot = false;
    cfg
}

fn start(cfg: AppConfig) -> (PipelineHandle, Arc<Mutex<Vec<AlertItem>>>) {
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink_store = Arc::clone(&delivered);
    let handle = Pipeline::new(Arc::new(SharedConfig::new(cfg.clone()))).start(
        Box::new(SyntheticCamera::new(cfg.camera.width, cfg.camera.height)),
        Box::new(FrameDiffDetector::new(25, 0.05, 0.015)),
        Box::new(SimulatedServo::new(ServoPosition::centered(), 2.0)),
        move |_cfg| Box::new(Collect(sink_store)) as Box<dyn AlertSink>,
    );
    (handle, delivered)
}

async fn wait_for(monitor: &MonitorHandle, what: impl Fn(&MonitorHandle) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if what(monitor) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pipeline_runs_and_stops() {
    let (handle, delivered) = start(small_config());
    let monitor = handle.monitor.clone();

    monitor.start_monitoring().unwrap();
    assert!(wait_for(&monitor, |m| m.status().stats.frames_processed > 5).await);
    assert!(monitor.is_monitoring());
    assert!(monitor.is_patrolling());

    let status = monitor.status();
    assert!(!status.camera_degraded);
    assert_eq!(status.patrol_positions, 15);
    let json = monitor.status_json().unwrap();
    assert!(json.contains("\"monitoring\":true"));

    monitor.stop_monitoring().unwrap();
    assert!(!monitor.is_monitoring());
    assert!(wait_for(&monitor, |m| !m.status().monitoring).await);

    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("pipeline did not shut down");

    // Static synthetic scene: nothing worth alerting on.
    assert!(delivered.lock().unwrap().is_empty());
    // Control loop is gone.
    assert!(matches!(monitor.start_monitoring(), Err(SentinelError::ControlLoop(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_manual_move_via_handle() {
    let mut cfg = small_config();
    cfg.patrol.enabled = false;
    let (handle, _delivered) = start(cfg);
    let monitor = handle.monitor.clone();

    assert!(matches!(monitor.move_manual(200.0, 90.0), Err(SentinelError::InvalidAngle(_))));

    monitor.start_monitoring().unwrap();
    monitor.move_manual(60.0, 120.0).unwrap();
    let target = ServoPosition::clamped(60.0, 120.0);
    assert!(wait_for(&monitor, |m| m.status().position == target && m.status().servo_settled).await);
    assert!(!monitor.is_patrolling());

    monitor.center().unwrap();
    assert!(wait_for(&monitor, |m| m.status().position == ServoPosition::centered()).await);

    handle.shutdown().await;
}
