/// Monitoring Configuration
///
/// Loaded from servo_sentinel.toml (working directory, or an explicit path)
/// with env-var overrides.
/// Env format: SENTINEL__SECTION__KEY (double underscore separators).
///
/// The control loop never reads a mutable config: it takes an `Arc` snapshot
/// from `SharedConfig` once per tick. Runtime changes go through
/// `SharedConfig::apply`, which validates a patched copy and swaps it in.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::error::{Result, SentinelError};
use crate::geometry::{ANGLE_MAX, ANGLE_MIN};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraConfig,
    pub motion: MotionConfig,
    pub scene: SceneConfig,
    pub patrol: PatrolConfig,
    pub servo: ServoConfig,
    pub alerts: AlertsConfig,
    pub webhook: WebhookConfig,
    pub logging: LoggingConfig,
}

// ─── Camera ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CameraConfig {
    #[serde(default = "default_camera_id")]
    pub camera_id: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_camera_id() -> String {
    "cam0".to_string()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_fps() -> u32 {
    15
}
fn default_jpeg_quality() -> u8 {
    75
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            camera_id: default_camera_id(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

// ─── Motion ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MotionConfig {
    /// Minimum blob area as a fraction of the frame.
    #[serde(default = "default_min_area_ratio")]
    pub min_area_ratio: f64,
    #[serde(default = "default_pixel_threshold")]
    pub pixel_threshold: u8,
    #[serde(default = "default_learning_rate")]
    pub background_learning_rate: f32,
    #[serde(default = "default_persistence_window")]
    pub persistence_window: usize,
    #[serde(default = "default_trajectory_len")]
    pub trajectory_len: usize,
}

fn default_true() -> bool {
    true
}
fn default_min_area_ratio() -> f64 {
    0.015
}
fn default_pixel_threshold() -> u8 {
    25
}
fn default_learning_rate() -> f32 {
    0.05
}
fn default_persistence_window() -> usize {
    10
}
fn default_trajectory_len() -> usize {
    15
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            min_area_ratio: default_min_area_ratio(),
            pixel_threshold: default_pixel_threshold(),
            background_learning_rate: default_learning_rate(),
            persistence_window: default_persistence_window(),
            trajectory_len: default_trajectory_len(),
        }
    }
}

// ─── Scene ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SceneConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bucket_degrees")]
    pub bucket_degrees: f64,
    #[serde(default = "default_pixel_threshold")]
    pub pixel_threshold: u8,
    #[serde(default = "default_min_change_ratio")]
    pub min_change_ratio: f64,
    #[serde(default = "default_mean_threshold")]
    pub mean_threshold: f64,
    #[serde(default = "default_baseline_blend")]
    pub baseline_blend: f64,
    #[serde(default = "default_scene_cooldown")]
    pub cooldown_secs: f64,
}

fn default_bucket_degrees() -> f64 {
    5.0
}
fn default_min_change_ratio() -> f64 {
    0.03
}
fn default_mean_threshold() -> f64 {
    0.06
}
fn default_baseline_blend() -> f64 {
    0.2
}
fn default_scene_cooldown() -> f64 {
    10.0
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bucket_degrees: default_bucket_degrees(),
            pixel_threshold: default_pixel_threshold(),
            min_change_ratio: default_min_change_ratio(),
            mean_threshold: default_mean_threshold(),
            baseline_blend: default_baseline_blend(),
            cooldown_secs: default_scene_cooldown(),
        }
    }
}

// ─── Patrol ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PatrolConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dwell_secs")]
    pub dwell_secs: f64,
    #[serde(default = "default_pan_min")]
    pub pan_min: f64,
    #[serde(default = "default_pan_max")]
    pub pan_max: f64,
    #[serde(default = "default_pan_step")]
    pub pan_step: f64,
    #[serde(default = "default_tilt_min")]
    pub tilt_min: f64,
    #[serde(default = "default_tilt_max")]
    pub tilt_max: f64,
    #[serde(default = "default_tilt_step")]
    pub tilt_step: f64,
    /// Movement cap handed to the servo mover, degrees/second.
    #[serde(default = "default_patrol_speed")]
    pub speed_dps: f64,
    /// Give up waiting for "settled" after this long and start dwelling.
    #[serde(default = "default_move_timeout")]
    pub move_timeout_secs: f64,
}

fn default_dwell_secs() -> f64 {
    3.0
}
fn default_pan_min() -> f64 {
    30.0
}
fn default_pan_max() -> f64 {
    150.0
}
fn default_pan_step() -> f64 {
    30.0
}
fn default_tilt_min() -> f64 {
    150.0
}
fn default_tilt_max() -> f64 {
    180.0
}
fn default_tilt_step() -> f64 {
    15.0
}
fn default_patrol_speed() -> f64 {
    45.0
}
fn default_move_timeout() -> f64 {
    5.0
}

impl Default for PatrolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dwell_secs: default_dwell_secs(),
            pan_min: default_pan_min(),
            pan_max: default_pan_max(),
            pan_step: default_pan_step(),
            tilt_min: default_tilt_min(),
            tilt_max: default_tilt_max(),
            tilt_step: default_tilt_step(),
            speed_dps: default_patrol_speed(),
            move_timeout_secs: default_move_timeout(),
        }
    }
}

// ─── Servo ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServoConfig {
    /// Motion evaluation is suppressed this long after every move command.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: f64,
    #[serde(default = "default_deadband")]
    pub deadband_degrees: f64,
    /// Speed used for manual moves.
    #[serde(default = "default_manual_speed")]
    pub manual_speed_dps: f64,
}

fn default_settle_secs() -> f64 {
    1.5
}
fn default_deadband() -> f64 {
    2.0
}
fn default_manual_speed() -> f64 {
    90.0
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            settle_secs: default_settle_secs(),
            deadband_degrees: default_deadband(),
            manual_speed_dps: default_manual_speed(),
        }
    }
}

// ─── Alerts / webhook ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AlertsConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub send_low_priority: bool,
    /// Attach a JPEG snapshot (base64) to every alert.
    #[serde(default = "default_true")]
    pub include_snapshot: bool,
}

fn default_queue_capacity() -> usize {
    10
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            send_low_priority: false,
            include_snapshot: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WebhookConfig {
    /// No URL means alerts are only logged.
    pub url: Option<String>,
    /// Minimum gap between two deliveries, whatever their priority.
    #[serde(default = "default_webhook_cooldown")]
    pub cooldown_secs: f64,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: f64,
}

fn default_webhook_cooldown() -> f64 {
    2.0
}
fn default_webhook_timeout() -> f64 {
    5.0
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            cooldown_secs: default_webhook_cooldown(),
            timeout_secs: default_webhook_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Daily-rotated log files go here when set.
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
        }
    }
}

// ─── Validation ──────────────────────────────────────────────────────────────

fn check(ok: bool, msg: impl Into<String>) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(SentinelError::invalid_config(msg))
    }
}

fn check_fraction(value: f64, name: &str) -> Result<()> {
    check(
        value.is_finite() && (0.0..=1.0).contains(&value),
        format!("{} must be within 0-1, got {}", name, value),
    )
}

/// Longest interval any timer may be configured for (one day).
const MAX_SECS: f64 = 86_400.0;
/// Finest patrol step; matches the smallest scene bucket.
const MIN_PATROL_STEP: f64 = 0.5;
const MAX_SPEED_DPS: f64 = 1_000.0;

fn check_secs(value: f64, name: &str, allow_zero: bool) -> Result<()> {
    let lower_ok = if allow_zero { value >= 0.0 } else { value > 0.0 };
    check(
        value.is_finite() && lower_ok && value <= MAX_SECS,
        format!("{} must be a finite number of seconds up to {}, got {}", name, MAX_SECS, value),
    )
}

fn check_speed(value: f64, name: &str) -> Result<()> {
    check(
        value.is_finite() && value > 0.0 && value <= MAX_SPEED_DPS,
        format!("{} must be within (0-{}]°/s, got {}", name, MAX_SPEED_DPS, value),
    )
}

fn check_angle(value: f64, name: &str) -> Result<()> {
    check(
        value.is_finite() && (ANGLE_MIN..=ANGLE_MAX).contains(&value),
        format!("{} must be within 0-180°, got {}", name, value),
    )
}

impl AppConfig {
    /// Fail fast on anything the control loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        let c = &self.camera;
        check(c.width > 0 && c.height > 0, "camera.width and camera.height must be non-zero")?;
        check((1..=60).contains(&c.fps), format!("camera.fps must be 1-60, got {}", c.fps))?;
        check(
            (1..=100).contains(&c.jpeg_quality),
            format!("camera.jpeg_quality must be 1-100, got {}", c.jpeg_quality),
        )?;

        let m = &self.motion;
        check(
            m.min_area_ratio > 0.0 && m.min_area_ratio < 1.0,
            format!("motion.min_area_ratio must be within (0, 1), got {}", m.min_area_ratio),
        )?;
        check_fraction(m.background_learning_rate as f64, "motion.background_learning_rate")?;
        check(m.persistence_window >= 1, "motion.persistence_window must be at least 1")?;
        check(m.trajectory_len >= 3, "motion.trajectory_len must be at least 3")?;

        let s = &self.scene;
        check(
            s.bucket_degrees.is_finite() && (0.5..=ANGLE_MAX).contains(&s.bucket_degrees),
            format!("scene.bucket_degrees must be within 0.5-180, got {}", s.bucket_degrees),
        )?;
        check_fraction(s.min_change_ratio, "scene.min_change_ratio")?;
        check_fraction(s.mean_threshold, "scene.mean_threshold")?;
        check_fraction(s.baseline_blend, "scene.baseline_blend")?;
        check_secs(s.cooldown_secs, "scene.cooldown_secs", true)?;

        let p = &self.patrol;
        check_angle(p.pan_min, "patrol.pan_min")?;
        check_angle(p.pan_max, "patrol.pan_max")?;
        check_angle(p.tilt_min, "patrol.tilt_min")?;
        check_angle(p.tilt_max, "patrol.tilt_max")?;
        check(
            p.pan_min <= p.pan_max,
            format!("patrol.pan_min ({}) exceeds patrol.pan_max ({})", p.pan_min, p.pan_max),
        )?;
        check(
            p.tilt_min <= p.tilt_max,
            format!("patrol.tilt_min ({}) exceeds patrol.tilt_max ({})", p.tilt_min, p.tilt_max),
        )?;
        for (step, name) in [(p.pan_step, "patrol.pan_step"), (p.tilt_step, "patrol.tilt_step")] {
            check(
                step.is_finite() && step >= MIN_PATROL_STEP,
                format!("{} must be at least {}°, got {}", name, MIN_PATROL_STEP, step),
            )?;
        }
        check_secs(p.dwell_secs, "patrol.dwell_secs", false)?;
        check_speed(p.speed_dps, "patrol.speed_dps")?;
        check_secs(p.move_timeout_secs, "patrol.move_timeout_secs", false)?;

        let sv = &self.servo;
        check_secs(sv.settle_secs, "servo.settle_secs", true)?;
        check(
            sv.deadband_degrees.is_finite() && (0.0..=ANGLE_MAX).contains(&sv.deadband_degrees),
            format!("servo.deadband_degrees must be within 0-180, got {}", sv.deadband_degrees),
        )?;
        check_speed(sv.manual_speed_dps, "servo.manual_speed_dps")?;

        check(self.alerts.queue_capacity >= 1, "alerts.queue_capacity must be at least 1")?;

        let w = &self.webhook;
        check_secs(w.cooldown_secs, "webhook.cooldown_secs", true)?;
        check_secs(w.timeout_secs, "webhook.timeout_secs", false)?;
        if let Some(url) = w.url.as_deref().filter(|u| !u.is_empty()) {
            reqwest::Url::parse(url)
                .map_err(|e| SentinelError::invalid_config(format!("webhook.url '{}': {}", url, e)))?;
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.camera.fps.max(1) as f64)
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Load configuration from servo_sentinel.toml + environment variable overrides.
///
/// Search order:
///   1. `path` if given (must exist), else ./servo_sentinel.toml (optional)
///   2. Environment variables: SENTINEL__PATROL__DWELL_SECS, etc.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let file = match path {
        Some(p) => config::File::from(p).required(true),
        None => config::File::with_name("servo_sentinel").required(false),
    };
    let settings = config::Config::builder()
        .add_source(file)
        .add_source(
            config::Environment::with_prefix("SENTINEL")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let cfg: AppConfig = settings.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

// ─── Runtime patching ────────────────────────────────────────────────────────

/// Partial update accepted from the presentation layer.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConfigPatch {
    pub motion_min_area_ratio: Option<f64>,
    /// Blank values are ignored; use `clear_webhook_url` to remove the URL.
    pub webhook_url: Option<String>,
    pub clear_webhook_url: Option<bool>,
    pub webhook_cooldown_secs: Option<f64>,
    pub send_low_priority: Option<bool>,
    pub patrol_enabled: Option<bool>,
    pub patrol_dwell_secs: Option<f64>,
    pub patrol_pan_min: Option<f64>,
    pub patrol_pan_max: Option<f64>,
    pub patrol_pan_step: Option<f64>,
    pub patrol_tilt_min: Option<f64>,
    pub patrol_tilt_max: Option<f64>,
    pub patrol_tilt_step: Option<f64>,
    pub scene_min_change_ratio: Option<f64>,
    pub scene_mean_threshold: Option<f64>,
    pub scene_cooldown_secs: Option<f64>,
}

impl ConfigPatch {
    pub fn apply_to(&self, base: &AppConfig) -> AppConfig {
        let mut cfg = base.clone();
        if let Some(v) = self.motion_min_area_ratio { cfg.motion.min_area_ratio = v; }
        if let Some(url) = self.webhook_url.as_deref().map(str::trim) {
            // Empty URL keeps the current one.
            if !url.is_empty() {
                cfg.webhook.url = Some(url.to_string());
            }
        }
        if self.clear_webhook_url == Some(true) { cfg.webhook.url = None; }
        if let Some(v) = self.webhook_cooldown_secs { cfg.webhook.cooldown_secs = v; }
        if let Some(v) = self.send_low_priority { cfg.alerts.send_low_priority = v; }
        if let Some(v) = self.patrol_enabled { cfg.patrol.enabled = v; }
        if let Some(v) = self.patrol_dwell_secs { cfg.patrol.dwell_secs = v; }
        if let Some(v) = self.patrol_pan_min { cfg.patrol.pan_min = v; }
        if let Some(v) = self.patrol_pan_max { cfg.patrol.pan_max = v; }
        if let Some(v) = self.patrol_pan_step { cfg.patrol.pan_step = v; }
        if let Some(v) = self.patrol_tilt_min { cfg.patrol.tilt_min = v; }
        if let Some(v) = self.patrol_tilt_max { cfg.patrol.tilt_max = v; }
        if let Some(v) = self.patrol_tilt_step { cfg.patrol.tilt_step = v; }
        if let Some(v) = self.scene_min_change_ratio { cfg.scene.min_change_ratio = v; }
        if let Some(v) = self.scene_mean_threshold { cfg.scene.mean_threshold = v; }
        if let Some(v) = self.scene_cooldown_secs { cfg.scene.cooldown_secs = v; }
        cfg
    }
}

/// Atomic configuration holder: readers take an `Arc` snapshot, writers
/// replace the whole value.
pub struct SharedConfig {
    current: RwLock<Arc<AppConfig>>,
}

impl SharedConfig {
    pub fn new(cfg: AppConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(cfg)),
        }
    }

    pub fn snapshot(&self) -> Arc<AppConfig> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Validate `patch` against the current config and publish the result.
    /// On error the current config is left untouched.
    pub fn apply(&self, patch: &ConfigPatch) -> Result<Arc<AppConfig>> {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = patch.apply_to(&guard);
        next.validate()?;
        let next = Arc::new(next);
        *guard = Arc::clone(&next);
        info!("Configuration updated: {:?}", patch);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.camera.fps, 15);
        assert_eq!(cfg.patrol.pan_step, 30.0);
        assert_eq!(cfg.scene.cooldown_secs, 10.0);
        assert_eq!(cfg.alerts.queue_capacity, 10);
        assert_eq!(cfg.webhook.cooldown_secs, 2.0);
    }

    #[test]
    fn inverted_patrol_range_is_fatal() {
        let mut cfg = AppConfig::default();
        cfg.patrol.pan_min = 160.0;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, SentinelError::InvalidConfig(_)));
        assert!(err.to_string().contains("pan_min"));
    }

    #[test]
    fn out_of_range_fraction_rejected() {
        let mut cfg = AppConfig::default();
        cfg.scene.baseline_blend = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unbounded_durations_rejected() {
        for bad in [f64::INFINITY, f64::NAN, 1e300, -1.0] {
            let mut cfg = AppConfig::default();
            cfg.servo.settle_secs = bad;
            assert!(cfg.validate().is_err(), "settle_secs {} accepted", bad);

            let mut cfg = AppConfig::default();
            cfg.patrol.dwell_secs = bad;
            assert!(cfg.validate().is_err(), "dwell_secs {} accepted", bad);

            let mut cfg = AppConfig::default();
            cfg.patrol.move_timeout_secs = bad;
            assert!(cfg.validate().is_err());

            let mut cfg = AppConfig::default();
            cfg.scene.cooldown_secs = bad;
            assert!(cfg.validate().is_err());

            let mut cfg = AppConfig::default();
            cfg.webhook.cooldown_secs = bad;
            assert!(cfg.validate().is_err());

            let mut cfg = AppConfig::default();
            cfg.webhook.timeout_secs = bad;
            assert!(cfg.validate().is_err());
        }

        let mut cfg = AppConfig::default();
        cfg.scene.cooldown_secs = 0.0;
        cfg.servo.settle_secs = MAX_SECS;
        cfg.validate().unwrap();
    }

    #[test]
    fn huge_dwell_patch_is_refused() {
        let shared = SharedConfig::new(AppConfig::default());
        let before = shared.snapshot();
        let res = shared.apply(&ConfigPatch { patrol_dwell_secs: Some(1e300), ..Default::default() });
        assert!(matches!(res, Err(SentinelError::InvalidConfig(_))));
        assert!(Arc::ptr_eq(&before, &shared.snapshot()));
    }

    #[test]
    fn patrol_step_has_a_floor() {
        let mut cfg = AppConfig::default();
        cfg.patrol.pan_step = 1e-9;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("patrol.pan_step"));

        let mut cfg = AppConfig::default();
        cfg.patrol.tilt_step = f64::INFINITY;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.patrol.pan_step = MIN_PATROL_STEP;
        cfg.patrol.tilt_step = MIN_PATROL_STEP;
        cfg.validate().unwrap();
    }

    #[test]
    fn speeds_must_be_finite() {
        let mut cfg = AppConfig::default();
        cfg.patrol.speed_dps = f64::INFINITY;
        assert!(cfg.validate().is_err());
        let mut cfg = AppConfig::default();
        cfg.servo.manual_speed_dps = 1e12;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_webhook_url_rejected() {
        let mut cfg = AppConfig::default();
        cfg.webhook.url = Some("not a url".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn patch_swaps_snapshot() {
        let shared = SharedConfig::new(AppConfig::default());
        let before = shared.snapshot();
        let after = shared
            .apply(&ConfigPatch {
                patrol_dwell_secs: Some(5.0),
                send_low_priority: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(after.patrol.dwell_secs, 5.0);
        assert!(after.alerts.send_low_priority);
        // Old snapshot is untouched.
        assert_eq!(before.patrol.dwell_secs, 3.0);
        assert!(Arc::ptr_eq(&after, &shared.snapshot()));
    }

    #[test]
    fn invalid_patch_keeps_current() {
        let shared = SharedConfig::new(AppConfig::default());
        let before = shared.snapshot();
        let res = shared.apply(&ConfigPatch {
            patrol_tilt_min: Some(179.0),
            patrol_tilt_max: Some(100.0),
            ..Default::default()
        });
        assert!(res.is_err());
        assert!(Arc::ptr_eq(&before, &shared.snapshot()));
    }

    #[test]
    fn webhook_url_can_be_cleared() {
        let shared = SharedConfig::new(AppConfig::default());
        shared
            .apply(&ConfigPatch { webhook_url: Some("http://example.com/hook".into()), ..Default::default() })
            .unwrap();
        let cleared: ConfigPatch = serde_json::from_str(r#"{ "clear_webhook_url": true }"#).unwrap();
        assert!(shared.apply(&cleared).unwrap().webhook.url.is_none());
    }

    #[test]
    fn empty_webhook_url_is_ignored() {
        let mut base = AppConfig::default();
        base.webhook.url = Some("http://example.com/hook".into());
        let patched = ConfigPatch { webhook_url: Some("  ".into()), ..Default::default() }.apply_to(&base);
        assert_eq!(patched.webhook.url.as_deref(), Some("http://example.com/hook"));
    }
}
