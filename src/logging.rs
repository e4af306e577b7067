use std::path::{Path, PathBuf};
use std::sync::{Once, OnceLock};

use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Structured logging backed by `tracing`.
///
/// `RUST_LOG` wins over the configured level. When `logging.log_dir` is set,
/// a second, ANSI-free layer writes daily-rotated files there.

static INIT_LOGGING: Once = Once::new();
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn build_file_appender(dir: &Path) -> Option<(RollingFileAppender, PathBuf)> {
    if let Err(err) = std::fs::create_dir_all(dir) {
        eprintln!(
            "[sentinel][WARN] Failed to create log directory {}: {}",
            dir.display(),
            err
        );
        return None;
    }
    Some((
        RollingFileAppender::new(Rotation::DAILY, dir, "servo-sentinel.log"),
        dir.to_path_buf(),
    ))
}

pub fn init_logging(cfg: &LoggingConfig) {
    INIT_LOGGING.call_once(|| {
        let appender = cfg
            .log_dir
            .as_deref()
            .filter(|d| !d.is_empty())
            .and_then(|d| build_file_appender(Path::new(d)));

        let (file_layer, log_dir) = if let Some((appender, dir)) = appender {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(non_blocking);
            LOG_GUARD.set(guard).ok();
            (Some(layer), Some(dir))
        } else {
            (None, None)
        };

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(format!("servo_sentinel={},warn", cfg.level)))
            .unwrap_or_else(|_| EnvFilter::new("servo_sentinel=info,warn"));

        let stdout_layer = fmt::layer()
            .compact()
            .with_target(false)
            .with_timer(UtcTime::rfc_3339());

        let registry = tracing_subscriber::registry().with(filter).with(stdout_layer);
        if let Some(file_layer) = file_layer {
            registry.with(file_layer).init();
        } else {
            registry.init();
        }

        match log_dir {
            Some(dir) => info!("Logging to stdout and {} (rotated daily)", dir.display()),
            None if cfg.log_dir.is_some() => warn!("Log directory unavailable, logging to stdout only"),
            None => {}
        }
    });
}
