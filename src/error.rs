//! Error types shared across the monitoring core.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SentinelError>;

#[derive(Debug, Error)]
pub enum SentinelError {
    /// Rejected at startup (or on a runtime patch) before the loop sees it.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config load failed: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Angle {0:.1}° outside 0-180°")]
    InvalidAngle(f64),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Servo error: {0}")]
    Servo(String),

    #[error("Alert delivery failed: {0}")]
    Delivery(String),

    /// The control loop is gone or its command channel is full.
    #[error("Control loop unavailable: {0}")]
    ControlLoop(String),

    #[error("Frame buffer does not match {width}x{height}")]
    FrameSize { width: u32, height: u32 },

    #[error("Image encode error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SentinelError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }

    pub fn servo(msg: impl Into<String>) -> Self {
        Self::Servo(msg.into())
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }
}
