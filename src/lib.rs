//! servo-sentinel: monitoring control loop for a pan/tilt camera rig.
//!
//! Fuses frame-level motion detection, heuristic threat classification,
//! per-position scene baselines and an autonomous patrol into one
//! per-frame decision, and hands prioritized alerts to a webhook.

pub mod alerts;
pub mod config;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod hardware;
pub mod intelligence;
pub mod logging;
pub mod monitor;
pub mod motion;
pub mod patrol;
pub mod pipeline;
pub mod scene;
pub mod webhook;

pub use error::{Result, SentinelError};
