use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use servo_sentinel::config::{self, AppConfig, SharedConfig};
use servo_sentinel::geometry::ServoPosition;
use servo_sentinel::hardware::{Intruder, SimulatedServo, SyntheticCamera};
use servo_sentinel::logging::init_logging;
use servo_sentinel::motion::FrameDiffDetector;
use servo_sentinel::patrol::generate_positions;
use servo_sentinel::pipeline::{default_sink, Pipeline};

#[derive(Parser)]
#[command(name = "servo-sentinel", version)]
#[command(about = "Pan/tilt camera monitoring: motion intelligence, scene baselines, autonomous patrol")]
struct Cli {
    /// Config file (default: ./servo_sentinel.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitoring loop against the simulated rig
    Run {
        #[arg(long)] webhook_url: Option<String>,
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)] duration_secs: Option<u64>,
        /// Start without patrol (stationary monitoring)
        #[arg(long)] no_patrol: bool,
        /// Add a synthetic intruder crossing the scene
        #[arg(long)] intruder: bool,
    },

    /// Load and validate the configuration, then print it
    CheckConfig,

    /// Print the patrol grid in visiting order
    PatrolGrid,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run { webhook_url, duration_secs, no_patrol, intruder } => {
            if duration_secs == Some(0) {
                anyhow::bail!("--duration-secs must be at least 1");
            }
            if let Some(url) = webhook_url {
                cfg.webhook.url = Some(url);
            }
            if no_patrol {
                cfg.patrol.enabled = false;
            }
            cfg.validate()?;
            init_logging(&cfg.logging);
            print_startup_info(&cfg);
            run(cfg, duration_secs.map(Duration::from_secs), intruder).await?;
        }

        Command::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&cfg)?);
            println!("Configuration OK");
        }

        Command::PatrolGrid => {
            let positions = generate_positions(&cfg.patrol);
            if !cfg.patrol.enabled {
                println!("(patrol disabled in config)");
            }
            for (i, p) in positions.iter().enumerate() {
                println!("{:>3}  pan {:>6.1}°  tilt {:>6.1}°", i + 1, p.pan.degrees(), p.tilt.degrees());
            }
            println!("{} positions, {:.0}s per cycle at {:.1}s dwell",
                positions.len(),
                positions.len() as f64 * cfg.patrol.dwell_secs,
                cfg.patrol.dwell_secs);
        }
    }

    Ok(())
}

async fn run(cfg: AppConfig, duration: Option<Duration>, intruder: bool) -> Result<()> {
    let mut camera = SyntheticCamera::new(cfg.camera.width, cfg.camera.height);
    if intruder {
        camera = camera.with_intruder(Intruder {
            width: cfg.camera.width / 10,
            height: cfg.camera.height / 4,
            speed: 3,
            intensity: 240,
        });
    }
    let detector = FrameDiffDetector::new(
        cfg.motion.pixel_threshold,
        cfg.motion.background_learning_rate,
        cfg.motion.min_area_ratio,
    );
    let servo = SimulatedServo::new(ServoPosition::centered(), cfg.servo.deadband_degrees);

    let shared = Arc::new(SharedConfig::new(cfg));
    let handle = Pipeline::new(shared).start(
        Box::new(camera),
        Box::new(detector),
        Box::new(servo),
        default_sink,
    );
    handle.monitor.start_monitoring()?;

    match duration {
        Some(d) => {
            tokio::select! {
                _ = tokio::time::sleep(d) => info!("Run duration elapsed"),
                _ = tokio::signal::ctrl_c() => info!("Ctrl-C received"),
            }
        }
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Ctrl-C handler failed: {}", e);
            }
        }
    }

    let status = handle.monitor.status();
    let _ = handle.monitor.stop_monitoring();
    handle.shutdown().await;

    let s = &status.stats;
    println!("Session: {:.0}s, {} frames, {} motions, {} scene changes",
        status.session_secs, s.frames_processed, s.motions_detected, s.scene_changes);
    println!("Alerts:  {} queued, {} suppressed, {} dropped, {} sent, {} failed",
        s.alerts_queued, s.alerts_suppressed, s.alerts_dropped, s.alerts_sent, s.delivery_failures);
    Ok(())
}

fn print_startup_info(cfg: &AppConfig) {
    let webhook = cfg.webhook.url.as_deref()
        .filter(|u| !u.is_empty())
        .unwrap_or("none (log only)");
    let patrol = if cfg.patrol.enabled {
        format!("{} positions, {:.1}s dwell", generate_positions(&cfg.patrol).len(), cfg.patrol.dwell_secs)
    } else {
        "disabled".into()
    };

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║            SERVO SENTINEL v{:<30}║", env!("CARGO_PKG_VERSION"));
    println!("╠══════════════════════════════════════════════════════════╣");
    println!("  Camera:    {} {}x{} @ {} fps", cfg.camera.camera_id, cfg.camera.width, cfg.camera.height, cfg.camera.fps);
    println!("  Patrol:    {}", patrol);
    println!("  Settle:    {:.1}s after every move", cfg.servo.settle_secs);
    println!("  Scene:     {:.0}° buckets, cooldown {:.0}s", cfg.scene.bucket_degrees, cfg.scene.cooldown_secs);
    println!("  Webhook:   {} (cooldown {:.1}s, queue {})", webhook, cfg.webhook.cooldown_secs, cfg.alerts.queue_capacity);
    println!("╚══════════════════════════════════════════════════════════╝");
}
