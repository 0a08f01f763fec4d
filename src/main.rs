//! Proctor Engine CLI
//!
//! Runs proctored sessions against simulated devices and inspects local state.

use anyhow::Context;
use clap::{Parser, Subcommand};
use proctor_engine::{
    config::{Config, RequiredSensors},
    report::{DirectoryArtifactStore, JsonlViolationLog},
    scenario::Scenario,
    sensor::simulated::SimulatedScene,
    transparency::create_shared_log_with_persistence,
    ProctorSession, SessionState, SessionStatus, INTEGRITY_DECLARATION, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "proctor")]
#[command(version = VERSION)]
#[command(about = "Real-time proctoring violation engine", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a proctored session against simulated devices
    Run {
        /// Candidate identifier recorded with every violation
        #[arg(long, default_value = "candidate")]
        user: String,

        /// Scenario script to replay (built-in demo if omitted)
        #[arg(long)]
        scenario: Option<PathBuf>,

        /// Exam length in seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Sensors that must start (camera, microphone, screen, all or none)
        #[arg(long)]
        required: Option<String>,

        /// Where to write the session report
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Show monitoring statistics and recent violations
    Status,

    /// Display the integrity declaration
    Declaration,

    /// Show configuration
    Config {
        /// Write the default configuration file
        #[arg(long)]
        write_default: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::Run {
            user,
            scenario,
            duration,
            required,
            output,
        } => cmd_run(user, scenario, duration, required, output).await,
        Commands::Status => cmd_status(),
        Commands::Declaration => {
            cmd_declaration();
            Ok(())
        }
        Commands::Config { write_default } => cmd_config(write_default),
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

async fn cmd_run(
    user: String,
    scenario_path: Option<PathBuf>,
    duration: Option<u64>,
    required: Option<String>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = Config::load().context("loading configuration")?;
    if let Some(secs) = duration {
        config.session_duration = Duration::from_secs(secs);
    }
    if let Some(required) = required {
        config.required_sensors = RequiredSensors::from_csv(&required)?;
    }
    config.validate()?;
    config.ensure_directories()?;

    let scenario = match scenario_path {
        Some(path) => Scenario::load(&path)
            .with_context(|| format!("loading scenario {}", path.display()))?,
        None => Scenario::demo(),
    };

    let scene = SimulatedScene::with_calibration(config.pitch_calibration_offset);
    scenario.prepare(&scene);

    let transparency = create_shared_log_with_persistence(config.transparency_path());
    let violation_log = Arc::new(JsonlViolationLog::open(config.violation_log_path())?);
    let artifacts = Arc::new(DirectoryArtifactStore::new(config.artifact_dir())?);

    println!("{INTEGRITY_DECLARATION}");
    println!("Scenario: {}", scenario.name);
    println!("Exam length: {}s", config.session_duration.as_secs());
    println!();

    let handle = ProctorSession::new(
        user,
        config.clone(),
        scene.camera(),
        scene.microphone(),
        scene.screen(),
        scene.detector(),
    )
    .with_violation_log(violation_log)
    .with_uploader(artifacts.clone())
    .with_transparency(transparency.clone())
    .start()
    .await?;
    println!(
        "Session {} for {} started at {}",
        handle.session_id(),
        handle.user_id(),
        handle.started_at().format("%H:%M:%S")
    );

    let mut updates = handle.subscribe();
    let renderer = tokio::spawn(async move {
        let mut last = None;
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            render(&state, &mut last);
        }
    });

    let interrupted = CancellationToken::new();
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || interrupted.cancel()).context("setting Ctrl+C handler")?;
    }

    tokio::select! {
        result = scenario.play(&scene, &handle) => result?,
        _ = interrupted.cancelled() => println!("\nInterrupted; finishing session..."),
    }

    let report = handle.finish().await?;
    renderer.abort();
    artifacts.shutdown();

    let output_path = output.unwrap_or_else(|| {
        config
            .export_path
            .join(format!("session_{}.json", report.session_id))
    });
    report.export(&output_path)?;

    println!();
    println!("Session {} finished", report.session_id);
    println!("  Final status: {:?}", report.final_state.status);
    println!("  Violations: {}", report.final_state.violation_count);
    for event in &report.violations {
        println!(
            "    - {} ({:.1}s from {})",
            event.kind,
            event.duration_secs(),
            event.window_start.format("%H:%M:%S")
        );
    }
    println!(
        "  Artifacts written: {} ({} failed) under {:?}",
        artifacts.written(),
        artifacts.failed(),
        artifacts.root()
    );
    println!("  Report: {output_path:?}");
    println!();
    println!("{}", transparency.summary());

    if let Err(e) = transparency.save() {
        eprintln!("Warning: could not save transparency stats: {e}");
    }
    Ok(())
}

/// Print a line whenever something other than the countdown changes.
fn render(state: &SessionState, last: &mut Option<(SessionStatus, u32, bool)>) {
    let key = (state.status, state.violation_count, state.warning.is_some());
    if last.as_ref() == Some(&key) {
        return;
    }
    *last = Some(key);

    let remaining = format!("{:02}:{:02}", state.remaining_seconds / 60, state.remaining_seconds % 60);
    match (&state.status, &state.warning) {
        (SessionStatus::Blocked, _) => {
            println!("[{remaining}] BLOCKED after {} violation(s)", state.violation_count)
        }
        (_, Some(warning)) => println!(
            "[{remaining}] WARNING: {}{}",
            warning.kind,
            if warning.resumable {
                " (share your screen again to continue)"
            } else {
                ""
            }
        ),
        (status, None) => println!(
            "[{remaining}] {:?} - {} violation(s)",
            status, state.violation_count
        ),
    }
}

fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Proctor Engine Status");
    println!("=====================");
    println!();

    println!("Configuration:");
    println!(
        "  Thresholds: yaw {} / pitch {} / noise {} dBFS",
        config.yaw_threshold, config.pitch_threshold, config.noise_threshold_db
    );
    println!("  Detection interval: {}ms", config.detection_interval.as_millis());
    println!("  Screenshot interval: {}s", config.screenshot_interval.as_secs());
    println!("  Exam length: {}s", config.session_duration.as_secs());
    println!();

    let stats_path = config.transparency_path();
    if stats_path.exists() {
        let content = std::fs::read_to_string(&stats_path)?;
        let stats: serde_json::Value = serde_json::from_str(&content)?;
        println!("Cumulative Statistics:");
        for (label, key) in [
            ("Camera frames analysed", "frames_analyzed"),
            ("Audio buffers measured", "audio_buffers_analyzed"),
            ("Platform events", "platform_events"),
            ("Violations logged", "violations_logged"),
            ("Artifacts uploaded", "artifacts_uploaded"),
            ("Sensor failures", "sensor_failures"),
        ] {
            if let Some(value) = stats.get(key) {
                println!("  {label}: {value}");
            }
        }
    } else {
        println!("No previous session data found.");
    }

    let log_path = config.violation_log_path();
    if log_path.exists() {
        let records = JsonlViolationLog::read_all(&log_path)?;
        println!();
        println!("Recent violations ({} total):", records.len());
        for record in records.iter().rev().take(10) {
            println!(
                "  {} {} {} ({}s)",
                record.window_start.format("%Y-%m-%d %H:%M:%S"),
                record.user_id,
                record.kind,
                (record.window_end - record.window_start).num_seconds()
            );
        }
    }
    Ok(())
}

fn cmd_declaration() {
    println!("{INTEGRITY_DECLARATION}");
}

fn cmd_config(write_default: bool) -> anyhow::Result<()> {
    let config = if write_default {
        let config = Config::default();
        config.save()?;
        println!("Wrote default configuration.");
        config
    } else {
        Config::load()?
    };

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
