//! Demonstration of a proctored session against simulated devices.
//!
//! This example shows how to:
//! 1. Build a session from capture devices and a landmark detector
//! 2. Watch state snapshots as a renderer would
//! 3. Drive violations through the simulated scene
//! 4. Resume after a screen-share warning
//! 5. Collect the session report and transparency stats
//!
//! Run with: cargo run --example session_demo

use std::sync::Arc;
use std::time::Duration;

use proctor_engine::{
    report::{MemoryArtifactStore, MemoryViolationLog},
    sensor::simulated::SimulatedScene,
    transparency::create_shared_log,
    Config, ProctorSession, SessionStatus, INTEGRITY_DECLARATION,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Proctor Engine - Session Demo");
    println!("=============================");
    println!();
    println!("{INTEGRITY_DECLARATION}");

    let scene = SimulatedScene::new();
    let log = Arc::new(MemoryViolationLog::new());
    let artifacts = Arc::new(MemoryArtifactStore::new());
    let transparency = create_shared_log();

    let config = Config {
        session_duration: Duration::from_secs(20),
        screenshot_interval: Duration::from_secs(2),
        ..Config::default()
    };

    let handle = ProctorSession::new(
        "demo-candidate",
        config,
        scene.camera(),
        scene.microphone(),
        scene.screen(),
        scene.detector(),
    )
    .with_violation_log(log.clone())
    .with_uploader(artifacts.clone())
    .with_transparency(transparency.clone())
    .start()
    .await?;
    println!("Session {} started", handle.session_id());

    let mut updates = handle.subscribe();
    tokio::spawn(async move {
        let mut last = (SessionStatus::Active, 0);
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            if (state.status, state.violation_count) != last {
                last = (state.status, state.violation_count);
                println!(
                    "  -> {:?}, {} violation(s), {}s left",
                    state.status, state.violation_count, state.remaining_seconds
                );
            }
        }
    });

    println!("Candidate stops sharing their screen...");
    tokio::time::sleep(Duration::from_secs(3)).await;
    scene.end_screen_share();
    let warned = handle.wait_for(|s| s.warning.is_some()).await?;
    if let Some(warning) = &warned.warning {
        println!("Warning shown: {} (resumable: {})", warning.kind, warning.resumable);
    }

    println!("Candidate acknowledges and shares again...");
    handle.acknowledge_warning().await?;
    handle
        .wait_for(|s| s.active_conditions.is_empty())
        .await?;

    println!("A second person walks into view...");
    tokio::time::sleep(Duration::from_secs(2)).await;
    scene.set_faces(vec![Default::default(), Default::default()]);
    let blocked = handle.blocked().await?;
    println!("Blocked with {} violation(s)", blocked.violation_count);

    let report = handle.finish().await?;
    println!();
    println!("Report for {}:", report.user_id);
    for event in &report.violations {
        println!("  - {} for {:.1}s", event.kind, event.duration_secs());
    }
    println!("Logged records: {}", log.len());
    println!("Artifacts captured: {}", artifacts.artifacts().len());
    println!();
    println!("{}", transparency.summary());

    Ok(())
}
