//! Integration tests driving full sessions against simulated devices.

use proctor_engine::report::{ArtifactKind, MemoryArtifactStore, MemoryViolationLog};
use proctor_engine::scenario::{Scenario, Step};
use proctor_engine::sensor::simulated::{
    SimulatedCamera, SimulatedFace, SimulatedMicrophone, SimulatedScene, SimulatedScreen,
};
use proctor_engine::transparency::create_shared_log;
use proctor_engine::{
    Config, ProctorSession, SensorError, SensorKind, SensorReading, SensorStatus, SessionStatus,
    ViolationKind,
};
use std::sync::Arc;
use std::time::Duration;

type SimulatedSession = ProctorSession<SimulatedCamera, SimulatedMicrophone, SimulatedScreen>;

fn build(scene: &SimulatedScene, config: Config, log: &Arc<MemoryViolationLog>) -> SimulatedSession {
    ProctorSession::new(
        "candidate-1",
        config,
        scene.camera(),
        scene.microphone(),
        scene.screen(),
        scene.detector(),
    )
    .with_violation_log(log.clone())
}

fn assert_all_released(scene: &SimulatedScene) {
    for kind in SensorKind::ALL {
        assert_eq!(scene.live_streams(kind), 0, "{kind} stream left open");
    }
}

#[tokio::test(start_paused = true)]
async fn test_second_violation_blocks_and_releases_sensors() {
    let scene = SimulatedScene::new();
    let log = Arc::new(MemoryViolationLog::new());
    let handle = build(&scene, Config::default(), &log).start().await.unwrap();
    assert_eq!(handle.state().status, SessionStatus::Active);

    scene.set_faces(vec![SimulatedFace::turned(0.6)]);
    let warned = handle.wait_for(|s| s.status == SessionStatus::Warned).await.unwrap();
    assert_eq!(warned.violation_count, 1);
    assert_eq!(warned.warning.as_ref().map(|w| w.kind), Some(ViolationKind::LookingAway));
    assert_eq!(
        handle.latest_reading(SensorKind::Camera),
        Some(SensorReading::Face {
            face_count: 1,
            looking_away: true
        })
    );

    scene.set_noise(120);
    let blocked = handle.blocked().await.unwrap();
    assert_eq!(blocked.violation_count, 2);
    assert!(blocked.warning.is_none());
    for kind in SensorKind::ALL {
        assert!(!blocked.sensors[&kind].is_active(), "{kind} still active");
    }
    assert_all_released(&scene);
    // Released sensors fall back to neutral verdicts.
    assert_eq!(
        handle.latest_reading(SensorKind::Microphone),
        Some(SensorReading::neutral(SensorKind::Microphone))
    );

    let report = handle.finish().await.unwrap();
    assert_eq!(report.final_state.status, SessionStatus::Blocked);
    let mut kinds: Vec<ViolationKind> = report.violations.iter().map(|v| v.kind).collect();
    kinds.sort();
    assert_eq!(kinds, vec![ViolationKind::LookingAway, ViolationKind::HighNoise]);
    assert_eq!(log.len(), 2);
    for event in &report.violations {
        assert!(event.window_end >= event.window_start);
    }
}

#[tokio::test(start_paused = true)]
async fn test_time_expiry_blocks_clean_session() {
    let scene = SimulatedScene::new();
    let log = Arc::new(MemoryViolationLog::new());
    let config = Config {
        session_duration: Duration::from_secs(3),
        ..Config::default()
    };
    let handle = build(&scene, config, &log).start().await.unwrap();

    let blocked = handle.blocked().await.unwrap();
    assert_eq!(blocked.violation_count, 1);
    assert_eq!(blocked.remaining_seconds, 0);
    assert!(blocked.active_conditions.contains(&ViolationKind::TimeExpired));
    assert_all_released(&scene);

    let report = handle.finish().await.unwrap();
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].kind, ViolationKind::TimeExpired);
    assert_eq!(log.records()[0].kind, ViolationKind::TimeExpired);
}

#[tokio::test(start_paused = true)]
async fn test_countdown_is_published() {
    let scene = SimulatedScene::new();
    let log = Arc::new(MemoryViolationLog::new());
    let config = Config {
        session_duration: Duration::from_secs(60),
        ..Config::default()
    };
    let handle = build(&scene, config, &log).start().await.unwrap();
    assert_eq!(handle.state().remaining_seconds, 60);

    let later = handle.wait_for(|s| s.remaining_seconds <= 55).await.unwrap();
    assert_eq!(later.status, SessionStatus::Active);
    handle.finish().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_screen_share_warning_can_be_resumed() {
    let scene = SimulatedScene::new();
    let log = Arc::new(MemoryViolationLog::new());
    let handle = build(&scene, Config::default(), &log).start().await.unwrap();
    assert_eq!(scene.acquisitions(SensorKind::ScreenShare), 1);

    assert!(scene.end_screen_share());
    let warned = handle
        .wait_for(|s| s.warning.is_some() && !s.sensors[&SensorKind::ScreenShare].is_active())
        .await
        .unwrap();
    let warning = warned.warning.unwrap();
    assert_eq!(warning.kind, ViolationKind::ScreenShareStopped);
    assert!(warning.resumable);
    assert_eq!(scene.live_streams(SensorKind::ScreenShare), 0);

    let acknowledged = handle.acknowledge_warning().await.unwrap();
    assert_eq!(acknowledged.map(|n| n.kind), Some(ViolationKind::ScreenShareStopped));

    let resumed = handle
        .wait_for(|s| {
            s.sensors[&SensorKind::ScreenShare] == SensorStatus::Active && s.active_conditions.is_empty()
        })
        .await
        .unwrap();
    assert_eq!(resumed.status, SessionStatus::Warned);
    assert_eq!(resumed.violation_count, 1);
    assert!(resumed.warning.is_none());
    assert_eq!(scene.acquisitions(SensorKind::ScreenShare), 2);

    // Sharing stopped a second time is the second strike.
    assert!(scene.end_screen_share());
    let blocked = handle.blocked().await.unwrap();
    assert_eq!(blocked.violation_count, 2);

    let report = handle.finish().await.unwrap();
    assert!(report
        .violations
        .iter()
        .all(|v| v.kind == ViolationKind::ScreenShareStopped));
    assert_eq!(report.violations.len(), 2);
    assert_all_released(&scene);
}

#[tokio::test(start_paused = true)]
async fn test_readings_after_block_are_ignored() {
    let scene = SimulatedScene::new();
    let log = Arc::new(MemoryViolationLog::new());
    let handle = build(&scene, Config::default(), &log).start().await.unwrap();

    scene.set_faces(Vec::new());
    scene.set_noise(127);
    let blocked = handle.blocked().await.unwrap();
    assert_eq!(blocked.violation_count, 2);

    handle.set_page_hidden(true).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    let after = handle.state();
    assert_eq!(after.status, SessionStatus::Blocked);
    assert_eq!(after.violation_count, 2);
    assert!(!after.active_conditions.contains(&ViolationKind::TabSwitch));
    assert_eq!(handle.acknowledge_warning().await.unwrap(), None);

    handle.finish().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_detector_failure_is_not_a_violation() {
    let scene = SimulatedScene::new();
    scene.set_detector_fails(true);
    scene.set_faces(Vec::new());
    let log = Arc::new(MemoryViolationLog::new());
    let handle = build(&scene, Config::default(), &log).start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    let state = handle.state();
    assert_eq!(state.status, SessionStatus::Active);
    assert_eq!(state.violation_count, 0);

    let report = handle.finish().await.unwrap();
    assert!(report.violations.is_empty());
    assert!(log.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_artifacts_are_uploaded() {
    let scene = SimulatedScene::new();
    let log = Arc::new(MemoryViolationLog::new());
    let artifacts = Arc::new(MemoryArtifactStore::new());
    let config = Config {
        screenshot_interval: Duration::from_secs(5),
        ..Config::default()
    };
    let handle = build(&scene, config, &log)
        .with_uploader(artifacts.clone())
        .start()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(16)).await;
    handle.finish().await.unwrap();

    assert_eq!(artifacts.count(ArtifactKind::ReferencePhoto), 1);
    assert_eq!(artifacts.count(ArtifactKind::Screenshot), 3);
    assert!(artifacts
        .artifacts()
        .iter()
        .all(|a| a.user_id == "candidate-1"));
}

#[tokio::test(start_paused = true)]
async fn test_permission_prompt_delays_start() {
    let scene = SimulatedScene::new();
    scene.set_permission_delay(Duration::from_secs(4));
    let log = Arc::new(MemoryViolationLog::new());
    let config = Config {
        session_duration: Duration::from_secs(30),
        ..Config::default()
    };

    let started = tokio::time::Instant::now();
    let handle = build(&scene, config, &log).start().await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(4));
    // The clock only starts once preflight completes.
    assert_eq!(handle.state().remaining_seconds, 30);
    handle.finish().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_behaviour_during_permission_prompts_does_not_count() {
    let scene = SimulatedScene::new();
    scene.set_prompt_delay(SensorKind::ScreenShare, Duration::from_secs(10));
    // The candidate leaves the camera while the screen-share prompt is open.
    scene.set_faces(Vec::new());
    let restore = {
        let scene = scene.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            scene.set_faces(vec![SimulatedFace::facing_screen()]);
        })
    };
    let log = Arc::new(MemoryViolationLog::new());

    let handle = build(&scene, Config::default(), &log).start().await.unwrap();
    restore.await.unwrap();
    let state = handle.state();
    assert_eq!(state.status, SessionStatus::Active);
    assert_eq!(state.violation_count, 0);

    tokio::time::sleep(Duration::from_secs(3)).await;
    let state = handle.state();
    assert_eq!(state.violation_count, 0);
    assert!(state.active_conditions.is_empty());

    let report = handle.finish().await.unwrap();
    assert!(report.violations.is_empty());
    assert!(log.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dead_camera_is_a_status_not_a_violation() {
    let scene = SimulatedScene::new();
    let log = Arc::new(MemoryViolationLog::new());
    let transparency = create_shared_log();
    let handle = build(&scene, Config::default(), &log)
        .with_transparency(transparency.clone())
        .start()
        .await
        .unwrap();

    scene.set_capture_error(SensorKind::Camera, Some(SensorError::Interrupted));
    let state = handle
        .wait_for(|s| !s.sensors[&SensorKind::Camera].is_active())
        .await
        .unwrap();
    assert_eq!(
        state.sensors[&SensorKind::Camera],
        SensorStatus::Failed {
            error: SensorError::Interrupted
        }
    );
    assert_eq!(state.status, SessionStatus::Active);
    assert_eq!(state.violation_count, 0);
    assert_eq!(scene.live_streams(SensorKind::Camera), 0);
    assert_eq!(transparency.stats().sensor_failures, 1);
    assert_eq!(
        handle.latest_reading(SensorKind::Camera),
        Some(SensorReading::neutral(SensorKind::Camera))
    );

    // The other sensors keep sampling.
    scene.set_noise(120);
    let warned = handle.wait_for(|s| s.status == SessionStatus::Warned).await.unwrap();
    assert_eq!(warned.warning.map(|w| w.kind), Some(ViolationKind::HighNoise));
    handle.finish().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_demo_scenario_replay() {
    let scene = SimulatedScene::new();
    let scenario = Scenario::demo();
    scenario.prepare(&scene);
    let log = Arc::new(MemoryViolationLog::new());
    let handle = build(&scene, Config::default(), &log).start().await.unwrap();

    scenario.play(&scene, &handle).await.unwrap();
    let blocked = handle.blocked().await.unwrap();
    assert_eq!(blocked.violation_count, 2);

    let report = handle.finish().await.unwrap();
    let kinds: Vec<ViolationKind> = report.violations.iter().map(|v| v.kind).collect();
    assert!(kinds.contains(&ViolationKind::LookingAway));
    assert!(kinds.contains(&ViolationKind::HighNoise));
}

#[tokio::test(start_paused = true)]
async fn test_scenario_finish_step_stops_replay() {
    let scene = SimulatedScene::new();
    let scenario = Scenario {
        name: "stops early".to_string(),
        permissions: Default::default(),
        permission_delay_ms: 0,
        steps: vec![Step::Finish, Step::PageHidden { hidden: true }],
    };
    let log = Arc::new(MemoryViolationLog::new());
    let handle = build(&scene, Config::default(), &log).start().await.unwrap();

    scenario.play(&scene, &handle).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.state().violation_count, 0);
    handle.finish().await.unwrap();
}
