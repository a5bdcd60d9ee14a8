/// Whole-robot runs: patrol and intruder nodes under one supervisor
use sentry_core::hal::sim::{OutputId, OutputWrite, SimWorld};
use sentry_core::{Drivers, MotionEvent, SentryConfig, SentryError, Supervisor};
use std::time::{Duration, Instant};

fn fast_config() -> SentryConfig {
    let mut config = SentryConfig::default();
    config.scan.settle_ms = 1;
    config.patrol.forward_ms = 2;
    config.patrol.turn_blinks = 2;
    config.patrol.blink_interval_ms = 1;
    config.patrol.turn_pause_ms = 1;
    config.patrol.backward_blinks = 2;
    config.patrol.cycle_pause_ms = 1;
    config.patrol.obstacle_alert_interval_ms = 2;
    config.alarm.flash_count = 2;
    config.alarm.step_ms = 2;
    config.safety.poll_interval_ms = 1;
    config
}

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[test]
fn test_bounded_run_cleans_up() {
    let world = SimWorld::new();
    let mut config = fast_config();
    config.patrol.max_cycles = Some(2);

    let supervisor = Supervisor::new(config, Drivers::simulated(&world)).unwrap();
    let summary = supervisor.run().unwrap();

    assert!(summary.is_clean());
    assert_eq!(summary.patrol.cycles, 2);
    assert_eq!(summary.patrol.forwards, 2);
    assert!(summary.final_outputs.is_safe());
    assert!(summary.to_json().unwrap().contains("\"forwards\": 2"));

    let state = world.state();
    assert!(state.is_safe());
    assert_eq!(state.bearing_angle, 90.0);
    assert_eq!(state.writes.last(), Some(&OutputWrite::Binary(OutputId::ObstacleLed, false)));
}

#[test]
fn test_motion_raises_alarm_during_patrol() {
    let world = SimWorld::new();
    let config = fast_config();
    let level = config.alarm.level;

    let supervisor = Supervisor::new(config, Drivers::simulated(&world)).unwrap();
    let handle = supervisor.shutdown_handle();

    let driver = {
        let world = world.clone();
        std::thread::spawn(move || {
            assert!(world.fire_motion(MotionEvent::MotionStart));
            assert!(wait_for(Duration::from_secs(5), || world
                .state()
                .writes
                .contains(&OutputWrite::Alarm(level))));
            // Second start inside the cooldown
            assert!(world.fire_motion(MotionEvent::MotionStart));
            std::thread::sleep(Duration::from_millis(100));
            handle.shutdown();
        })
    };

    let summary = supervisor.run().unwrap();
    driver.join().unwrap();

    assert!(summary.is_clean());
    assert_eq!(summary.intruder.motion_starts, 2);
    assert_eq!(summary.intruder.sequences_started, 1);
    assert_eq!(summary.intruder.debounced + summary.intruder.absorbed, 1);
    assert!(world.state().is_safe());
}

#[test]
fn test_emergency_stop_silences_alarm() {
    let world = SimWorld::new();
    let mut config = fast_config();
    config.alarm.flash_count = 10_000;
    config.alarm.step_ms = 5;
    let level = config.alarm.level;

    let supervisor = Supervisor::new(config, Drivers::simulated(&world)).unwrap();
    let handle = supervisor.shutdown_handle();

    let driver = {
        let world = world.clone();
        std::thread::spawn(move || {
            world.fire_motion(MotionEvent::MotionStart);
            assert!(wait_for(Duration::from_secs(5), || world
                .state()
                .writes
                .contains(&OutputWrite::Alarm(level))));

            world.set_emergency_stop(true);
            assert!(wait_for(Duration::from_secs(1), || world.state().is_safe()));
            std::thread::sleep(Duration::from_millis(30));
            // Nothing lands while the stop is asserted
            assert!(world.state().is_safe());

            world.set_emergency_stop(false);
            handle.shutdown();
        })
    };

    let summary = supervisor.run().unwrap();
    driver.join().unwrap();

    assert_eq!(summary.intruder.interrupted, 1);
    assert_eq!(summary.intruder.sequences_completed, 0);
    assert!(summary.patrol.emergency_stops >= 1);
    assert!(world.state().is_safe());
}

#[test]
fn test_bearing_fault_refuses_startup() {
    let world = SimWorld::new();
    world.fail_bearing(true);

    match Supervisor::new(fast_config(), Drivers::simulated(&world)) {
        Err(SentryError::HardwareConnect(_)) => {}
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("startup should have failed"),
    }
}

#[test]
fn test_invalid_config_refuses_startup() {
    let world = SimWorld::new();
    let mut config = fast_config();
    config.alarm.level = 1.5;

    assert!(matches!(
        Supervisor::new(config, Drivers::simulated(&world)),
        Err(SentryError::Config(_))
    ));
}

#[test]
fn test_sample_config_loads() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/sentry.yaml");
    let config = SentryConfig::load(&path).unwrap();
    assert_eq!(config, SentryConfig::default());
}
