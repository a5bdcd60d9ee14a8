//! Lifecycle owner for the patrol and intruder nodes
//!
//! `Supervisor::new` brings the hardware to its safe default and wires the
//! motion source to the intruder queue; any failure there refuses startup.
//! `Supervisor::run` drives the intruder monitor on its own thread and the
//! patrol controller on the caller's thread, then performs the shutdown
//! cleanup regardless of how patrol ended.

use crate::core::{
    run_node, ActuatorOutputs, ActuatorPort, ActuatorSnapshot, HaltReason, NodeState, SafetyGate,
    ShutdownHandle,
};
use crate::error::{SentryError, SentryResult};
use crate::hal::sim::{OutputId, SimWorld};
use crate::hal::{
    BearingActuator, BinaryOutput, EmergencyStopSignal, MotionSink, MotionSource, PwmOutput,
    RangeFinder, VoltageSensor,
};
use crate::intruder::{IntruderMonitor, IntruderStats};
use crate::params::SentryConfig;
use crate::patrol::{PatrolController, PatrolStats};
use crate::power::{BatteryAlert, VoltageGate};
use crate::scanner::RangeScanner;
use chrono::{DateTime, Local};
use crossbeam::channel;
use serde::Serialize;
use std::sync::Arc;

/// Every driver the core needs, built by the caller
pub struct Drivers {
    pub range_finder: Box<dyn RangeFinder>,
    pub bearing: Box<dyn BearingActuator>,
    pub left_indicator: Box<dyn BinaryOutput>,
    pub right_indicator: Box<dyn BinaryOutput>,
    pub alarm: Box<dyn PwmOutput>,
    pub voltage: Box<dyn VoltageSensor>,
    pub motion: Box<dyn MotionSource>,
    pub emergency_stop: Arc<dyn EmergencyStopSignal>,
    pub spotlight: Option<Box<dyn BinaryOutput>>,
    pub obstacle_led: Option<Box<dyn BinaryOutput>>,
}

impl Drivers {
    /// Full driver set backed by a simulated world, optional outputs included
    pub fn simulated(world: &SimWorld) -> Self {
        Self {
            range_finder: Box::new(world.range_finder()),
            bearing: Box::new(world.bearing()),
            left_indicator: Box::new(world.output(OutputId::LeftIndicator)),
            right_indicator: Box::new(world.output(OutputId::RightIndicator)),
            alarm: Box::new(world.alarm()),
            voltage: Box::new(world.voltage_sensor()),
            motion: Box::new(world.motion_source()),
            emergency_stop: world.emergency_stop(),
            spotlight: Some(Box::new(world.output(OutputId::Spotlight))),
            obstacle_led: Some(Box::new(world.output(OutputId::ObstacleLed))),
        }
    }
}

/// What a finished run reports
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub patrol_state: String,
    pub intruder_state: String,
    pub patrol: PatrolStats,
    pub intruder: IntruderStats,
    pub final_outputs: ActuatorSnapshot,
}

impl RunSummary {
    /// Both nodes stopped without error
    pub fn is_clean(&self) -> bool {
        let stopped = NodeState::Stopped.to_string();
        self.patrol_state == stopped && self.intruder_state == stopped
    }

    pub fn to_json(&self) -> SentryResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub struct Supervisor {
    port: Arc<ActuatorPort>,
    shutdown: ShutdownHandle,
    patrol: PatrolController,
    intruder: IntruderMonitor,
    motion: Box<dyn MotionSource>,
}

impl Supervisor {
    pub fn new(config: SentryConfig, drivers: Drivers) -> SentryResult<Self> {
        config.validate()?;

        let port = Arc::new(ActuatorPort::new(
            ActuatorOutputs {
                bearing: drivers.bearing,
                left_indicator: drivers.left_indicator,
                right_indicator: drivers.right_indicator,
                alarm: drivers.alarm,
                spotlight: drivers.spotlight,
                obstacle_led: drivers.obstacle_led,
            },
            config.scan.center_angle,
        ));
        port.initialize().map_err(|e| {
            log::error!("Failed to drive outputs to their safe default: {}", e);
            SentryError::HardwareConnect(format!("actuator initialization failed: {}", e))
        })?;

        let (shutdown, shutdown_rx) = ShutdownHandle::new();
        let gate = SafetyGate::new(
            drivers.emergency_stop,
            port.clone(),
            shutdown_rx,
            config.safety.poll_interval(),
        );

        let (event_tx, event_rx) = channel::bounded(config.alarm.event_queue.max(1));
        let mut motion = drivers.motion;
        motion.subscribe(MotionSink::new(event_tx)).map_err(|e| {
            log::error!("Failed to subscribe to the motion source: {}", e);
            SentryError::HardwareConnect(format!("motion source unavailable: {}", e))
        })?;

        let patrol = PatrolController::new(
            gate.clone(),
            RangeScanner::new(drivers.range_finder, config.scan.clone()),
            VoltageGate::new(drivers.voltage, config.power.clone()),
            BatteryAlert::new(&config.power),
            config.patrol.clone(),
        );
        let intruder = IntruderMonitor::new(event_rx, gate, config.alarm.clone());

        log::info!("Sentry initialized, outputs at safe default");
        Ok(Self {
            port,
            shutdown,
            patrol,
            intruder,
            motion,
        })
    }

    /// Handle for requesting shutdown from another thread or a signal handler
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn port(&self) -> &Arc<ActuatorPort> {
        &self.port
    }

    /// Run until patrol finishes or shutdown is requested
    pub fn run(self) -> SentryResult<RunSummary> {
        let Supervisor {
            port,
            shutdown,
            mut patrol,
            mut intruder,
            motion,
        } = self;
        let started_at = Local::now();

        let intruder_thread = std::thread::Builder::new()
            .name("intruder".into())
            .spawn(move || {
                let state = run_node(&mut intruder);
                (state, intruder.stats().clone())
            })?;

        let patrol_state = run_node(&mut patrol);

        shutdown.shutdown();
        let joined = intruder_thread.join();
        drop(motion);

        if let Err(e) = port.halt(HaltReason::Shutdown) {
            log::error!("Shutdown cleanup failed: {}", e);
        }

        let (intruder_state, intruder_stats) = joined
            .map_err(|_| SentryError::Internal("intruder thread panicked".into()))?;

        let summary = RunSummary {
            started_at,
            finished_at: Local::now(),
            patrol_state: patrol_state.to_string(),
            intruder_state: intruder_state.to_string(),
            patrol: patrol.stats().clone(),
            intruder: intruder_stats,
            final_outputs: port.snapshot(),
        };
        log::info!(
            "Sentry stopped: patrol {}, intruder {}",
            summary.patrol_state,
            summary.intruder_state
        );
        Ok(summary)
    }
}
