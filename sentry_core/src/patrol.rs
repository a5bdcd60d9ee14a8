//! Patrol state machine
//!
//! One cycle runs `Idle → Scanning → Deciding → Acting`. The emergency stop
//! moves the controller to `Stopped` from any phase; it stays there while
//! the stop line is asserted and resumes at `Idle` once it clears.

use crate::core::{Indicator, Interrupt, Node, SafetyGate, Tick};
use crate::decision::{decide, MovementAction};
use crate::error::{SentryError, SentryResult};
use crate::params::PatrolConfig;
use crate::power::{BatteryAlert, VoltageGate, VoltageStatus};
use crate::scanner::{ObstacleReport, RangeScanner};
use crossbeam::channel::RecvTimeoutError;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Square-patrol bookkeeping, owned by the patrol thread.
///
/// `move_counter` never exceeds `counter_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PatrolState {
    pub move_counter: u32,
    pub counter_limit: u32,
    pub active: bool,
}

impl PatrolState {
    pub fn new(counter_limit: u32) -> Self {
        Self {
            move_counter: 0,
            counter_limit: counter_limit.max(1),
            active: false,
        }
    }

    pub fn at_limit(&self) -> bool {
        self.move_counter >= self.counter_limit
    }

    /// Update the counter after `action` completed
    pub fn record(&mut self, action: MovementAction, corner_turn: bool) {
        match action {
            MovementAction::Forward => {
                self.move_counter = (self.move_counter + 1).min(self.counter_limit);
            }
            MovementAction::TurnRight if corner_turn => self.move_counter = 0,
            MovementAction::BackwardThenLeft => self.move_counter = 0,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PatrolPhase {
    Idle,
    Scanning,
    Deciding,
    Acting,
    Stopped,
}

impl fmt::Display for PatrolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatrolPhase::Idle => write!(f, "Idle"),
            PatrolPhase::Scanning => write!(f, "Scanning"),
            PatrolPhase::Deciding => write!(f, "Deciding"),
            PatrolPhase::Acting => write!(f, "Acting"),
            PatrolPhase::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Action chosen for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub action: MovementAction,
    /// The action is the scheduled corner of the square, not an avoidance move
    pub corner_turn: bool,
}

/// Choose the action for `report`.
///
/// At the counter limit a right turn is forced if the right bearing is
/// clear; otherwise the obstacle decision stands.
pub fn plan(state: &PatrolState, report: ObstacleReport) -> Plan {
    if state.at_limit() && !report.right {
        return Plan {
            action: MovementAction::TurnRight,
            corner_turn: true,
        };
    }
    Plan {
        action: decide(report),
        corner_turn: false,
    }
}

/// Counters reported at shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatrolStats {
    pub cycles: u64,
    pub forwards: u64,
    pub turns_left: u64,
    pub turns_right: u64,
    pub retreats: u64,
    pub stops: u64,
    pub corner_turns: u64,
    /// Four corner turns make one square
    pub squares: u64,
    pub scan_faults: u64,
    pub low_voltage_idles: u64,
    pub low_battery_alerts: u64,
    pub emergency_stops: u64,
}

impl PatrolStats {
    fn record(&mut self, plan: Plan) {
        match plan.action {
            MovementAction::Forward => self.forwards += 1,
            MovementAction::TurnLeft => self.turns_left += 1,
            MovementAction::TurnRight => self.turns_right += 1,
            MovementAction::BackwardThenLeft => self.retreats += 1,
            MovementAction::Stop => self.stops += 1,
        }
        if plan.corner_turn {
            self.corner_turns += 1;
            self.squares = self.corner_turns / 4;
        }
    }
}

/// Blinks the obstacle LED on a thread of its own so patrol never waits on it.
/// At most one blink run is in flight; triggers during a run are dropped.
struct ObstacleAlert {
    blinks: u32,
    interval: Duration,
    busy: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ObstacleAlert {
    fn new(config: &PatrolConfig) -> Self {
        Self {
            blinks: config.obstacle_alert_blinks,
            interval: Duration::from_millis(config.obstacle_alert_interval_ms),
            busy: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    fn trigger(&mut self, gate: &SafetyGate) {
        if self.blinks == 0 || !gate.port().has_obstacle_led() {
            return;
        }
        if self.busy.swap(true, Ordering::AcqRel) {
            log::debug!("[PATROL] obstacle alert already blinking");
            return;
        }
        if let Some(previous) = self.handle.take() {
            let _ = previous.join();
        }

        let gate = gate.clone();
        let busy = self.busy.clone();
        let blinks = self.blinks;
        let half = self.interval / 2;
        let spawned = std::thread::Builder::new()
            .name("obstacle-alert".into())
            .spawn(move || {
                let port = gate.port().clone();
                for _ in 0..blinks {
                    let step = port
                        .set_obstacle_led(true)
                        .and_then(|_| gate.hold(half))
                        .and_then(|_| port.set_obstacle_led(false))
                        .and_then(|_| gate.hold(half));
                    if step.is_err() {
                        break;
                    }
                }
                let _ = port.set_obstacle_led(false);
                busy.store(false, Ordering::Release);
            });

        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => {
                log::warn!("[PATROL] could not start obstacle alert: {}", e);
                self.busy.store(false, Ordering::Release);
            }
        }
    }

    fn finish(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub struct PatrolController {
    gate: SafetyGate,
    scanner: RangeScanner,
    voltage: VoltageGate,
    battery_alert: BatteryAlert,
    config: PatrolConfig,
    state: PatrolState,
    phase: PatrolPhase,
    stats: PatrolStats,
    obstacle_alert: ObstacleAlert,
}

impl PatrolController {
    pub fn new(
        gate: SafetyGate,
        scanner: RangeScanner,
        voltage: VoltageGate,
        battery_alert: BatteryAlert,
        config: PatrolConfig,
    ) -> Self {
        Self {
            gate,
            scanner,
            voltage,
            battery_alert,
            state: PatrolState::new(config.counter_limit),
            phase: PatrolPhase::Idle,
            stats: PatrolStats::default(),
            obstacle_alert: ObstacleAlert::new(&config),
            config,
        }
    }

    pub fn state(&self) -> &PatrolState {
        &self.state
    }

    pub fn phase(&self) -> PatrolPhase {
        self.phase
    }

    pub fn stats(&self) -> &PatrolStats {
        &self.stats
    }

    fn set_phase(&mut self, phase: PatrolPhase) {
        if self.phase != phase {
            log::debug!("[PATROL] {} -> {}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// One full cycle: voltage gate, scan, decide, act, pause
    pub fn run_cycle(&mut self) -> SentryResult<()> {
        if let VoltageStatus::Low(volts) = self.voltage.check() {
            self.stats.low_voltage_idles += 1;
            self.set_phase(PatrolPhase::Acting);
            self.apply(MovementAction::Stop)?;
            if self.battery_alert.sound(&self.gate, volts, Instant::now())? {
                self.stats.low_battery_alerts += 1;
            }
            return self
                .gate
                .hold(Duration::from_millis(self.config.low_voltage_idle_ms));
        }

        self.set_phase(PatrolPhase::Scanning);
        match self.scanner.scan(&self.gate) {
            Ok(report) => {
                self.step_with_report(report)?;
            }
            Err(e) if e.interrupt().is_some() => return Err(e),
            Err(e) => {
                log::warn!("[PATROL] scan failed ({}), stopping for this cycle", e);
                self.stats.scan_faults += 1;
                self.set_phase(PatrolPhase::Acting);
                self.apply(MovementAction::Stop)?;
                self.stats.stops += 1;
            }
        }

        self.gate
            .hold(Duration::from_millis(self.config.cycle_pause_ms))
    }

    /// Decide and act on an already-taken scan, updating the move counter
    pub fn step_with_report(&mut self, report: ObstacleReport) -> SentryResult<MovementAction> {
        self.set_phase(PatrolPhase::Deciding);
        if self.state.at_limit() && report.right {
            log::info!("[PATROL] corner due but right is blocked, avoiding instead");
        }
        let plan = plan(&self.state, report);

        self.set_phase(PatrolPhase::Acting);
        if plan.corner_turn {
            log::info!(
                "[PATROL] {} moves done, corner turn",
                self.state.counter_limit
            );
        } else if plan.action != MovementAction::Forward {
            log::info!("[PATROL] obstacle ahead, {}", plan.action);
            self.obstacle_alert.trigger(&self.gate);
        }

        self.apply(plan.action)?;
        self.state.record(plan.action, plan.corner_turn);
        self.stats.record(plan);
        log::info!(
            "[PATROL] {} done (moves {}/{})",
            plan.action,
            self.state.move_counter,
            self.state.counter_limit
        );
        Ok(plan.action)
    }

    /// Drive the indicator sequence for one action
    pub fn apply(&mut self, action: MovementAction) -> SentryResult<()> {
        self.gate.check()?;
        let port = self.gate.port().clone();
        match action {
            MovementAction::Forward => {
                port.set_indicators(true, true)?;
                self.gate
                    .hold(Duration::from_millis(self.config.forward_ms))?;
                port.set_indicators(false, false)
            }
            MovementAction::TurnLeft => self.turn(Indicator::Left),
            MovementAction::TurnRight => self.turn(Indicator::Right),
            MovementAction::BackwardThenLeft => {
                port.set_indicators(false, false)?;
                for _ in 0..self.config.backward_blinks {
                    port.toggle_indicators()?;
                    self.gate.hold(self.blink_interval())?;
                }
                port.set_indicators(false, false)?;
                self.gate.hold(self.turn_pause())?;
                self.turn(Indicator::Left)
            }
            MovementAction::Stop => port.set_indicators(false, false),
        }
    }

    fn turn(&self, which: Indicator) -> SentryResult<()> {
        let port = self.gate.port();
        port.set_indicators(false, false)?;
        for _ in 0..self.config.turn_blinks {
            port.toggle_indicator(which)?;
            self.gate.hold(self.blink_interval())?;
        }
        port.set_indicator(which, false)?;
        self.gate.hold(self.turn_pause())
    }

    fn blink_interval(&self) -> Duration {
        Duration::from_millis(self.config.blink_interval_ms)
    }

    fn turn_pause(&self) -> Duration {
        Duration::from_millis(self.config.turn_pause_ms)
    }

    fn enter_stopped(&mut self) {
        if self.phase != PatrolPhase::Stopped {
            self.stats.emergency_stops += 1;
            log::warn!("[PATROL] emergency stop, patrol halted");
        }
        self.state.active = false;
        self.set_phase(PatrolPhase::Stopped);
    }
}

impl Node for PatrolController {
    fn name(&self) -> &'static str {
        "PatrolController"
    }

    fn init(&mut self) -> SentryResult<()> {
        self.state.active = true;
        log::info!(
            "[PATROL] starting square patrol ({} moves per side)",
            self.state.counter_limit
        );
        Ok(())
    }

    fn tick(&mut self) -> SentryResult<Tick> {
        if self.gate.emergency_stop_active() {
            self.enter_stopped();
            return match self
                .gate
                .shutdown_receiver()
                .recv_timeout(self.gate.poll_interval())
            {
                Err(RecvTimeoutError::Timeout) => Ok(Tick::Continue),
                _ => Ok(Tick::Finished),
            };
        }
        if self.gate.shutdown_requested() {
            return Ok(Tick::Finished);
        }
        if self.phase == PatrolPhase::Stopped {
            log::info!("[PATROL] emergency stop cleared, resuming");
            self.state.active = true;
        }
        self.set_phase(PatrolPhase::Idle);

        match self.run_cycle() {
            Ok(()) => {}
            Err(e) => match e.interrupt() {
                Some(Interrupt::EmergencyStop) => {
                    self.enter_stopped();
                    return Ok(Tick::Continue);
                }
                _ => return Err(e),
            },
        }

        self.stats.cycles += 1;
        match self.config.max_cycles {
            Some(max) if self.stats.cycles >= max => {
                log::info!("[PATROL] completed {} cycles", self.stats.cycles);
                Ok(Tick::Finished)
            }
            _ => Ok(Tick::Continue),
        }
    }

    fn shutdown(&mut self) -> SentryResult<()> {
        self.obstacle_alert.finish();
        self.state.active = false;
        self.set_phase(PatrolPhase::Stopped);
        match self.gate.port().set_indicators(false, false) {
            Err(SentryError::Halted) => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(left: bool, center: bool, right: bool) -> ObstacleReport {
        ObstacleReport {
            left,
            center,
            right,
        }
    }

    #[test]
    fn test_forward_saturates_at_limit() {
        let mut state = PatrolState::new(5);
        for _ in 0..8 {
            state.record(MovementAction::Forward, false);
            assert!(state.move_counter <= state.counter_limit);
        }
        assert_eq!(state.move_counter, 5);
    }

    #[test]
    fn test_avoidance_turns_keep_counter() {
        let mut state = PatrolState::new(5);
        state.move_counter = 3;
        state.record(MovementAction::TurnLeft, false);
        state.record(MovementAction::TurnRight, false);
        state.record(MovementAction::Stop, false);
        assert_eq!(state.move_counter, 3);

        state.record(MovementAction::BackwardThenLeft, false);
        assert_eq!(state.move_counter, 0);
    }

    #[test]
    fn test_plan_forces_corner_when_right_clear() {
        let mut state = PatrolState::new(5);
        state.move_counter = 5;
        let p = plan(&state, report(false, false, false));
        assert_eq!(p.action, MovementAction::TurnRight);
        assert!(p.corner_turn);

        // Center blocked, right clear: still the corner turn
        let p = plan(&state, report(true, true, false));
        assert!(p.corner_turn);

        state.record(p.action, p.corner_turn);
        assert_eq!(state.move_counter, 0);
    }

    #[test]
    fn test_plan_falls_back_when_right_blocked() {
        let mut state = PatrolState::new(5);
        state.move_counter = 5;

        let p = plan(&state, report(false, false, true));
        assert_eq!(p.action, MovementAction::Forward);
        assert!(!p.corner_turn);

        let p = plan(&state, report(true, true, true));
        assert_eq!(p.action, MovementAction::BackwardThenLeft);
    }

    #[test]
    fn test_plan_below_limit_uses_decision() {
        let state = PatrolState::new(5);
        for bits in 0..8u8 {
            let r = report(bits & 4 != 0, bits & 2 != 0, bits & 1 != 0);
            let p = plan(&state, r);
            assert_eq!(p.action, decide(r));
            assert!(!p.corner_turn);
        }
    }

    #[test]
    fn test_squares_follow_corner_turns() {
        let mut stats = PatrolStats::default();
        let corner = Plan {
            action: MovementAction::TurnRight,
            corner_turn: true,
        };
        for _ in 0..9 {
            stats.record(corner);
        }
        assert_eq!(stats.corner_turns, 9);
        assert_eq!(stats.squares, 2);
        assert_eq!(stats.turns_right, 9);
    }

    #[test]
    fn test_zero_limit_is_raised_to_one() {
        assert_eq!(PatrolState::new(0).counter_limit, 1);
    }
}
