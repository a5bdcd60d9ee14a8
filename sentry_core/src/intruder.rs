//! Intruder alarm driven by motion events
//!
//! Events arrive on a channel fed by the motion source and are handled on
//! the monitor's own thread, in arrival order. While an alarm sequence runs,
//! the monitor keeps draining the channel between micro-steps: a new
//! `MotionStart` is absorbed and a `MotionEnd` silences the alarm at once.

use crate::core::{Interrupt, Node, SafetyGate, Tick};
use crate::error::{SentryError, SentryResult};
use crate::hal::MotionEvent;
use crate::params::AlarmConfig;
use chrono::{DateTime, Local};
use crossbeam::channel::{self, Receiver};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Alarm bookkeeping, owned by the monitor thread
#[derive(Debug, Clone, Default)]
pub struct AlarmState {
    pub active: bool,
    pub last_triggered_at: Option<Instant>,
    /// Wall-clock time of the last trigger, for reports
    pub last_triggered_wall: Option<DateTime<Local>>,
}

impl AlarmState {
    /// A new sequence may start once `cooldown` has passed since the last one
    pub fn can_trigger(&self, now: Instant, cooldown: Duration) -> bool {
        match self.last_triggered_at {
            Some(last) => now.saturating_duration_since(last) >= cooldown,
            None => true,
        }
    }
}

/// Counters reported at shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntruderStats {
    pub motion_starts: u64,
    pub motion_ends: u64,
    pub sequences_started: u64,
    pub sequences_completed: u64,
    /// Starts ignored because the cooldown had not elapsed
    pub debounced: u64,
    /// Starts arriving while a sequence was already running
    pub absorbed: u64,
    pub interrupted: u64,
}

pub struct IntruderMonitor {
    events: Receiver<MotionEvent>,
    gate: SafetyGate,
    config: AlarmConfig,
    state: AlarmState,
    stats: IntruderStats,
}

impl IntruderMonitor {
    pub fn new(events: Receiver<MotionEvent>, gate: SafetyGate, config: AlarmConfig) -> Self {
        Self {
            events,
            gate,
            config,
            state: AlarmState::default(),
            stats: IntruderStats::default(),
        }
    }

    pub fn alarm_state(&self) -> &AlarmState {
        &self.state
    }

    pub fn stats(&self) -> &IntruderStats {
        &self.stats
    }

    /// React to one motion event observed at `now`.
    ///
    /// A `MotionStart` outside the cooldown runs the full alarm sequence on
    /// the calling thread. Only a shutdown is returned as an error.
    pub fn handle_event(&mut self, event: MotionEvent, now: Instant) -> SentryResult<()> {
        match event {
            MotionEvent::MotionStart => {
                self.stats.motion_starts += 1;
                if !self.state.can_trigger(now, self.config.cooldown()) {
                    self.stats.debounced += 1;
                    log::debug!("[ALARM] motion within cooldown, ignored");
                    return Ok(());
                }
                self.state.active = true;
                self.state.last_triggered_at = Some(now);
                self.state.last_triggered_wall = Some(Local::now());
                self.stats.sequences_started += 1;
                self.run_sequence()
            }
            MotionEvent::MotionEnd => {
                self.stats.motion_ends += 1;
                log::info!("[ALARM] motion ended");
                self.silence(true)
            }
        }
    }

    fn run_sequence(&mut self) -> SentryResult<()> {
        if let Some(when) = self.state.last_triggered_wall {
            log::warn!(
                "[ALARM] *** INTRUDER DETECTED *** at {} (sequence #{})",
                when.format("%H:%M:%S"),
                self.stats.sequences_started
            );
        }

        let result = self.flash();
        match result {
            Ok(()) => {
                self.stats.sequences_completed += 1;
                log::info!("[ALARM] alarm sequence finished");
                let motion_ended = !self.state.active;
                self.state.active = false;
                self.silence(motion_ended)
            }
            Err(e) => match e.interrupt() {
                Some(why) => {
                    self.stats.interrupted += 1;
                    self.state.active = false;
                    log::warn!("[ALARM] alarm sequence cut short by {}", why);
                    if why == Interrupt::Shutdown {
                        Err(e)
                    } else {
                        Ok(())
                    }
                }
                None => {
                    log::error!("[ALARM] alarm output fault: {}", e);
                    self.silence(true)
                }
            },
        }
    }

    fn flash(&mut self) -> SentryResult<()> {
        let port = self.gate.port().clone();
        self.gate.check()?;
        port.set_spotlight(true)?;

        for _ in 0..self.config.flash_count {
            if !self.state.active {
                break;
            }
            self.gate.check()?;
            port.set_alarm(self.config.level)?;
            port.set_indicators(true, true)?;
            self.wait_step()?;

            if !self.state.active {
                break;
            }
            self.gate.check()?;
            port.set_alarm(0.0)?;
            port.toggle_indicators()?;
            self.wait_step()?;
        }
        Ok(())
    }

    /// Wait one micro-step while servicing incoming events
    fn wait_step(&mut self) -> SentryResult<()> {
        let mut events = self.events.clone();
        let shutdown = self.gate.shutdown_receiver().clone();
        let deadline = Instant::now() + self.config.step();

        loop {
            let mut source_closed = false;
            self.gate.check()?;
            let now = Instant::now();
            if now >= deadline || !self.state.active {
                return Ok(());
            }
            let slice = (deadline - now).min(self.gate.poll_interval());

            channel::select! {
                recv(events) -> msg => match msg {
                    Ok(MotionEvent::MotionStart) => {
                        self.stats.motion_starts += 1;
                        self.stats.absorbed += 1;
                        log::debug!("[ALARM] motion start absorbed by running sequence");
                    }
                    Ok(MotionEvent::MotionEnd) => {
                        self.stats.motion_ends += 1;
                        self.state.active = false;
                        log::info!("[ALARM] motion ended during alarm");
                    }
                    Err(_) => source_closed = true,
                },
                recv(shutdown) -> _ => {
                    return Err(SentryError::Interrupted(Interrupt::Shutdown));
                }
                default(slice) => {}
            }
            if source_closed {
                events = channel::never();
            }
        }
    }

    /// Alarm off and indicators dark; the spotlight goes off only when motion
    /// has actually ended. Writes refused by a halted port are fine: a halt
    /// has already driven everything dark.
    fn silence(&mut self, motion_ended: bool) -> SentryResult<()> {
        if motion_ended {
            self.state.active = false;
        }
        let port = self.gate.port();
        let mut result = port
            .set_alarm(0.0)
            .and_then(|_| port.set_indicators(false, false));
        if motion_ended {
            result = result.and_then(|_| port.set_spotlight(false));
        }
        match result {
            Err(SentryError::Halted) => Ok(()),
            other => other,
        }
    }
}

impl Node for IntruderMonitor {
    fn name(&self) -> &'static str {
        "IntruderMonitor"
    }

    fn tick(&mut self) -> SentryResult<Tick> {
        let events = self.events.clone();
        let shutdown = self.gate.shutdown_receiver().clone();

        channel::select! {
            recv(events) -> msg => match msg {
                Ok(event) => {
                    self.handle_event(event, Instant::now())?;
                    Ok(Tick::Continue)
                }
                Err(_) => {
                    log::info!("[ALARM] motion source closed, waiting for shutdown");
                    let _ = shutdown.recv();
                    Ok(Tick::Finished)
                }
            },
            recv(shutdown) -> _ => Ok(Tick::Finished),
            default(self.gate.poll_interval()) => {
                self.gate.emergency_stop_active();
                Ok(Tick::Continue)
            }
        }
    }

    fn shutdown(&mut self) -> SentryResult<()> {
        self.silence(true)
    }
}
