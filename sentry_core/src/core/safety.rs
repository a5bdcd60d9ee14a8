//! Emergency stop and shutdown checks shared by every loop
//!
//! Both the patrol loop and the alarm sequence wait through
//! [`SafetyGate::hold`], which slices each wait into poll intervals and
//! checks the stop line and the shutdown channel between slices.

use super::actuator::{ActuatorPort, HaltReason};
use crate::error::{SentryError, SentryResult};
use crate::hal::EmergencyStopSignal;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reason a blocking sequence was cut short
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interrupt {
    Shutdown,
    EmergencyStop,
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Shutdown => write!(f, "shutdown"),
            Interrupt::EmergencyStop => write!(f, "emergency stop"),
        }
    }
}

/// Requests an orderly shutdown of every loop.
///
/// Dropping the held sender disconnects the channel, which wakes every
/// receiver blocked in a timed wait at once.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<Mutex<Option<Sender<()>>>>,
}

impl ShutdownHandle {
    pub fn new() -> (Self, Receiver<()>) {
        let (tx, rx) = channel::bounded(0);
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    pub fn shutdown(&self) {
        if self.tx.lock().take().is_some() {
            log::info!("Shutdown requested");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// Stop/shutdown checkpoint handed to every component that writes outputs
#[derive(Clone)]
pub struct SafetyGate {
    estop: Arc<dyn EmergencyStopSignal>,
    port: Arc<ActuatorPort>,
    shutdown: Receiver<()>,
    poll_interval: Duration,
}

impl SafetyGate {
    pub fn new(
        estop: Arc<dyn EmergencyStopSignal>,
        port: Arc<ActuatorPort>,
        shutdown: Receiver<()>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            estop,
            port,
            shutdown,
            poll_interval,
        }
    }

    pub fn port(&self) -> &Arc<ActuatorPort> {
        &self.port
    }

    pub fn shutdown_receiver(&self) -> &Receiver<()> {
        &self.shutdown
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn shutdown_requested(&self) -> bool {
        !matches!(self.shutdown.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sample the stop line, halting or releasing the port to match.
    ///
    /// The stop is level-latched: the port stays halted for as long as the
    /// line is asserted and is released on the first check after it clears.
    pub fn emergency_stop_active(&self) -> bool {
        if self.estop.is_asserted() {
            if self.port.halted().is_none() {
                log::warn!("EMERGENCY STOP asserted - halting all outputs");
            }
            if let Err(e) = self.port.halt(HaltReason::EmergencyStop) {
                log::error!("Failed to drive outputs safe on emergency stop: {}", e);
            }
            true
        } else {
            if self.port.resume() {
                log::info!("Emergency stop cleared");
            }
            false
        }
    }

    /// Fail with `Interrupted` if a stop or shutdown is pending
    pub fn check(&self) -> SentryResult<()> {
        if self.emergency_stop_active() {
            return Err(SentryError::Interrupted(Interrupt::EmergencyStop));
        }
        if self.shutdown_requested() {
            return Err(SentryError::Interrupted(Interrupt::Shutdown));
        }
        Ok(())
    }

    /// Wait for `duration`, returning early with `Interrupted` within one
    /// poll interval of a stop or shutdown.
    pub fn hold(&self, duration: Duration) -> SentryResult<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let slice = (deadline - now).min(self.poll_interval);
            match self.shutdown.recv_timeout(slice) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return Err(SentryError::Interrupted(Interrupt::Shutdown)),
            }
        }
    }
}
