use crate::error::{SentryError, SentryResult};
use crate::hal::{BearingActuator, BinaryOutput, PwmOutput, MAX_ANGLE, MIN_ANGLE};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Movement indicator selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Left,
    Right,
}

/// Why the port stopped accepting writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    EmergencyStop,
    Shutdown,
}

/// Last values successfully written to the physical outputs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActuatorSnapshot {
    pub bearing_angle: f64,
    /// False once the bearing is released (no holding torque)
    pub bearing_engaged: bool,
    pub left_indicator: bool,
    pub right_indicator: bool,
    pub alarm_level: f64,
    pub spotlight: bool,
    pub obstacle_led: bool,
}

impl ActuatorSnapshot {
    /// Centered and released bearing, everything else off
    pub fn safe(center_angle: f64) -> Self {
        Self {
            bearing_angle: center_angle,
            bearing_engaged: false,
            left_indicator: false,
            right_indicator: false,
            alarm_level: 0.0,
            spotlight: false,
            obstacle_led: false,
        }
    }

    /// True when nothing is driven (bearing angle is not considered)
    pub fn is_safe(&self) -> bool {
        !self.bearing_engaged
            && !self.left_indicator
            && !self.right_indicator
            && self.alarm_level == 0.0
            && !self.spotlight
            && !self.obstacle_led
    }
}

/// Drivers owned by the port
pub struct ActuatorOutputs {
    pub bearing: Box<dyn BearingActuator>,
    pub left_indicator: Box<dyn BinaryOutput>,
    pub right_indicator: Box<dyn BinaryOutput>,
    pub alarm: Box<dyn PwmOutput>,
    pub spotlight: Option<Box<dyn BinaryOutput>>,
    pub obstacle_led: Option<Box<dyn BinaryOutput>>,
}

struct PortInner {
    outputs: ActuatorOutputs,
    snapshot: ActuatorSnapshot,
    halt: Option<HaltReason>,
}

impl PortInner {
    fn ensure_running(&self) -> SentryResult<()> {
        match self.halt {
            Some(_) => Err(SentryError::Halted),
            None => Ok(()),
        }
    }

    fn write_indicator(&mut self, which: Indicator, on: bool) -> SentryResult<()> {
        match which {
            Indicator::Left => {
                self.outputs.left_indicator.set(on)?;
                self.snapshot.left_indicator = on;
            }
            Indicator::Right => {
                self.outputs.right_indicator.set(on)?;
                self.snapshot.right_indicator = on;
            }
        }
        Ok(())
    }

    fn indicator(&self, which: Indicator) -> bool {
        match which {
            Indicator::Left => self.snapshot.left_indicator,
            Indicator::Right => self.snapshot.right_indicator,
        }
    }

    fn write_alarm(&mut self, level: f64) -> SentryResult<()> {
        let level = if level.is_finite() {
            level.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.outputs.alarm.set_level(level)?;
        self.snapshot.alarm_level = level;
        Ok(())
    }

    fn write_spotlight(&mut self, on: bool) -> SentryResult<()> {
        if let Some(spotlight) = self.outputs.spotlight.as_mut() {
            spotlight.set(on)?;
            self.snapshot.spotlight = on;
        }
        Ok(())
    }

    fn write_obstacle_led(&mut self, on: bool) -> SentryResult<()> {
        if let Some(led) = self.outputs.obstacle_led.as_mut() {
            led.set(on)?;
            self.snapshot.obstacle_led = on;
        }
        Ok(())
    }

    fn write_bearing(&mut self, angle: f64) -> SentryResult<()> {
        self.outputs.bearing.set_angle(angle)?;
        self.snapshot.bearing_angle = angle;
        self.snapshot.bearing_engaged = true;
        Ok(())
    }

    fn release_bearing(&mut self) -> SentryResult<()> {
        self.outputs.bearing.release()?;
        self.snapshot.bearing_engaged = false;
        Ok(())
    }

    /// Drive every output to rest. All outputs are attempted even if one
    /// fails; the first failure is returned.
    fn drive_safe(&mut self, center: Option<f64>) -> SentryResult<()> {
        let mut results = Vec::with_capacity(7);
        if let Some(angle) = center {
            results.push(self.write_bearing(angle));
        }
        results.push(self.release_bearing());
        results.push(self.write_indicator(Indicator::Left, false));
        results.push(self.write_indicator(Indicator::Right, false));
        results.push(self.write_alarm(0.0));
        results.push(self.write_spotlight(false));
        results.push(self.write_obstacle_led(false));
        results.into_iter().collect()
    }
}

/// Synchronized access to every hardware output.
///
/// Each write is one indivisible operation under the port lock. While the
/// port is halted all writes are refused with [`SentryError::Halted`], so a
/// stop applied from either thread lands before any later write.
pub struct ActuatorPort {
    inner: Mutex<PortInner>,
    center_angle: f64,
}

impl ActuatorPort {
    pub fn new(outputs: ActuatorOutputs, center_angle: f64) -> Self {
        Self {
            inner: Mutex::new(PortInner {
                outputs,
                snapshot: ActuatorSnapshot::safe(center_angle),
                halt: None,
            }),
            center_angle,
        }
    }

    pub fn center_angle(&self) -> f64 {
        self.center_angle
    }

    /// Put the hardware into the safe default at startup
    pub fn initialize(&self) -> SentryResult<()> {
        let mut inner = self.inner.lock();
        inner.halt = None;
        inner.drive_safe(Some(self.center_angle))
    }

    pub fn snapshot(&self) -> ActuatorSnapshot {
        self.inner.lock().snapshot
    }

    pub fn halted(&self) -> Option<HaltReason> {
        self.inner.lock().halt
    }

    /// Stop accepting writes and drive all outputs to rest.
    ///
    /// An emergency stop releases the bearing where it is; a shutdown
    /// re-centers it first. Halting twice for the same reason does not
    /// rewrite the outputs. A shutdown halt is never downgraded.
    pub fn halt(&self, reason: HaltReason) -> SentryResult<()> {
        let mut inner = self.inner.lock();
        if inner.halt == Some(reason) || inner.halt == Some(HaltReason::Shutdown) {
            return Ok(());
        }
        inner.halt = Some(reason);
        let center = match reason {
            HaltReason::Shutdown => Some(self.center_angle),
            HaltReason::EmergencyStop => None,
        };
        inner.drive_safe(center)
    }

    /// Lift an emergency-stop halt. Returns true if the port was released.
    pub fn resume(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.halt == Some(HaltReason::EmergencyStop) {
            inner.halt = None;
            true
        } else {
            false
        }
    }

    pub fn set_bearing(&self, angle: f64) -> SentryResult<()> {
        if !(MIN_ANGLE..=MAX_ANGLE).contains(&angle) {
            return Err(SentryError::ActuatorRange { angle });
        }
        let mut inner = self.inner.lock();
        inner.ensure_running()?;
        inner.write_bearing(angle)
    }

    pub fn release_bearing(&self) -> SentryResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_running()?;
        inner.release_bearing()
    }

    pub fn set_indicator(&self, which: Indicator, on: bool) -> SentryResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_running()?;
        inner.write_indicator(which, on)
    }

    pub fn set_indicators(&self, left: bool, right: bool) -> SentryResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_running()?;
        inner.write_indicator(Indicator::Left, left)?;
        inner.write_indicator(Indicator::Right, right)
    }

    /// Invert one indicator; the read and the write happen under one lock
    pub fn toggle_indicator(&self, which: Indicator) -> SentryResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_running()?;
        let on = !inner.indicator(which);
        inner.write_indicator(which, on)
    }

    pub fn toggle_indicators(&self) -> SentryResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_running()?;
        let left = !inner.indicator(Indicator::Left);
        let right = !inner.indicator(Indicator::Right);
        inner.write_indicator(Indicator::Left, left)?;
        inner.write_indicator(Indicator::Right, right)
    }

    /// Set the alarm level, clamped to 0.0..=1.0
    pub fn set_alarm(&self, level: f64) -> SentryResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_running()?;
        inner.write_alarm(level)
    }

    /// No-op when the robot has no spotlight
    pub fn set_spotlight(&self, on: bool) -> SentryResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_running()?;
        inner.write_spotlight(on)
    }

    /// No-op when the robot has no obstacle alert LED
    pub fn set_obstacle_led(&self, on: bool) -> SentryResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_running()?;
        inner.write_obstacle_led(on)
    }

    pub fn has_obstacle_led(&self) -> bool {
        self.inner.lock().outputs.obstacle_led.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{OutputId, SimWorld};

    fn port(world: &SimWorld) -> ActuatorPort {
        ActuatorPort::new(
            ActuatorOutputs {
                bearing: Box::new(world.bearing()),
                left_indicator: Box::new(world.output(OutputId::LeftIndicator)),
                right_indicator: Box::new(world.output(OutputId::RightIndicator)),
                alarm: Box::new(world.alarm()),
                spotlight: Some(Box::new(world.output(OutputId::Spotlight))),
                obstacle_led: None,
            },
            90.0,
        )
    }

    #[test]
    fn test_initialize_centers_and_releases() {
        let world = SimWorld::new();
        let port = port(&world);
        port.initialize().unwrap();

        let state = world.state();
        assert_eq!(state.bearing_angle, 90.0);
        assert!(state.is_safe());
        assert!(port.snapshot().is_safe());
    }

    #[test]
    fn test_toggle_is_read_modify_write() {
        let world = SimWorld::new();
        let port = port(&world);
        port.toggle_indicator(Indicator::Left).unwrap();
        assert!(port.snapshot().left_indicator);
        port.toggle_indicators().unwrap();
        let snap = port.snapshot();
        assert!(!snap.left_indicator);
        assert!(snap.right_indicator);
        assert!(world.state().right_indicator);
    }

    #[test]
    fn test_alarm_level_is_clamped() {
        let world = SimWorld::new();
        let port = port(&world);
        port.set_alarm(1.7).unwrap();
        assert_eq!(port.snapshot().alarm_level, 1.0);
        port.set_alarm(f64::NAN).unwrap();
        assert_eq!(world.state().alarm_level, 0.0);
    }

    #[test]
    fn test_bearing_range_checked_before_driver() {
        let world = SimWorld::new();
        let port = port(&world);
        assert!(matches!(
            port.set_bearing(200.0),
            Err(SentryError::ActuatorRange { .. })
        ));
        assert!(world.state().writes.is_empty());
    }

    #[test]
    fn test_halt_refuses_writes_until_resume() {
        let world = SimWorld::new();
        let port = port(&world);
        port.set_indicators(true, true).unwrap();
        port.set_alarm(0.7).unwrap();
        port.set_bearing(45.0).unwrap();

        port.halt(HaltReason::EmergencyStop).unwrap();
        let state = world.state();
        assert!(state.is_safe());
        // Emergency stop releases in place
        assert_eq!(state.bearing_angle, 45.0);

        assert!(matches!(port.set_indicator(Indicator::Left, true), Err(SentryError::Halted)));
        assert!(matches!(port.set_alarm(0.5), Err(SentryError::Halted)));
        assert!(!world.state().left_indicator);

        assert!(port.resume());
        port.set_indicator(Indicator::Left, true).unwrap();
        assert!(world.state().left_indicator);
    }

    #[test]
    fn test_shutdown_halt_is_final() {
        let world = SimWorld::new();
        let port = port(&world);
        port.set_bearing(0.0).unwrap();
        port.halt(HaltReason::Shutdown).unwrap();
        assert_eq!(world.state().bearing_angle, 90.0);
        assert!(world.state().is_safe());

        port.halt(HaltReason::EmergencyStop).unwrap();
        assert_eq!(port.halted(), Some(HaltReason::Shutdown));
        assert!(!port.resume());
    }
}
