//! Battery voltage gate and low-battery alert

use crate::core::SafetyGate;
use crate::error::{SentryError, SentryResult};
use crate::hal::VoltageSensor;
use crate::params::PowerConfig;
use std::time::{Duration, Instant};

/// Result of one battery check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VoltageStatus {
    Ok(f64),
    Low(f64),
    /// The sensor could not be read; movement is allowed
    Unknown,
}

impl VoltageStatus {
    pub fn allows_movement(&self) -> bool {
        !matches!(self, VoltageStatus::Low(_))
    }
}

/// Converts ADC readings to battery volts and compares them to a floor
pub struct VoltageGate {
    sensor: Box<dyn VoltageSensor>,
    config: PowerConfig,
}

impl VoltageGate {
    pub fn new(sensor: Box<dyn VoltageSensor>, config: PowerConfig) -> Self {
        Self { sensor, config }
    }

    /// Battery voltage: normalized reading × reference × divider ratio
    pub fn read_voltage(&mut self) -> SentryResult<f64> {
        let normalized = self.sensor.read()?;
        if !normalized.is_finite() {
            return Err(SentryError::sensor(
                "voltage_sensor",
                format!("non-finite reading {}", normalized),
            ));
        }
        Ok(normalized * self.config.reference_voltage * self.config.divider_ratio)
    }

    /// True if the battery is at or above `min_voltage`.
    ///
    /// A failed read counts as OK so a flaky ADC cannot park the robot.
    pub fn is_voltage_ok(&mut self, min_voltage: f64) -> bool {
        self.status(min_voltage).allows_movement()
    }

    /// Check against the configured minimum
    pub fn check(&mut self) -> VoltageStatus {
        self.status(self.config.min_voltage)
    }

    fn status(&mut self, min_voltage: f64) -> VoltageStatus {
        match self.read_voltage() {
            Ok(volts) if volts >= min_voltage => {
                log::debug!("[VOLTAGE] {:.2}V (min {:.2}V)", volts, min_voltage);
                VoltageStatus::Ok(volts)
            }
            Ok(volts) => {
                log::warn!("[VOLTAGE] {:.2}V below minimum {:.2}V", volts, min_voltage);
                VoltageStatus::Low(volts)
            }
            Err(e) => {
                log::warn!("[VOLTAGE] check failed ({}), allowing movement", e);
                VoltageStatus::Unknown
            }
        }
    }
}

/// Buzzer and indicator pattern asking for a recharge, with its own cooldown
pub struct BatteryAlert {
    cooldown: Duration,
    level: f64,
    flashes: u32,
    step: Duration,
    last_alert: Option<Instant>,
}

impl BatteryAlert {
    pub fn new(config: &PowerConfig) -> Self {
        Self {
            cooldown: Duration::from_secs(config.low_battery_cooldown_secs),
            level: config.low_battery_level,
            flashes: config.low_battery_flashes,
            step: Duration::from_millis(config.low_battery_step_ms),
            last_alert: None,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_alert {
            Some(last) => now.saturating_duration_since(last) >= self.cooldown,
            None => true,
        }
    }

    /// Sound the alert unless it is cooling down. Returns whether it sounded.
    pub fn sound(&mut self, gate: &SafetyGate, volts: f64, now: Instant) -> SentryResult<bool> {
        if !self.is_due(now) {
            return Ok(false);
        }
        self.last_alert = Some(now);
        log::warn!("LOW BATTERY! {:.2}V - please charge", volts);

        let result = self.flash(gate);
        let port = gate.port();
        let _ = port.set_alarm(0.0);
        let _ = port.set_indicators(false, false);
        result.map(|_| true)
    }

    fn flash(&self, gate: &SafetyGate) -> SentryResult<()> {
        let port = gate.port();
        for _ in 0..self.flashes {
            gate.check()?;
            port.set_alarm(self.level)?;
            port.toggle_indicators()?;
            gate.hold(self.step)?;
            port.set_alarm(0.0)?;
            gate.hold(self.step)?;
        }
        Ok(())
    }
}
