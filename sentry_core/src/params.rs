//! Typed runtime configuration for the sentry robot
//!
//! Every section falls back to its defaults, so a config file only needs the
//! keys it wants to change. Files are read as YAML (`.yaml`, `.yml`) or TOML
//! (`.toml`) depending on their extension.

use crate::error::{SentryError, SentryResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Full robot configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SentryConfig {
    pub scan: ScanConfig,
    pub patrol: PatrolConfig,
    pub alarm: AlarmConfig,
    pub power: PowerConfig,
    pub safety: SafetyConfig,
}

/// Range scan geometry and thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Distance below which a bearing counts as obstructed
    pub obstacle_threshold_cm: f64,
    pub left_angle: f64,
    pub center_angle: f64,
    pub right_angle: f64,
    /// Wait after commanding the bearing before sampling
    pub settle_ms: u64,
    /// Distance substituted for a failed reading
    pub sentinel_distance_cm: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            obstacle_threshold_cm: 20.0,
            left_angle: 45.0,
            center_angle: 90.0,
            right_angle: 135.0,
            settle_ms: 300,
            sentinel_distance_cm: 999.0,
        }
    }
}

impl ScanConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Patrol pattern and movement sequence timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatrolConfig {
    /// Forward moves per side of the square
    pub counter_limit: u32,
    pub forward_ms: u64,
    pub turn_blinks: u32,
    pub blink_interval_ms: u64,
    pub turn_pause_ms: u64,
    pub backward_blinks: u32,
    pub cycle_pause_ms: u64,
    pub low_voltage_idle_ms: u64,
    pub obstacle_alert_blinks: u32,
    pub obstacle_alert_interval_ms: u64,
    /// Stop after this many cycles; `None` patrols until shutdown
    pub max_cycles: Option<u64>,
}

impl Default for PatrolConfig {
    fn default() -> Self {
        Self {
            counter_limit: 5,
            forward_ms: 2000,
            turn_blinks: 20,
            blink_interval_ms: 100,
            turn_pause_ms: 1000,
            backward_blinks: 20,
            cycle_pause_ms: 500,
            low_voltage_idle_ms: 2000,
            obstacle_alert_blinks: 5,
            obstacle_alert_interval_ms: 1000,
            max_cycles: None,
        }
    }
}

/// Intruder alarm behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    /// Minimum time between two alarm sequences
    pub cooldown_secs: u64,
    pub flash_count: u32,
    /// Duration of each on/off half of a flash
    pub step_ms: u64,
    /// Alarm PWM level while sounding
    pub level: f64,
    /// Motion events buffered before new ones are dropped
    pub event_queue: usize,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 30,
            flash_count: 5,
            step_ms: 300,
            level: 0.7,
            event_queue: 16,
        }
    }
}

impl AlarmConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }
}

/// Battery measurement and low-voltage handling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub min_voltage: f64,
    /// ADC reference voltage (full-scale reading)
    pub reference_voltage: f64,
    /// (R1 + R2) / R2 of the battery divider
    pub divider_ratio: f64,
    pub low_battery_cooldown_secs: u64,
    pub low_battery_level: f64,
    pub low_battery_flashes: u32,
    pub low_battery_step_ms: u64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            min_voltage: 3.2,
            reference_voltage: 3.3,
            divider_ratio: 1.0,
            low_battery_cooldown_secs: 60,
            low_battery_level: 0.3,
            low_battery_flashes: 5,
            low_battery_step_ms: 500,
        }
    }
}

/// Stop/shutdown responsiveness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Slice length of every timed wait; bounds stop latency
    pub poll_interval_ms: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
        }
    }
}

impl SafetyConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl SentryConfig {
    /// Load configuration from a YAML or TOML file
    pub fn load(path: &Path) -> SentryResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: SentryConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&text)?,
            Some("toml") => toml::from_str(&text)?,
            other => {
                return Err(SentryError::Config(format!(
                    "unsupported config format {:?} for {}",
                    other,
                    path.display()
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the robot misbehave at runtime
    pub fn validate(&self) -> SentryResult<()> {
        for (name, angle) in [
            ("scan.left_angle", self.scan.left_angle),
            ("scan.center_angle", self.scan.center_angle),
            ("scan.right_angle", self.scan.right_angle),
        ] {
            if !(0.0..=180.0).contains(&angle) {
                return Err(SentryError::Config(format!(
                    "{} = {} must be within 0..=180",
                    name, angle
                )));
            }
        }
        if self.scan.obstacle_threshold_cm <= 0.0 {
            return Err(SentryError::Config(
                "scan.obstacle_threshold_cm must be positive".into(),
            ));
        }
        if self.scan.sentinel_distance_cm < self.scan.obstacle_threshold_cm {
            return Err(SentryError::Config(
                "scan.sentinel_distance_cm must not be below the obstacle threshold".into(),
            ));
        }
        if self.patrol.counter_limit == 0 {
            return Err(SentryError::Config("patrol.counter_limit must be > 0".into()));
        }
        for (name, level) in [
            ("alarm.level", self.alarm.level),
            ("power.low_battery_level", self.power.low_battery_level),
        ] {
            if !(0.0..=1.0).contains(&level) {
                return Err(SentryError::Config(format!(
                    "{} = {} must be within 0..=1",
                    name, level
                )));
            }
        }
        if self.alarm.step_ms == 0 || self.patrol.blink_interval_ms == 0 {
            return Err(SentryError::Config(
                "alarm.step_ms and patrol.blink_interval_ms must be non-zero".into(),
            ));
        }
        if self.safety.poll_interval_ms == 0 {
            return Err(SentryError::Config("safety.poll_interval_ms must be non-zero".into()));
        }
        if self.alarm.event_queue == 0 {
            return Err(SentryError::Config("alarm.event_queue must be non-zero".into()));
        }
        if self.power.reference_voltage <= 0.0 || self.power.divider_ratio <= 0.0 {
            return Err(SentryError::Config(
                "power.reference_voltage and power.divider_ratio must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = SentryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.patrol.counter_limit, 5);
        assert_eq!(config.alarm.cooldown(), Duration::from_secs(30));
        assert_eq!(config.scan.center_angle, 90.0);
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "scan:\n  obstacle_threshold_cm: 16\n  left_angle: 180\n  right_angle: 0").unwrap();

        let config = SentryConfig::load(file.path()).unwrap();
        assert_eq!(config.scan.obstacle_threshold_cm, 16.0);
        assert_eq!(config.scan.left_angle, 180.0);
        assert_eq!(config.scan.right_angle, 0.0);
        // Untouched sections keep their defaults
        assert_eq!(config.alarm, AlarmConfig::default());
    }

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[patrol]\ncounter_limit = 3\nmax_cycles = 10\n\n[alarm]\ncooldown_secs = 5").unwrap();

        let config = SentryConfig::load(file.path()).unwrap();
        assert_eq!(config.patrol.counter_limit, 3);
        assert_eq!(config.patrol.max_cycles, Some(10));
        assert_eq!(config.alarm.cooldown_secs, 5);
    }

    #[test]
    fn test_rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            SentryConfig::load(file.path()),
            Err(SentryError::Config(_))
        ));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = SentryConfig::default();
        config.scan.right_angle = 190.0;
        assert!(config.validate().is_err());

        let mut config = SentryConfig::default();
        config.patrol.counter_limit = 0;
        assert!(config.validate().is_err());

        let mut config = SentryConfig::default();
        config.alarm.level = 1.5;
        assert!(config.validate().is_err());
    }
}
