//! Error types for the sentry core
//!
//! Sensor faults are absorbed by the scanner and the voltage gate and never
//! reach the patrol or alarm loops. Everything else surfaces through
//! [`SentryError`].

use crate::core::Interrupt;
use thiserror::Error;

/// Errors produced by sentry components and drivers
#[derive(Debug, Error)]
pub enum SentryError {
    /// A sensor did not deliver a usable reading (timeout, bus fault)
    #[error("Sensor read failed on {sensor}: {message}")]
    SensorRead { sensor: String, message: String },

    /// A bearing angle outside 0..=180 degrees was commanded
    #[error("Bearing angle {angle} is outside 0..=180 degrees")]
    ActuatorRange { angle: f64 },

    /// A driver could not be brought up at startup
    #[error("Hardware connection failed: {0}")]
    HardwareConnect(String),

    /// The actuator port refused a write because it is halted
    #[error("Actuator port is halted")]
    Halted,

    /// A blocking sequence was cut short by shutdown or emergency stop
    #[error("Interrupted by {0}")]
    Interrupted(Interrupt),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The other end of an event channel went away
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SentryError {
    pub fn sensor(sensor: &str, message: impl Into<String>) -> Self {
        SentryError::SensorRead {
            sensor: sensor.to_string(),
            message: message.into(),
        }
    }

    /// The interrupt carried by this error, if any.
    ///
    /// A halted port is reported as an emergency stop: the only way a port
    /// halts while a loop is still writing is the stop override.
    pub fn interrupt(&self) -> Option<Interrupt> {
        match self {
            SentryError::Interrupted(why) => Some(*why),
            SentryError::Halted => Some(Interrupt::EmergencyStop),
            _ => None,
        }
    }
}

/// Result alias used across the crate
pub type SentryResult<T> = Result<T, SentryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_classification() {
        assert_eq!(
            SentryError::Interrupted(Interrupt::Shutdown).interrupt(),
            Some(Interrupt::Shutdown)
        );
        assert_eq!(SentryError::Halted.interrupt(), Some(Interrupt::EmergencyStop));
        assert_eq!(SentryError::sensor("range", "timeout").interrupt(), None);
    }

    #[test]
    fn test_display() {
        let err = SentryError::ActuatorRange { angle: 200.0 };
        assert_eq!(err.to_string(), "Bearing angle 200 is outside 0..=180 degrees");
    }
}
