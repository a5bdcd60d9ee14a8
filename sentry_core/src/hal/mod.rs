//! Hardware abstraction for the sentry robot
//!
//! Narrow driver traits consumed by the core. Real GPIO/ADC/servo drivers
//! live outside this crate; [`sim`] provides in-memory implementations.

use crate::error::{SentryError, SentryResult};
use crossbeam::channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};

pub mod sim;

/// Lowest commandable bearing angle in degrees
pub const MIN_ANGLE: f64 = 0.0;
/// Highest commandable bearing angle in degrees
pub const MAX_ANGLE: f64 = 180.0;

/// Servo pulse width at 0 degrees (microseconds)
pub const MIN_PULSE_US: u32 = 500;
/// Servo pulse width at 180 degrees (microseconds)
pub const MAX_PULSE_US: u32 = 2500;

/// Convert a bearing angle to a hobby-servo pulse width in microseconds.
///
/// 0° maps to 500 µs and 180° to 2500 µs. Pulse width 0 is reserved for
/// "no pulses" (released).
pub fn angle_to_pulse_width(angle: f64) -> SentryResult<u32> {
    if !(MIN_ANGLE..=MAX_ANGLE).contains(&angle) {
        return Err(SentryError::ActuatorRange { angle });
    }
    let span = (MAX_PULSE_US - MIN_PULSE_US) as f64;
    Ok(MIN_PULSE_US + (angle * span / MAX_ANGLE) as u32)
}

/// Distance sensor sampled through the bearing mount
pub trait RangeFinder: Send {
    /// One distance sample in centimeters
    fn read(&mut self) -> SentryResult<f64>;
}

/// Position-controlled mount (scanning servo)
pub trait BearingActuator: Send {
    /// Command an absolute angle; fails with `ActuatorRange` outside 0..=180
    fn set_angle(&mut self, degrees: f64) -> SentryResult<()>;

    /// Stop holding torque (no more pulses)
    fn release(&mut self) -> SentryResult<()>;
}

/// On/off output such as an indicator LED or spotlight
pub trait BinaryOutput: Send {
    fn set(&mut self, on: bool) -> SentryResult<()>;
}

/// Duty-cycle output driving the alarm buzzer
pub trait PwmOutput: Send {
    /// Set the output level in 0.0..=1.0
    fn set_level(&mut self, value: f64) -> SentryResult<()>;
}

/// Battery voltage through an ADC channel
pub trait VoltageSensor: Send {
    /// Normalized reading in 0.0..=1.0 of the ADC reference
    fn read(&mut self) -> SentryResult<f64>;
}

/// External stop button or software stop line
pub trait EmergencyStopSignal: Send + Sync {
    fn is_asserted(&self) -> bool;
}

/// Discrete motion detector events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionEvent {
    MotionStart,
    MotionEnd,
}

/// Motion detector delivering events asynchronously
pub trait MotionSource: Send {
    /// Start delivering events into `sink`.
    ///
    /// Events must be posted in detection order. Delivery stops once the
    /// sink reports it is closed.
    fn subscribe(&mut self, sink: MotionSink) -> SentryResult<()>;
}

/// Posting end of the motion event queue handed to a [`MotionSource`]
#[derive(Clone)]
pub struct MotionSink {
    tx: Sender<MotionEvent>,
}

impl MotionSink {
    pub fn new(tx: Sender<MotionEvent>) -> Self {
        Self { tx }
    }

    /// Post an event without blocking the caller.
    ///
    /// A full queue drops the event; a closed queue is reported as
    /// `ChannelClosed` so the source can stop.
    pub fn post(&self, event: MotionEvent) -> SentryResult<()> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                log::warn!("Motion queue full, dropping {:?}", event);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(SentryError::ChannelClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;

    #[test]
    fn test_pulse_width_mapping() {
        assert_eq!(angle_to_pulse_width(0.0).unwrap(), 500);
        assert_eq!(angle_to_pulse_width(90.0).unwrap(), 1500);
        assert_eq!(angle_to_pulse_width(180.0).unwrap(), 2500);
        assert_eq!(angle_to_pulse_width(45.0).unwrap(), 1000);
    }

    #[test]
    fn test_pulse_width_rejects_out_of_range() {
        assert!(matches!(
            angle_to_pulse_width(-1.0),
            Err(SentryError::ActuatorRange { .. })
        ));
        assert!(angle_to_pulse_width(180.5).is_err());
    }

    #[test]
    fn test_sink_drops_when_full_and_reports_closed() {
        let (tx, rx) = channel::bounded(1);
        let sink = MotionSink::new(tx);
        sink.post(MotionEvent::MotionStart).unwrap();
        // Full: dropped, not an error
        sink.post(MotionEvent::MotionEnd).unwrap();
        assert_eq!(rx.try_recv().unwrap(), MotionEvent::MotionStart);
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(matches!(
            sink.post(MotionEvent::MotionStart),
            Err(SentryError::ChannelClosed)
        ));
    }
}
