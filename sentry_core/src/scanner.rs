//! Three-bearing obstacle scan
//!
//! Sweeps the bearing mount left, center and right, samples the range
//! finder once per bearing, then re-centers and releases the mount.

use crate::core::SafetyGate;
use crate::error::SentryResult;
use crate::hal::RangeFinder;
use crate::params::ScanConfig;
use serde::{Deserialize, Serialize};

/// Obstacle flags for the three scan bearings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObstacleReport {
    pub left: bool,
    pub center: bool,
    pub right: bool,
}

impl ObstacleReport {
    pub fn all_clear(&self) -> bool {
        !(self.left || self.center || self.right)
    }
}

/// Distances measured during one scan, in centimeters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanReading {
    pub left_cm: f64,
    pub center_cm: f64,
    pub right_cm: f64,
    /// Number of bearings whose reading failed and was substituted
    pub substituted: u8,
}

impl ScanReading {
    /// Classify each distance against the obstacle threshold
    pub fn report(&self, threshold_cm: f64) -> ObstacleReport {
        ObstacleReport {
            left: self.left_cm < threshold_cm,
            center: self.center_cm < threshold_cm,
            right: self.right_cm < threshold_cm,
        }
    }
}

/// Sweeps the shared bearing mount and samples the range finder.
///
/// `scan` takes `&mut self`, so one scanner can never run two sweeps at
/// once.
pub struct RangeScanner {
    range_finder: Box<dyn RangeFinder>,
    config: ScanConfig,
}

impl RangeScanner {
    pub fn new(range_finder: Box<dyn RangeFinder>, config: ScanConfig) -> Self {
        Self {
            range_finder,
            config,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Sweep all three bearings and classify the result
    pub fn scan(&mut self, gate: &SafetyGate) -> SentryResult<ObstacleReport> {
        let reading = self.sweep(gate)?;
        Ok(reading.report(self.config.obstacle_threshold_cm))
    }

    /// Sweep all three bearings, returning raw distances.
    ///
    /// Each settle wait is a cancellation point. Failed range reads are
    /// replaced by the sentinel distance. Bearing faults are returned.
    pub fn sweep(&mut self, gate: &SafetyGate) -> SentryResult<ScanReading> {
        let port = gate.port();
        let bearings = [
            ("LEFT", self.config.left_angle),
            ("CENTER", self.config.center_angle),
            ("RIGHT", self.config.right_angle),
        ];
        let mut distances = [0.0; 3];
        let mut substituted = 0;

        gate.check()?;
        for (slot, (label, angle)) in bearings.iter().enumerate() {
            port.set_bearing(*angle)?;
            gate.hold(self.config.settle())?;
            let (distance, ok) = self.sample();
            if !ok {
                substituted += 1;
            }
            distances[slot] = distance;
            log::debug!("  {} ({:.0}°): {:.1} cm", label, angle, distance);
        }

        port.set_bearing(self.config.center_angle)?;
        port.release_bearing()?;

        let reading = ScanReading {
            left_cm: distances[0],
            center_cm: distances[1],
            right_cm: distances[2],
            substituted,
        };
        let report = reading.report(self.config.obstacle_threshold_cm);
        log::info!(
            "[SCAN] L {:.1}cm{} | C {:.1}cm{} | R {:.1}cm{}",
            reading.left_cm,
            if report.left { " (blocked)" } else { "" },
            reading.center_cm,
            if report.center { " (blocked)" } else { "" },
            reading.right_cm,
            if report.right { " (blocked)" } else { "" },
        );
        Ok(reading)
    }

    /// One range sample; failures become the sentinel so a bad echo never
    /// reads as an obstacle.
    fn sample(&mut self) -> (f64, bool) {
        match self.range_finder.read() {
            Ok(distance) if distance.is_finite() && distance >= 0.0 => (distance, true),
            Ok(distance) => {
                log::warn!(
                    "Range finder returned {} - substituting {:.0} cm",
                    distance,
                    self.config.sentinel_distance_cm
                );
                (self.config.sentinel_distance_cm, false)
            }
            Err(e) => {
                log::warn!(
                    "{} - substituting {:.0} cm",
                    e,
                    self.config.sentinel_distance_cm
                );
                (self.config.sentinel_distance_cm, false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ActuatorOutputs, ActuatorPort, Interrupt, ShutdownHandle};
    use crate::hal::sim::{OutputId, OutputWrite, SimWorld};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_config() -> ScanConfig {
        ScanConfig {
            settle_ms: 1,
            ..ScanConfig::default()
        }
    }

    fn setup(world: &SimWorld) -> (RangeScanner, SafetyGate, ShutdownHandle) {
        let port = Arc::new(ActuatorPort::new(
            ActuatorOutputs {
                bearing: Box::new(world.bearing()),
                left_indicator: Box::new(world.output(OutputId::LeftIndicator)),
                right_indicator: Box::new(world.output(OutputId::RightIndicator)),
                alarm: Box::new(world.alarm()),
                spotlight: None,
                obstacle_led: None,
            },
            90.0,
        ));
        let (handle, rx) = ShutdownHandle::new();
        let gate = SafetyGate::new(world.emergency_stop(), port, rx, Duration::from_millis(1));
        let scanner = RangeScanner::new(Box::new(world.range_finder()), fast_config());
        (scanner, gate, handle)
    }

    #[test]
    fn test_scan_classifies_each_bearing() {
        let world = SimWorld::new();
        let config = fast_config();
        world.set_scan_distances(&config, 10.0, 50.0, 19.9);
        let (mut scanner, gate, _handle) = setup(&world);

        let report = scanner.scan(&gate).unwrap();
        assert_eq!(
            report,
            ObstacleReport {
                left: true,
                center: false,
                right: true
            }
        );
    }

    #[test]
    fn test_threshold_is_strict() {
        let reading = ScanReading {
            left_cm: 20.0,
            center_cm: 19.99,
            right_cm: 200.0,
            substituted: 0,
        };
        let report = reading.report(20.0);
        assert!(!report.left);
        assert!(report.center);
        assert!(!report.right);
    }

    #[test]
    fn test_sweep_order_and_parking() {
        let world = SimWorld::new();
        let (mut scanner, gate, _handle) = setup(&world);
        scanner.scan(&gate).unwrap();

        let state = world.state();
        assert_eq!(
            state.writes,
            vec![
                OutputWrite::Bearing(45.0),
                OutputWrite::Bearing(90.0),
                OutputWrite::Bearing(135.0),
                OutputWrite::Bearing(90.0),
                OutputWrite::BearingReleased,
            ]
        );
        assert!(!state.bearing_engaged);
        assert_eq!(state.range_reads, 3);
    }

    #[test]
    fn test_read_failure_is_no_obstacle() {
        let world = SimWorld::new();
        let config = fast_config();
        world.set_scan_distances(&config, 1.0, 1.0, 1.0);
        world.fail_range(true);
        let (mut scanner, gate, _handle) = setup(&world);

        let reading = scanner.sweep(&gate).unwrap();
        assert_eq!(reading.substituted, 3);
        assert_eq!(reading.center_cm, 999.0);
        assert!(reading.report(config.obstacle_threshold_cm).all_clear());
    }

    #[test]
    fn test_bearing_fault_is_returned() {
        let world = SimWorld::new();
        world.fail_bearing(true);
        let (mut scanner, gate, _handle) = setup(&world);
        assert!(scanner.scan(&gate).is_err());
    }

    #[test]
    fn test_emergency_stop_aborts_scan() {
        let world = SimWorld::new();
        let (mut scanner, gate, _handle) = setup(&world);
        world.set_emergency_stop(true);
        let err = scanner.scan(&gate).unwrap_err();
        assert_eq!(err.interrupt(), Some(Interrupt::EmergencyStop));
        assert!(world.state().is_safe());
    }
}
