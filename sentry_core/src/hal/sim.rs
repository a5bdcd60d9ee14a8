//! In-memory drivers for tests and simulation runs
//!
//! All drivers handed out by a [`SimWorld`] share one [`WorldState`]: the
//! range finder answers with the distance configured for the bearing the
//! simulated servo currently points at, and every output write is recorded.

use super::{
    angle_to_pulse_width, BearingActuator, BinaryOutput, EmergencyStopSignal, MotionEvent,
    MotionSink, MotionSource, PwmOutput, RangeFinder, VoltageSensor,
};
use crate::error::{SentryError, SentryResult};
use crate::params::ScanConfig;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Distance reported for bearings without a configured obstacle
pub const OPEN_SPACE_CM: f64 = 200.0;

/// Which simulated output a write went to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputId {
    LeftIndicator,
    RightIndicator,
    Spotlight,
    ObstacleLed,
}

/// One recorded output write
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputWrite {
    Binary(OutputId, bool),
    Alarm(f64),
    Bearing(f64),
    BearingReleased,
}

/// Physical state of the simulated robot
#[derive(Debug, Clone)]
pub struct WorldState {
    pub bearing_angle: f64,
    pub bearing_engaged: bool,
    pub pulse_width_us: u32,
    pub left_indicator: bool,
    pub right_indicator: bool,
    pub spotlight: bool,
    pub obstacle_led: bool,
    pub alarm_level: f64,
    /// Normalized ADC reading of the battery channel
    pub battery_reading: f64,
    pub range_reads: u64,
    pub writes: Vec<OutputWrite>,
    distances: BTreeMap<i32, f64>,
    fail_range: bool,
    fail_voltage: bool,
    fail_bearing: bool,
}

impl Default for WorldState {
    fn default() -> Self {
        Self {
            bearing_angle: 90.0,
            bearing_engaged: false,
            pulse_width_us: 0,
            left_indicator: false,
            right_indicator: false,
            spotlight: false,
            obstacle_led: false,
            alarm_level: 0.0,
            battery_reading: 1.0,
            range_reads: 0,
            writes: Vec::new(),
            distances: BTreeMap::new(),
            fail_range: false,
            fail_voltage: false,
            fail_bearing: false,
        }
    }
}

impl WorldState {
    fn distance_at(&self, angle: f64) -> f64 {
        self.distances
            .get(&(angle.round() as i32))
            .copied()
            .unwrap_or(OPEN_SPACE_CM)
    }

    fn set_binary(&mut self, id: OutputId, on: bool) {
        match id {
            OutputId::LeftIndicator => self.left_indicator = on,
            OutputId::RightIndicator => self.right_indicator = on,
            OutputId::Spotlight => self.spotlight = on,
            OutputId::ObstacleLed => self.obstacle_led = on,
        }
        self.writes.push(OutputWrite::Binary(id, on));
    }

    /// True when every output is in its resting state
    pub fn is_safe(&self) -> bool {
        !self.bearing_engaged
            && !self.left_indicator
            && !self.right_indicator
            && !self.spotlight
            && self.alarm_level == 0.0
    }
}

/// Shared simulated hardware
#[derive(Clone, Default)]
pub struct SimWorld {
    state: Arc<Mutex<WorldState>>,
    estop: Arc<SimEmergencyStop>,
    motion_sink: Arc<Mutex<Option<MotionSink>>>,
}

impl SimWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current physical state
    pub fn state(&self) -> WorldState {
        self.state.lock().clone()
    }

    /// Place an obstacle (or open space) at a bearing
    pub fn set_distance(&self, angle: f64, distance_cm: f64) {
        self.state
            .lock()
            .distances
            .insert(angle.round() as i32, distance_cm);
    }

    /// Configure the three scan bearings at once
    pub fn set_scan_distances(&self, scan: &ScanConfig, left: f64, center: f64, right: f64) {
        self.set_distance(scan.left_angle, left);
        self.set_distance(scan.center_angle, center);
        self.set_distance(scan.right_angle, right);
    }

    /// Mark bearings blocked (just inside the threshold) or open
    pub fn set_obstacles(&self, scan: &ScanConfig, left: bool, center: bool, right: bool) {
        let near = scan.obstacle_threshold_cm / 2.0;
        let pick = |blocked: bool| if blocked { near } else { OPEN_SPACE_CM };
        self.set_scan_distances(scan, pick(left), pick(center), pick(right));
    }

    pub fn set_battery_reading(&self, normalized: f64) {
        self.state.lock().battery_reading = normalized;
    }

    pub fn fail_range(&self, fail: bool) {
        self.state.lock().fail_range = fail;
    }

    pub fn fail_voltage(&self, fail: bool) {
        self.state.lock().fail_voltage = fail;
    }

    pub fn fail_bearing(&self, fail: bool) {
        self.state.lock().fail_bearing = fail;
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    pub fn set_emergency_stop(&self, asserted: bool) {
        self.estop.set(asserted);
    }

    /// Deliver a motion event to the subscribed consumer.
    ///
    /// Returns false when nothing is subscribed or the consumer is gone.
    pub fn fire_motion(&self, event: MotionEvent) -> bool {
        match self.motion_sink.lock().as_ref() {
            Some(sink) => sink.post(event).is_ok(),
            None => false,
        }
    }

    pub fn range_finder(&self) -> SimRangeFinder {
        SimRangeFinder {
            state: self.state.clone(),
        }
    }

    pub fn bearing(&self) -> SimBearing {
        SimBearing {
            state: self.state.clone(),
        }
    }

    pub fn output(&self, id: OutputId) -> SimOutput {
        SimOutput {
            id,
            state: self.state.clone(),
        }
    }

    pub fn alarm(&self) -> SimAlarm {
        SimAlarm {
            state: self.state.clone(),
        }
    }

    pub fn voltage_sensor(&self) -> SimVoltageSensor {
        SimVoltageSensor {
            state: self.state.clone(),
        }
    }

    pub fn emergency_stop(&self) -> Arc<SimEmergencyStop> {
        self.estop.clone()
    }

    pub fn motion_source(&self) -> SimMotionSource {
        SimMotionSource {
            sink: self.motion_sink.clone(),
        }
    }
}

pub struct SimRangeFinder {
    state: Arc<Mutex<WorldState>>,
}

impl RangeFinder for SimRangeFinder {
    fn read(&mut self) -> SentryResult<f64> {
        let mut state = self.state.lock();
        state.range_reads += 1;
        if state.fail_range {
            return Err(SentryError::sensor("range_finder", "echo timeout"));
        }
        let angle = state.bearing_angle;
        Ok(state.distance_at(angle))
    }
}

pub struct SimBearing {
    state: Arc<Mutex<WorldState>>,
}

impl BearingActuator for SimBearing {
    fn set_angle(&mut self, degrees: f64) -> SentryResult<()> {
        let pulse = angle_to_pulse_width(degrees)?;
        let mut state = self.state.lock();
        if state.fail_bearing {
            return Err(SentryError::HardwareConnect("servo daemon unreachable".into()));
        }
        state.bearing_angle = degrees;
        state.bearing_engaged = true;
        state.pulse_width_us = pulse;
        state.writes.push(OutputWrite::Bearing(degrees));
        Ok(())
    }

    fn release(&mut self) -> SentryResult<()> {
        let mut state = self.state.lock();
        if state.fail_bearing {
            return Err(SentryError::HardwareConnect("servo daemon unreachable".into()));
        }
        state.bearing_engaged = false;
        state.pulse_width_us = 0;
        state.writes.push(OutputWrite::BearingReleased);
        Ok(())
    }
}

pub struct SimOutput {
    id: OutputId,
    state: Arc<Mutex<WorldState>>,
}

impl BinaryOutput for SimOutput {
    fn set(&mut self, on: bool) -> SentryResult<()> {
        self.state.lock().set_binary(self.id, on);
        Ok(())
    }
}

pub struct SimAlarm {
    state: Arc<Mutex<WorldState>>,
}

impl PwmOutput for SimAlarm {
    fn set_level(&mut self, value: f64) -> SentryResult<()> {
        let mut state = self.state.lock();
        state.alarm_level = value;
        state.writes.push(OutputWrite::Alarm(value));
        Ok(())
    }
}

pub struct SimVoltageSensor {
    state: Arc<Mutex<WorldState>>,
}

impl VoltageSensor for SimVoltageSensor {
    fn read(&mut self) -> SentryResult<f64> {
        let state = self.state.lock();
        if state.fail_voltage {
            return Err(SentryError::sensor("voltage_sensor", "ADC not responding"));
        }
        Ok(state.battery_reading)
    }
}

/// Software emergency stop line
#[derive(Debug, Default)]
pub struct SimEmergencyStop {
    asserted: AtomicBool,
}

impl SimEmergencyStop {
    pub fn set(&self, asserted: bool) {
        self.asserted.store(asserted, Ordering::SeqCst);
    }
}

impl EmergencyStopSignal for SimEmergencyStop {
    fn is_asserted(&self) -> bool {
        self.asserted.load(Ordering::SeqCst)
    }
}

/// Motion source driven by [`SimWorld::fire_motion`]
pub struct SimMotionSource {
    sink: Arc<Mutex<Option<MotionSink>>>,
}

impl MotionSource for SimMotionSource {
    fn subscribe(&mut self, sink: MotionSink) -> SentryResult<()> {
        *self.sink.lock() = Some(sink);
        Ok(())
    }
}

/// Synthesizes motion events from a level-polled detector.
///
/// A rising edge of the poll function posts `MotionStart`, a falling edge
/// posts `MotionEnd`. The polling thread stops when the source is dropped or
/// the consumer goes away.
pub struct PollingMotionSource {
    poll: Option<Box<dyn FnMut() -> bool + Send>>,
    interval: Duration,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PollingMotionSource {
    pub fn new(poll: impl FnMut() -> bool + Send + 'static, interval: Duration) -> Self {
        Self {
            poll: Some(Box::new(poll)),
            interval,
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl MotionSource for PollingMotionSource {
    fn subscribe(&mut self, sink: MotionSink) -> SentryResult<()> {
        let mut poll = self
            .poll
            .take()
            .ok_or_else(|| SentryError::Internal("motion source already subscribed".into()))?;
        let stop = self.stop.clone();
        let interval = self.interval;

        let handle = std::thread::Builder::new()
            .name("motion-poll".into())
            .spawn(move || {
                let mut last = false;
                while !stop.load(Ordering::Relaxed) {
                    let level = poll();
                    if level != last {
                        last = level;
                        let event = if level {
                            MotionEvent::MotionStart
                        } else {
                            MotionEvent::MotionEnd
                        };
                        if sink.post(event).is_err() {
                            break;
                        }
                    }
                    std::thread::sleep(interval);
                }
            })?;
        self.handle = Some(handle);
        Ok(())
    }
}

impl Drop for PollingMotionSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;

    #[test]
    fn test_range_follows_bearing() {
        let world = SimWorld::new();
        world.set_distance(45.0, 12.0);
        let mut bearing = world.bearing();
        let mut range = world.range_finder();

        bearing.set_angle(45.0).unwrap();
        assert_eq!(range.read().unwrap(), 12.0);
        bearing.set_angle(135.0).unwrap();
        assert_eq!(range.read().unwrap(), OPEN_SPACE_CM);
        assert_eq!(world.state().pulse_width_us, 2000);
    }

    #[test]
    fn test_bearing_rejects_out_of_range() {
        let world = SimWorld::new();
        let mut bearing = world.bearing();
        assert!(matches!(
            bearing.set_angle(181.0),
            Err(SentryError::ActuatorRange { .. })
        ));
        assert!(!world.state().bearing_engaged);
    }

    #[test]
    fn test_polling_source_synthesizes_edges() {
        let level = Arc::new(AtomicBool::new(false));
        let probe = level.clone();
        let mut source =
            PollingMotionSource::new(move || probe.load(Ordering::SeqCst), Duration::from_millis(2));
        let (tx, rx) = channel::bounded(8);
        source.subscribe(MotionSink::new(tx)).unwrap();

        level.store(true, Ordering::SeqCst);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            MotionEvent::MotionStart
        );
        level.store(false, Ordering::SeqCst);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            MotionEvent::MotionEnd
        );
    }
}
