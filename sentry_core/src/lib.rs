//! # Sentry Core
//!
//! Control core of a small surveillance patrol robot.
//!
//! The robot patrols a square, scanning left, center and right before every
//! move, and sounds an intruder alarm when its motion detector fires. This
//! crate provides:
//!
//! - **Scanner**: three-bearing obstacle sweep over a shared servo mount
//! - **Decision**: the obstacle table mapping a scan to a movement
//! - **Patrol**: the move-counting square patrol state machine
//! - **Intruder**: motion-event driven alarm with cooldown and single-flight
//! - **Power**: battery voltage gate and low-battery alert
//! - **Supervisor**: lifecycle, emergency stop and shutdown cleanup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sentry_core::hal::sim::SimWorld;
//! use sentry_core::{Drivers, SentryConfig, Supervisor};
//!
//! let world = SimWorld::new();
//! let supervisor = Supervisor::new(SentryConfig::default(), Drivers::simulated(&world))?;
//! let handle = supervisor.shutdown_handle();
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(10));
//!     handle.shutdown();
//! });
//! let summary = supervisor.run()?;
//! println!("{} forward moves", summary.patrol.forwards);
//! # Ok::<(), sentry_core::SentryError>(())
//! ```

pub mod core;
pub mod decision;
pub mod error;
pub mod hal;
pub mod intruder;
pub mod params;
pub mod patrol;
pub mod power;
pub mod scanner;
pub mod supervisor;

// Re-export commonly used types for easy access
pub use crate::core::{
    ActuatorPort, ActuatorSnapshot, Interrupt, Node, NodeState, SafetyGate, ShutdownHandle,
};
pub use decision::{decide, MovementAction};
pub use error::{SentryError, SentryResult};
pub use hal::MotionEvent;
pub use intruder::{AlarmState, IntruderMonitor, IntruderStats};
pub use params::SentryConfig;
pub use patrol::{PatrolController, PatrolPhase, PatrolState, PatrolStats};
pub use power::{VoltageGate, VoltageStatus};
pub use scanner::{ObstacleReport, RangeScanner, ScanReading};
pub use supervisor::{Drivers, RunSummary, Supervisor};
