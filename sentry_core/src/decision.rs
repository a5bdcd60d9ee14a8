//! Obstacle decision table
//!
//! Maps a three-bearing obstacle report to a movement. The center bearing
//! dominates: a clear center always goes forward, even with a blocked side.

use crate::scanner::ObstacleReport;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Movement chosen for one patrol cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementAction {
    Forward,
    TurnLeft,
    TurnRight,
    BackwardThenLeft,
    Stop,
}

impl fmt::Display for MovementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MovementAction::Forward => "forward",
            MovementAction::TurnLeft => "turn left",
            MovementAction::TurnRight => "turn right",
            MovementAction::BackwardThenLeft => "backward then left",
            MovementAction::Stop => "stop",
        };
        f.write_str(label)
    }
}

/// Pick the movement for an obstacle report.
///
/// | L | C | R | action           |
/// |---|---|---|------------------|
/// | - | 0 | - | Forward          |
/// | 0 | 1 | - | TurnLeft         |
/// | 1 | 1 | 0 | TurnRight        |
/// | 1 | 1 | 1 | BackwardThenLeft |
pub fn decide(report: ObstacleReport) -> MovementAction {
    match (report.left, report.center, report.right) {
        (_, false, _) => MovementAction::Forward,
        (false, true, _) => MovementAction::TurnLeft,
        (true, true, false) => MovementAction::TurnRight,
        (true, true, true) => MovementAction::BackwardThenLeft,
    }
}
