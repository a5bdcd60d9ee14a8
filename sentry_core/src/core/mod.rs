pub mod actuator;
pub mod node;
pub mod safety;

pub use actuator::{ActuatorOutputs, ActuatorPort, ActuatorSnapshot, HaltReason, Indicator};
pub use node::{run_node, Node, NodeState, Tick};
pub use safety::{Interrupt, SafetyGate, ShutdownHandle};
