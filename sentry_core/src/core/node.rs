use crate::core::safety::Interrupt;
use crate::error::SentryResult;
use std::fmt;

/// Node states for lifecycle tracking
#[derive(Debug, Clone, PartialEq)]
pub enum NodeState {
    Uninitialized,
    Initializing,
    Running,
    Stopping,
    Stopped,
    Error(String),
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Uninitialized => write!(f, "Uninitialized"),
            NodeState::Initializing => write!(f, "Initializing"),
            NodeState::Running => write!(f, "Running"),
            NodeState::Stopping => write!(f, "Stopping"),
            NodeState::Stopped => write!(f, "Stopped"),
            NodeState::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Finished,
}

/// A unit of work driven in a loop on its own thread
pub trait Node: Send {
    /// Get the node's name (must be unique)
    fn name(&self) -> &'static str;

    /// Initialize the node (called once before the first tick)
    fn init(&mut self) -> SentryResult<()> {
        Ok(())
    }

    /// One iteration of the node's loop.
    ///
    /// Recoverable faults are handled inside the node; an `Err` ends the
    /// loop. `Interrupted(Shutdown)` is the normal way out.
    fn tick(&mut self) -> SentryResult<Tick>;

    /// Shutdown the node (called once after the last tick)
    fn shutdown(&mut self) -> SentryResult<()> {
        Ok(())
    }
}

/// Drive a node through init, ticks and shutdown, returning its final state
pub fn run_node<N: Node + ?Sized>(node: &mut N) -> NodeState {
    let name = node.name();
    let mut state = NodeState::Initializing;
    log::debug!("[{}] {}", name, state);

    if let Err(e) = node.init() {
        log::error!("[{}] initialization failed: {}", name, e);
        return NodeState::Error(format!("Initialization failed: {}", e));
    }
    state = NodeState::Running;
    log::info!("[{}] {}", name, state);

    loop {
        match node.tick() {
            Ok(Tick::Continue) => {}
            Ok(Tick::Finished) => break,
            Err(e) if e.interrupt() == Some(Interrupt::Shutdown) => break,
            Err(e) => {
                log::error!("[{}] stopped on error: {}", name, e);
                state = NodeState::Error(e.to_string());
                break;
            }
        }
    }

    if state == NodeState::Running {
        state = NodeState::Stopping;
    }
    log::debug!("[{}] {}", name, state);
    match node.shutdown() {
        Ok(()) if state == NodeState::Stopping => NodeState::Stopped,
        Ok(()) => state,
        Err(e) => {
            log::error!("[{}] shutdown failed: {}", name, e);
            NodeState::Error(format!("Shutdown failed: {}", e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SentryError;

    struct CountingNode {
        ticks: u32,
        finish_after: u32,
        fail: bool,
        shut_down: bool,
    }

    impl Node for CountingNode {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn tick(&mut self) -> SentryResult<Tick> {
            self.ticks += 1;
            if self.ticks < self.finish_after {
                Ok(Tick::Continue)
            } else if self.fail {
                Err(SentryError::Internal("boom".into()))
            } else {
                Ok(Tick::Finished)
            }
        }

        fn shutdown(&mut self) -> SentryResult<()> {
            self.shut_down = true;
            Ok(())
        }
    }

    #[test]
    fn test_run_to_finish() {
        let mut node = CountingNode {
            ticks: 0,
            finish_after: 3,
            fail: false,
            shut_down: false,
        };
        assert_eq!(run_node(&mut node), NodeState::Stopped);
        assert_eq!(node.ticks, 3);
        assert!(node.shut_down);
    }

    #[test]
    fn test_error_still_shuts_down() {
        let mut node = CountingNode {
            ticks: 0,
            finish_after: 2,
            fail: true,
            shut_down: false,
        };
        assert!(matches!(run_node(&mut node), NodeState::Error(_)));
        assert!(node.shut_down);
    }
}
