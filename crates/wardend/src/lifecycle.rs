//! Node-wide lifecycle state machine.
//!
//! [`NodeLifecycle::try_to_move_to`] is the only mutation path. Transitions
//! outside the adjacency table are rejected and leave the state untouched,
//! which is what stops a late "operational" event from re-entering
//! `Starting` once a hard stop has begun.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

/// States of a supervisor node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Created, nothing scheduled yet.
    Init,
    /// Child processes are being launched.
    Starting,
    /// Every enabled child process reported operational.
    Operational,
    /// Processes are being stopped ahead of an in-place restart.
    Restarting,
    /// A graceful stop is in progress.
    Stopping,
    /// A hard stop is in progress.
    HardStopping,
    /// Every process is down; releasing supervisor resources.
    FinalizeStopping,
    /// Terminal state.
    Stopped,
}

impl NodeState {
    /// Every state, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Init,
        Self::Starting,
        Self::Operational,
        Self::Restarting,
        Self::Stopping,
        Self::HardStopping,
        Self::FinalizeStopping,
        Self::Stopped,
    ];

    /// Returns `true` when the adjacency table allows `self -> to`.
    #[must_use]
    pub const fn can_move_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Init, Self::Starting)
                | (
                    Self::Starting,
                    Self::Operational | Self::Restarting | Self::Stopping | Self::HardStopping
                )
                | (
                    Self::Operational,
                    Self::Restarting | Self::Stopping | Self::HardStopping
                )
                | (Self::Stopping, Self::FinalizeStopping | Self::HardStopping)
                | (Self::Restarting, Self::Starting | Self::HardStopping)
                | (Self::HardStopping, Self::FinalizeStopping)
                | (Self::FinalizeStopping, Self::Stopped)
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Init => "INIT",
            Self::Starting => "STARTING",
            Self::Operational => "OPERATIONAL",
            Self::Restarting => "RESTARTING",
            Self::Stopping => "STOPPING",
            Self::HardStopping => "HARD_STOPPING",
            Self::FinalizeStopping => "FINALIZE_STOPPING",
            Self::Stopped => "STOPPED",
        };
        formatter.write_str(label)
    }
}

/// Synchronised holder of the current [`NodeState`].
#[derive(Debug)]
pub struct NodeLifecycle {
    state: Mutex<NodeState>,
}

impl Default for NodeLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeLifecycle {
    /// Builds a lifecycle in [`NodeState::Init`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NodeState::Init),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> NodeState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commits `to` when the table allows it from the current state.
    pub fn try_to_move_to(&self, to: NodeState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let from = *state;
        let moved = from.can_move_to(to);
        if moved {
            *state = to;
        }
        debug!(
            target: LIFECYCLE_TARGET,
            %from,
            %to,
            moved,
            "node lifecycle transition requested"
        );
        moved
    }
}
