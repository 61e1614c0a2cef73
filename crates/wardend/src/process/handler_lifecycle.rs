//! Per-process lifecycle tracked by [`super::ManagedProcessHandler`].

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use tracing::debug;

use warden_types::ProcessKind;

use super::PROCESS_TARGET;

/// States of one supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    /// Handler built, nothing launched.
    Init,
    /// The launch is in progress.
    Starting,
    /// The OS process is running and watched.
    Started,
    /// A graceful stop was requested.
    Stopping,
    /// A hard stop was requested or the process died.
    HardStopping,
    /// The process is gone; releasing watchers.
    FinalizeStopping,
    /// Terminal state.
    Stopped,
}

impl ProcessState {
    /// Returns `true` when `self -> to` is an allowed transition.
    #[must_use]
    pub const fn can_move_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Init, Self::Starting)
                | (
                    Self::Starting,
                    Self::Started | Self::Stopping | Self::HardStopping
                )
                | (Self::Started, Self::Stopping | Self::HardStopping)
                | (Self::Stopping, Self::HardStopping | Self::FinalizeStopping)
                | (Self::HardStopping, Self::FinalizeStopping)
                | (Self::FinalizeStopping, Self::Stopped)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Init => "INIT",
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Stopping => "STOPPING",
            Self::HardStopping => "HARD_STOPPING",
            Self::FinalizeStopping => "FINALIZE_STOPPING",
            Self::Stopped => "STOPPED",
        };
        formatter.write_str(label)
    }
}

/// Receives every committed transition of a process lifecycle.
pub trait ProcessLifecycleListener: Send + Sync {
    /// Invoked after `kind` entered `state`.
    fn on_process_state(&self, kind: ProcessKind, state: ProcessState);
}

pub(super) struct ManagedProcessLifecycle {
    kind: ProcessKind,
    state: Mutex<ProcessState>,
    stopped: Mutex<bool>,
    stopped_changed: Condvar,
    listeners: Vec<Arc<dyn ProcessLifecycleListener>>,
}

impl ManagedProcessLifecycle {
    pub(super) fn new(kind: ProcessKind, listeners: Vec<Arc<dyn ProcessLifecycleListener>>) -> Self {
        Self {
            kind,
            state: Mutex::new(ProcessState::Init),
            stopped: Mutex::new(false),
            stopped_changed: Condvar::new(),
            listeners,
        }
    }

    pub(super) fn state(&self) -> ProcessState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commits `to` when allowed, then notifies listeners outside the lock.
    pub(super) fn try_to_move_to(&self, to: ProcessState) -> bool {
        let from = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let from = *state;
            if !from.can_move_to(to) {
                debug!(
                    target: PROCESS_TARGET,
                    process = %self.kind,
                    %from,
                    %to,
                    "process transition rejected"
                );
                return false;
            }
            *state = to;
            from
        };
        debug!(
            target: PROCESS_TARGET,
            process = %self.kind,
            %from,
            %to,
            "process transition committed"
        );
        for listener in &self.listeners {
            listener.on_process_state(self.kind, to);
        }
        if to == ProcessState::Stopped {
            // Waiters resume only once every listener has seen the stop.
            *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
            self.stopped_changed.notify_all();
        }
        true
    }

    /// Blocks until the lifecycle reaches [`ProcessState::Stopped`].
    pub(super) fn await_stopped(&self) {
        let stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let _stopped = self
            .stopped_changed
            .wait_while(stopped, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
    }
}
