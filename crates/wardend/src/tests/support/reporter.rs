//! Test double for [`HealthReporter`] that records structured events for assertions.

use std::sync::Mutex;

use warden_types::ProcessKind;

use crate::health::HealthReporter;
use crate::lifecycle::NodeState;
use crate::process::LaunchError;
use crate::reloader::ReloadError;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    NodeState(NodeState),
    Launched(ProcessKind),
    Operational(ProcessKind),
    Stopped(ProcessKind),
    LaunchFailed(ProcessKind),
    RestartRequested(ProcessKind),
    RestartFailed(String),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    /// Node states in the order they were committed.
    pub fn node_states(&self) -> Vec<NodeState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HealthEvent::NodeState(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn node_state_changed(&self, state: NodeState) {
        self.record(HealthEvent::NodeState(state));
    }

    fn process_launched(&self, kind: ProcessKind) {
        self.record(HealthEvent::Launched(kind));
    }

    fn process_operational(&self, kind: ProcessKind) {
        self.record(HealthEvent::Operational(kind));
    }

    fn process_stopped(&self, kind: ProcessKind) {
        self.record(HealthEvent::Stopped(kind));
    }

    fn launch_failed(&self, error: &LaunchError) {
        self.record(HealthEvent::LaunchFailed(error.kind()));
    }

    fn restart_requested(&self, kind: ProcessKind) {
        self.record(HealthEvent::RestartRequested(kind));
    }

    fn restart_failed(&self, error: &ReloadError) {
        self.record(HealthEvent::RestartFailed(error.to_string()));
    }
}
