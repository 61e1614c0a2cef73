//! Structured health reporting for supervisor lifecycle events.

use std::sync::Arc;

use warden_types::ProcessKind;

use crate::lifecycle::NodeState;
use crate::process::LaunchError;
use crate::reloader::ReloadError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface supervisor events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked after the node committed a lifecycle transition.
    fn node_state_changed(&self, state: NodeState);

    /// Invoked after a child process was launched.
    fn process_launched(&self, kind: ProcessKind);

    /// Invoked when a child process reported itself operational.
    fn process_operational(&self, kind: ProcessKind);

    /// Invoked once a child process is confirmed stopped.
    fn process_stopped(&self, kind: ProcessKind);

    /// Invoked when launching a child process failed.
    fn launch_failed(&self, error: &LaunchError);

    /// Invoked when a child process asked for a node restart.
    fn restart_requested(&self, kind: ProcessKind);

    /// Invoked when reloading the node for a restart failed.
    fn restart_failed(&self, error: &ReloadError);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn node_state_changed(&self, state: NodeState) {
        (**self).node_state_changed(state);
    }

    fn process_launched(&self, kind: ProcessKind) {
        (**self).process_launched(kind);
    }

    fn process_operational(&self, kind: ProcessKind) {
        (**self).process_operational(kind);
    }

    fn process_stopped(&self, kind: ProcessKind) {
        (**self).process_stopped(kind);
    }

    fn launch_failed(&self, error: &LaunchError) {
        (**self).launch_failed(error);
    }

    fn restart_requested(&self, kind: ProcessKind) {
        (**self).restart_requested(kind);
    }

    fn restart_failed(&self, error: &ReloadError) {
        (**self).restart_failed(error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn node_state_changed(&self, state: NodeState) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "node_state_changed",
            %state,
            "node state changed"
        );
    }

    fn process_launched(&self, kind: ProcessKind) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "process_launched",
            process = %kind,
            "{} launched",
            kind.human_name()
        );
    }

    fn process_operational(&self, kind: ProcessKind) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "process_operational",
            process = %kind,
            "{} is operational",
            kind.human_name()
        );
    }

    fn process_stopped(&self, kind: ProcessKind) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "process_stopped",
            process = %kind,
            "{} is stopped",
            kind.human_name()
        );
    }

    fn launch_failed(&self, error: &LaunchError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "launch_failed",
            process = %error.kind(),
            error = %error,
            "process failed to launch"
        );
    }

    fn restart_requested(&self, kind: ProcessKind) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "restart_requested",
            process = %kind,
            "restart requested by {}",
            kind.human_name()
        );
    }

    fn restart_failed(&self, error: &ReloadError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "restart_failed",
            error = %error,
            "node restart aborted"
        );
    }
}
