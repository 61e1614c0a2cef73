//! Supervisor of one warden node.
//!
//! A node runs up to three child processes: the search engine, the web
//! server, and the compute engine. The supervisor launches them in
//! dependency order, watches them through a file-backed IPC flag store and
//! their exit status, and stops them in reverse order when asked to or when
//! any of them dies unexpectedly.
//!
//! The [`Scheduler`] owns the ordering and stop logic and is driven by three
//! kinds of input:
//!
//! - process events (operational, restart requested) and lifecycle
//!   transitions reported by each [`process::ManagedProcessHandler`];
//! - operational transitions recorded by the [`app_state::AppState`],
//!   including those published by other nodes of a cluster;
//! - stop requests read from the IPC flag store by the stop watchers, and
//!   termination signals.
//!
//! Every transition of the node goes through the [`NodeLifecycle`] table, so
//! racing stop and restart triggers resolve to a single winner.
//!
//! ## Restart
//!
//! A child process may ask for a restart of the whole node. The scheduler
//! hard stops every process, reloads the configuration, checks that no
//! protected property changed, resets the node directories, and schedules a
//! fresh generation of processes. Cluster nodes refuse to restart in place.

pub mod app_state;
mod bootstrap;
mod filesystem;
mod health;
mod lifecycle;
pub mod process;
mod reloader;
mod runtime;
mod scheduler;
mod telemetry;
mod watcher;
mod worker;

pub use bootstrap::{
    ArgsConfigLoader, ConfigLoader, Settings, StaticConfigLoader, SystemConfigLoader,
};
pub use filesystem::{FileSystemError, NodeFileSystem};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use lifecycle::{NodeLifecycle, NodeState};
pub use reloader::{AppReloader, DefaultAppReloader, ReloadError};
pub use runtime::{
    LauncherFactory, NodePlan, RuntimeError, ShutdownAction, ShutdownError, ShutdownListener,
    ShutdownSignal, SystemShutdownSignal, request_stop, run_node_with,
};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerError};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use watcher::{RequestWatcher, hard_stop_request_watcher, stop_request_watcher};
pub use worker::{CancelToken, is_cancelled, sleep_unless_cancelled};

#[cfg(test)]
mod tests;
