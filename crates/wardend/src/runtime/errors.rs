//! Defines the error surface of the supervisor run loop.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTimeError;

use nix::errno::Errno;
use ortho_config::OrthoError;
use thiserror::Error;

use crate::filesystem::FileSystemError;
use crate::process::ipc::IpcError;
use crate::scheduler::SchedulerError;
use crate::telemetry::TelemetryError;

use super::shutdown::ShutdownError;

/// Errors surfaced while running or commanding a node.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The node directories could not be prepared.
    #[error("failed to prepare node directories: {source}")]
    FileSystem {
        /// Underlying filesystem error.
        #[source]
        source: FileSystemError,
    },
    /// The temp directory could not be created ahead of locking.
    #[error("failed to create temp directory '{path}': {source}")]
    TempDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Lock file creation failed.
    #[error("failed to create lock file '{path}': {source}")]
    LockCreate {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A running supervisor already holds the lock.
    #[error("node already running with pid {pid}")]
    AlreadyRunning {
        /// PID recorded in the existing PID file.
        pid: u32,
    },
    /// Removing a stale runtime artefact failed.
    #[error("failed to remove stale file '{path}': {source}")]
    Cleanup {
        /// File that could not be removed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Probing the recorded supervisor PID failed.
    #[error("failed to check whether pid {pid} is alive: {source}")]
    CheckProcess {
        /// PID being probed.
        pid: u32,
        /// Underlying errno.
        #[source]
        source: Errno,
    },
    /// Writing the PID file failed.
    #[error("failed to write pid file '{path}': {source}")]
    PidWrite {
        /// PID file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the health snapshot failed.
    #[error("failed to write health snapshot '{path}': {source}")]
    HealthWrite {
        /// Health file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The health snapshot could not be serialised.
    #[error("failed to serialise health snapshot: {0}")]
    HealthSerialise(#[from] serde_json::Error),
    /// A health snapshot was requested before the PID was recorded.
    #[error("health snapshot requested before the pid file was written")]
    MissingPid,
    /// The system clock is before the Unix epoch.
    #[error("system clock error: {source}")]
    Clock {
        /// Underlying clock error.
        #[source]
        source: SystemTimeError,
    },
    /// The IPC flag store could not be opened or addressed.
    #[error("IPC flag store unavailable: {source}")]
    Ipc {
        /// Underlying IPC error.
        #[source]
        source: IpcError,
    },
    /// Installing the termination signal listener failed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
    /// A stop request watcher could not be spawned.
    #[error("failed to spawn {name}: {source}")]
    Watcher {
        /// Thread name of the watcher.
        name: &'static str,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Starting the child processes failed.
    #[error("failed to start node processes: {source}")]
    Scheduler {
        /// Underlying scheduler error.
        #[source]
        source: SchedulerError,
    },
}
