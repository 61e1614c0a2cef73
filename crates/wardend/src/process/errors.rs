//! Errors raised while preparing or spawning a child process.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use warden_types::ProcessKind;

use super::es::EsConnectorError;
use super::ipc::IpcError;

/// Errors surfaced while launching a supervised process.
///
/// Every variant names the process kind so the node-level hard stop that
/// follows a launch failure can report which process was at fault.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Pre-launch filesystem preparation failed.
    #[error("failed to prepare {kind} at '{path}': {source}")]
    Prepare {
        /// Process being prepared.
        kind: ProcessKind,
        /// File or directory that could not be written.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Materialising search engine secrets failed.
    #[error("failed to populate the {kind} keystore: {message}")]
    Keystore {
        /// Process whose keystore was being populated.
        kind: ProcessKind,
        /// Description of the failing keystore step.
        message: String,
    },
    /// Spawning the OS process failed.
    #[error("failed to spawn {kind}: {source}")]
    Spawn {
        /// Process being spawned.
        kind: ProcessKind,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the temporary arguments file failed.
    #[error("failed to write the arguments file of {kind}: {source}")]
    ArgumentsFile {
        /// Process whose arguments were being written.
        kind: ProcessKind,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Binding the process to its IPC slot failed.
    #[error("failed to bind {kind} to its IPC slot: {source}")]
    Ipc {
        /// Process being bound.
        kind: ProcessKind,
        /// Underlying flag store error.
        #[source]
        source: IpcError,
    },
    /// Building the search engine health connector failed.
    #[error("failed to build the {kind} health connector: {source}")]
    Connector {
        /// Process whose connector was being built.
        kind: ProcessKind,
        /// Underlying connector error.
        #[source]
        source: EsConnectorError,
    },
    /// Spawning a process watcher thread failed.
    #[error("failed to start the {kind} watchers: {source}")]
    Watcher {
        /// Process being watched.
        kind: ProcessKind,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    /// Process kind the failure relates to.
    #[must_use]
    pub fn kind(&self) -> ProcessKind {
        match self {
            Self::Prepare { kind, .. }
            | Self::Keystore { kind, .. }
            | Self::Spawn { kind, .. }
            | Self::ArgumentsFile { kind, .. }
            | Self::Ipc { kind, .. }
            | Self::Connector { kind, .. }
            | Self::Watcher { kind, .. } => *kind,
        }
    }
}
