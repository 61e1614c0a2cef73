//! Derives the directory layout shared by the supervisor and its children.
//!
//! The temp directory houses the supervisor lock, pid, health snapshot, and
//! the IPC flag store. Child processes and the `stop` commands need to agree
//! on the layout so they address the same files.

use std::path::{Path, PathBuf};

use crate::Config;

/// File name of the IPC flag store inside the temp directory.
pub const IPC_FILE_NAME: &str = "sharedmemory";

/// Canonical directories and runtime artefacts of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePaths {
    home: PathBuf,
    data: PathBuf,
    web: PathBuf,
    logs: PathBuf,
    temp: PathBuf,
}

impl NodePaths {
    /// Derives node paths from the configuration.
    ///
    /// Relative directories are resolved against the home directory.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let home = config.home_path.clone().unwrap_or_else(|| PathBuf::from("."));
        let resolve = |value: Option<&PathBuf>, fallback: &str| match value {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => home.join(path),
            None => home.join(fallback),
        };
        Self {
            data: resolve(config.data_path.as_ref(), "data"),
            web: resolve(config.web_path.as_ref(), "web"),
            logs: resolve(config.logs_path.as_ref(), "logs"),
            temp: resolve(config.temp_path.as_ref(), "temp"),
            home,
        }
    }

    /// Installation home.
    pub fn home(&self) -> &Path {
        self.home.as_path()
    }

    /// Persistent data directory.
    pub fn data(&self) -> &Path {
        self.data.as_path()
    }

    /// Static web assets directory.
    pub fn web(&self) -> &Path {
        self.web.as_path()
    }

    /// Log directory shared by every process.
    pub fn logs(&self) -> &Path {
        self.logs.as_path()
    }

    /// Scratch directory, cleaned on every (re)start.
    pub fn temp(&self) -> &Path {
        self.temp.as_path()
    }

    /// Path to the IPC flag store.
    pub fn ipc_path(&self) -> PathBuf {
        self.temp.join(IPC_FILE_NAME)
    }

    /// Path to the lock file guarding singleton startup.
    pub fn lock_path(&self) -> PathBuf {
        self.temp.join("wardend.lock")
    }

    /// Path to the supervisor PID file.
    pub fn pid_path(&self) -> PathBuf {
        self.temp.join("wardend.pid")
    }

    /// Path to the supervisor health snapshot.
    pub fn health_path(&self) -> PathBuf {
        self.temp.join("wardend.health")
    }

    /// Scratch configuration directory of the search engine.
    pub fn search_conf_dir(&self) -> PathBuf {
        self.temp.join("conf").join("es")
    }
}
