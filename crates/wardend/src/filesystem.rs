//! Node directory preparation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use warden_config::{IPC_FILE_NAME, NodePaths};

const FILESYSTEM_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::filesystem");

/// Errors raised while preparing node directories.
#[derive(Debug, Error)]
pub enum FileSystemError {
    /// A node directory could not be created.
    #[error("failed to create directory '{path}': {source}")]
    Create {
        /// Directory being created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A stale entry of the temp directory could not be removed.
    #[error("failed to clean '{path}': {source}")]
    Clean {
        /// Entry being removed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Directories owned by one node.
#[derive(Debug, Clone)]
pub struct NodeFileSystem {
    paths: NodePaths,
}

impl NodeFileSystem {
    /// Wraps the directory layout of a node.
    #[must_use]
    pub fn new(paths: NodePaths) -> Self {
        Self { paths }
    }

    /// Directory layout.
    pub fn paths(&self) -> &NodePaths {
        &self.paths
    }

    /// Creates every node directory and empties the temp directory.
    ///
    /// The IPC flag store and supervisor runtime files survive the clean-up
    /// since launch commands and the stop commands keep addressing them.
    pub fn reset(&self) -> Result<(), FileSystemError> {
        for dir in [
            self.paths.data(),
            self.paths.web(),
            self.paths.logs(),
            self.paths.temp(),
        ] {
            fs::create_dir_all(dir).map_err(|source| FileSystemError::Create {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let temp = self.paths.temp();
        let entries = fs::read_dir(temp).map_err(|source| FileSystemError::Clean {
            path: temp.to_path_buf(),
            source,
        })?;
        let kept = self.kept_entries();
        for entry in entries {
            let entry = entry.map_err(|source| FileSystemError::Clean {
                path: temp.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if kept.iter().any(|keep| keep == &path) {
                continue;
            }
            remove_entry(&path)?;
            debug!(
                target: FILESYSTEM_TARGET,
                path = %path.display(),
                "removed stale temp entry"
            );
        }
        info!(
            target: FILESYSTEM_TARGET,
            temp = %temp.display(),
            "node directories ready"
        );
        Ok(())
    }

    fn kept_entries(&self) -> [PathBuf; 4] {
        [
            self.paths.temp().join(IPC_FILE_NAME),
            self.paths.lock_path(),
            self.paths.pid_path(),
            self.paths.health_path(),
        ]
    }
}

fn remove_entry(path: &Path) -> Result<(), FileSystemError> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Err(error) if error.kind() != io::ErrorKind::NotFound => Err(FileSystemError::Clean {
            path: path.to_path_buf(),
            source: error,
        }),
        _ => Ok(()),
    }
}
