//! Settings reload performed between the stop and the restart of a node.

use std::sync::Arc;

use ortho_config::OrthoError;
use thiserror::Error;
use tracing::info;

use warden_config::{Config, PROTECTED_PROPERTIES};

use crate::app_state::AppState;
use crate::bootstrap::{ConfigLoader, Settings};
use crate::filesystem::{FileSystemError, NodeFileSystem};
use crate::telemetry::{self, TelemetryError};

const RELOADER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::reloader");

/// Errors that abort an in-place restart.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// Cluster nodes cannot restart in place.
    #[error("restart is not possible with cluster mode enabled")]
    ClusterMode,
    /// A property that shapes the node layout changed on disk.
    #[error("property [{property}] cannot be changed on restart: [{old}] => [{new}]")]
    ProtectedPropertyChanged {
        /// Name of the property.
        property: &'static str,
        /// Value the node was started with.
        old: String,
        /// Value found by the reload.
        new: String,
    },
    /// The configuration could not be loaded again.
    #[error("failed to reload configuration: {source}")]
    Load {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// The node directories could not be reset.
    #[error("failed to reset node directories: {source}")]
    FileSystem {
        /// Underlying filesystem error.
        #[source]
        source: FileSystemError,
    },
    /// Logging could not be reconfigured.
    #[error("failed to reconfigure logging: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
}

/// Prepares the node for the next generation of processes.
#[cfg_attr(test, mockall::automock)]
pub trait AppReloader: Send + Sync {
    /// Reloads `settings` in place. On error `settings` is left untouched.
    fn reload(&self, settings: &Settings) -> Result<(), ReloadError>;
}

/// Reloader reading configuration through a [`ConfigLoader`].
pub struct DefaultAppReloader {
    loader: Arc<dyn ConfigLoader>,
    app_state: Arc<dyn AppState>,
}

impl DefaultAppReloader {
    /// Builds a reloader that resets `app_state` after every reload.
    #[must_use]
    pub fn new(loader: Arc<dyn ConfigLoader>, app_state: Arc<dyn AppState>) -> Self {
        Self { loader, app_state }
    }
}

impl AppReloader for DefaultAppReloader {
    fn reload(&self, settings: &Settings) -> Result<(), ReloadError> {
        let current = settings.snapshot();
        if current.cluster_enabled() {
            return Err(ReloadError::ClusterMode);
        }
        let reloaded = self
            .loader
            .load()
            .map_err(|source| ReloadError::Load { source })?;
        ensure_protected_unchanged(&current, &reloaded)?;

        NodeFileSystem::new(reloaded.paths())
            .reset()
            .map_err(|source| ReloadError::FileSystem { source })?;
        telemetry::reconfigure(&reloaded).map_err(|source| ReloadError::Telemetry { source })?;
        settings.replace(reloaded);
        self.app_state.reset();
        info!(target: RELOADER_TARGET, "settings reloaded");
        Ok(())
    }
}

fn ensure_protected_unchanged(current: &Config, reloaded: &Config) -> Result<(), ReloadError> {
    for property in PROTECTED_PROPERTIES {
        let old = current.protected_value(property).unwrap_or_default();
        let new = reloaded.protected_value(property).unwrap_or_default();
        if old != new {
            return Err(ReloadError::ProtectedPropertyChanged { property, old, new });
        }
    }
    Ok(())
}
