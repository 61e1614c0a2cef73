//! Spawns supervised processes from their launch specification.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use tempfile::Builder;
use tracing::{info, warn};

use warden_types::ProcessKind;

use super::PROCESS_TARGET;
use super::commands::LaunchCommand;
use super::errors::LaunchError;
use super::es::{EsManagedProcess, HttpEsConnector};
use super::ipc::{AllProcessesCommands, IpcError};
use super::managed::{ChildProcess, ManagedProcess, ProcessCommandsManagedProcess};

/// Turns launch specifications into running, monitored processes.
pub trait ProcessLauncher: Send + Sync {
    /// Prepares and spawns the process described by `command`.
    fn launch(&self, command: &LaunchCommand) -> Result<Arc<dyn ManagedProcess>, LaunchError>;

    /// Releases launcher resources, including the IPC flag store.
    fn close(&self);
}

/// Launcher spawning real OS processes.
#[derive(Debug)]
pub struct SystemProcessLauncher {
    ipc: Arc<AllProcessesCommands>,
    temp_dir: PathBuf,
}

impl SystemProcessLauncher {
    /// Builds a launcher writing scratch files into `temp_dir`.
    #[must_use]
    pub fn new(ipc: Arc<AllProcessesCommands>, temp_dir: &Path) -> Self {
        Self {
            ipc,
            temp_dir: temp_dir.to_path_buf(),
        }
    }

    fn write_arguments_file(&self, command: &LaunchCommand) -> Result<PathBuf, LaunchError> {
        let kind = command.kind();
        let file_error = |source| LaunchError::ArgumentsFile { kind, source };
        let mut file = Builder::new()
            .prefix(&format!("{}-args-", kind.key()))
            .suffix(".properties")
            .tempfile_in(&self.temp_dir)
            .map_err(file_error)?;
        file.write_all(command.arguments_file_content().as_bytes())
            .map_err(file_error)?;
        // The child reads the file after spawn; temp is cleaned on restart.
        let (_, path) = file.keep().map_err(|error| file_error(error.error))?;
        Ok(path)
    }

    fn spawn(&self, command: &LaunchCommand) -> Result<ChildProcess, LaunchError> {
        let kind = command.kind();
        let arguments_path = if command.uses_arguments_file() {
            Some(self.write_arguments_file(command)?)
        } else {
            None
        };
        let mut process = Command::new(command.executable());
        process
            .args(command.argv(arguments_path.as_deref()))
            .current_dir(command.work_dir())
            .envs(command.environment())
            .stdin(Stdio::null());
        for name in command.suppressed_environment() {
            process.env_remove(name);
        }
        let child = process
            .spawn()
            .map_err(|source| LaunchError::Spawn { kind, source })?;
        info!(
            target: PROCESS_TARGET,
            process = %kind,
            pid = child.id(),
            executable = %command.executable().display(),
            "process spawned"
        );
        Ok(ChildProcess::new(kind, child))
    }
}

impl ProcessLauncher for SystemProcessLauncher {
    fn launch(&self, command: &LaunchCommand) -> Result<Arc<dyn ManagedProcess>, LaunchError> {
        let kind = command.kind();
        if let Some(installation) = command.search_installation() {
            installation.prepare()?;
            installation.install_secrets()?;
            let connector = HttpEsConnector::for_installation(installation)
                .map_err(|source| LaunchError::Connector { kind, source })?;
            let child = self.spawn(command)?;
            return Ok(Arc::new(EsManagedProcess::new(child, Box::new(connector))));
        }

        let commands = self
            .ipc
            .create_after_clean(kind.ipc_index())
            .map_err(|source| LaunchError::Ipc { kind, source })?;
        let child = self.spawn(command)?;
        if !self.ipc.is_open() {
            destroy_half_created(kind, &child);
            return Err(LaunchError::Ipc {
                kind,
                source: IpcError::Closed,
            });
        }
        Ok(Arc::new(ProcessCommandsManagedProcess::new(child, commands)))
    }

    fn close(&self) {
        self.ipc.close();
    }
}

fn destroy_half_created(kind: ProcessKind, child: &ChildProcess) {
    warn!(
        target: PROCESS_TARGET,
        process = %kind,
        pid = child.pid(),
        "destroying half-created process"
    );
    child.kill();
}
