use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{info, warn};

use warden_config::NodePaths;

use super::RUNTIME_TARGET;
use super::errors::RuntimeError;

/// Lock, PID, and health files of a running supervisor.
///
/// The files are removed when the guard is dropped.
#[derive(Debug)]
pub(super) struct NodeGuard {
    lock_path: PathBuf,
    pid_path: PathBuf,
    health_path: PathBuf,
    _lock: File,
    pid: Option<u32>,
}

impl NodeGuard {
    pub(super) fn acquire(paths: &NodePaths) -> Result<Self, RuntimeError> {
        let lock_path = paths.lock_path();
        let pid_path = paths.pid_path();
        let lock = acquire_lock(&lock_path, &pid_path)?;
        Ok(Self {
            lock_path,
            pid_path,
            health_path: paths.health_path(),
            _lock: lock,
            pid: None,
        })
    }

    pub(super) fn write_pid(&mut self, pid: u32) -> Result<(), RuntimeError> {
        let path = self.pid_path.as_path();
        let pid_error = |source| RuntimeError::PidWrite {
            path: path.to_path_buf(),
            source,
        };
        let mut file = private_file().open(path).map_err(pid_error)?;
        writeln!(file, "{pid}").map_err(pid_error)?;
        file.sync_all().map_err(pid_error)?;
        self.pid = Some(pid);
        info!(
            target: RUNTIME_TARGET,
            pid,
            file = %path.display(),
            "pid file written"
        );
        Ok(())
    }

    pub(super) fn write_health(&self, status: HealthState) -> Result<(), RuntimeError> {
        let pid = self.pid.ok_or(RuntimeError::MissingPid)?;
        let path = self.health_path.as_path();
        let health_error = |source| RuntimeError::HealthWrite {
            path: path.to_path_buf(),
            source,
        };
        let mut file = private_file().open(path).map_err(health_error)?;
        let snapshot = HealthSnapshot::new(status, pid)?;
        serde_json::to_writer(&mut file, &snapshot)?;
        file.write_all(b"\n").map_err(health_error)?;
        file.sync_all().map_err(health_error)?;
        info!(
            target: RUNTIME_TARGET,
            status = snapshot.status,
            file = %path.display(),
            "health snapshot updated"
        );
        Ok(())
    }
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        for (path, label) in [
            (&self.lock_path, "lock"),
            (&self.pid_path, "pid"),
            (&self.health_path, "health"),
        ] {
            match fs::remove_file(path) {
                Err(error) if error.kind() != io::ErrorKind::NotFound => {
                    warn!(
                        target: RUNTIME_TARGET,
                        file = %path.display(),
                        error = %error,
                        "failed to remove {label} file"
                    );
                }
                _ => {}
            }
        }
    }
}

/// Status published in the supervisor health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum HealthState {
    Starting,
    Running,
    Stopping,
}

impl HealthState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthSnapshot<'a> {
    status: &'a str,
    pid: u32,
    timestamp: u64,
}

impl HealthSnapshot<'_> {
    fn new(state: HealthState, pid: u32) -> Result<Self, RuntimeError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|source| RuntimeError::Clock { source })?
            .as_secs();
        Ok(Self {
            status: state.as_str(),
            pid,
            timestamp,
        })
    }
}

fn private_file() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

fn acquire_lock(lock_path: &Path, pid_path: &Path) -> Result<File, RuntimeError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    match options.open(lock_path) {
        Ok(file) => {
            info!(
                target: RUNTIME_TARGET,
                file = %lock_path.display(),
                "acquired node lock"
            );
            Ok(file)
        }
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
            handle_existing_lock(lock_path, pid_path)
        }
        Err(source) => Err(RuntimeError::LockCreate {
            path: lock_path.to_path_buf(),
            source,
        }),
    }
}

fn handle_existing_lock(lock_path: &Path, pid_path: &Path) -> Result<File, RuntimeError> {
    if let Some(pid) = read_pid(pid_path)
        && pid != 0
    {
        if check_process(pid)? {
            info!(
                target: RUNTIME_TARGET,
                pid,
                "refusing to start: existing supervisor alive"
            );
            return Err(RuntimeError::AlreadyRunning { pid });
        }
        warn!(
            target: RUNTIME_TARGET,
            pid,
            "existing supervisor not detected; cleaning stale files"
        );
    }
    remove_file(lock_path)?;
    remove_file(pid_path)?;
    acquire_lock(lock_path, pid_path)
}

fn read_pid(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse::<u32>().ok()
}

fn remove_file(path: &Path) -> Result<(), RuntimeError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RuntimeError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn check_process(pid: u32) -> Result<bool, RuntimeError> {
    let Ok(raw) = i32::try_from(pid) else {
        return Ok(false);
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH | Errno::ECHILD) => Ok(false),
        Err(errno) => Err(RuntimeError::CheckProcess { pid, source: errno }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::Value;
    use tempfile::TempDir;
    use warden_config::Config;

    fn paths(dir: &TempDir) -> NodePaths {
        let config = Config {
            temp_path: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        config.paths()
    }

    #[rstest]
    fn guard_writes_and_removes_runtime_files() {
        let dir = TempDir::new().expect("temp dir");
        let paths = paths(&dir);
        {
            let mut guard = NodeGuard::acquire(&paths).expect("acquire guard");
            guard.write_pid(std::process::id()).expect("write pid");
            guard.write_health(HealthState::Running).expect("write health");

            let health = fs::read_to_string(paths.health_path()).expect("read health");
            let snapshot: Value = serde_json::from_str(&health).expect("parse health");
            assert_eq!(snapshot["status"], "running");
            assert_eq!(snapshot["pid"], std::process::id());
        }
        assert!(!paths.lock_path().exists());
        assert!(!paths.pid_path().exists());
        assert!(!paths.health_path().exists());
    }

    #[rstest]
    fn live_supervisor_keeps_the_lock() {
        let dir = TempDir::new().expect("temp dir");
        let paths = paths(&dir);
        let mut first = NodeGuard::acquire(&paths).expect("acquire guard");
        first.write_pid(std::process::id()).expect("write pid");

        let second = NodeGuard::acquire(&paths);

        assert!(matches!(second, Err(RuntimeError::AlreadyRunning { .. })));
    }

    #[rstest]
    fn stale_lock_is_reclaimed() {
        let dir = TempDir::new().expect("temp dir");
        let paths = paths(&dir);
        fs::write(paths.lock_path(), "").expect("stale lock");
        fs::write(paths.pid_path(), "0\n").expect("stale pid");

        let guard = NodeGuard::acquire(&paths);

        assert!(guard.is_ok());
    }

    #[rstest]
    fn health_requires_a_pid() {
        let dir = TempDir::new().expect("temp dir");
        let guard = NodeGuard::acquire(&paths(&dir)).expect("acquire guard");
        assert!(matches!(
            guard.write_health(HealthState::Starting),
            Err(RuntimeError::MissingPid)
        ));
    }
}
