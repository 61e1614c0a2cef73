//! Handles onto running child processes.

use std::process::Child;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

use warden_types::ProcessKind;

use super::PROCESS_TARGET;
use super::ipc::ProcessCommands;

const WAIT_POLL: Duration = Duration::from_millis(50);

/// A running child process as seen by its handler.
pub trait ManagedProcess: Send + Sync {
    /// Returns `true` while the OS process is running.
    fn is_alive(&self) -> bool;

    /// Waits up to `timeout` for the process to exit.
    ///
    /// Returns `true` when the process is gone.
    fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(WAIT_POLL.min(deadline - now));
        }
    }

    /// Kills the process without giving it a chance to clean up.
    fn destroy_forcibly(&self);

    /// Returns `true` once the process reported itself ready.
    fn is_operational(&self) -> bool;

    /// Asks the process to stop gracefully.
    fn ask_for_stop(&self);

    /// Asks the process to stop as soon as possible.
    fn ask_for_hard_stop(&self);

    /// Returns `true` when the process asked for a node restart.
    fn asked_for_restart(&self) -> bool;

    /// Clears a pending restart request.
    fn acknowledge_ask_for_restart(&self);
}

/// Owned OS child with non-blocking liveness checks.
#[derive(Debug)]
pub(super) struct ChildProcess {
    kind: ProcessKind,
    child: Mutex<Child>,
}

impl ChildProcess {
    pub(super) fn new(kind: ProcessKind, child: Child) -> Self {
        Self {
            kind,
            child: Mutex::new(child),
        }
    }

    pub(super) fn pid(&self) -> u32 {
        self.child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .id()
    }

    pub(super) fn is_alive(&self) -> bool {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(error) => {
                warn!(
                    target: PROCESS_TARGET,
                    process = %self.kind,
                    error = %error,
                    "failed to poll child process"
                );
                false
            }
        }
    }

    pub(super) fn kill(&self) {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        if let Err(error) = child.kill() {
            warn!(
                target: PROCESS_TARGET,
                process = %self.kind,
                error = %error,
                "failed to kill child process"
            );
        }
        if let Err(error) = child.wait() {
            warn!(
                target: PROCESS_TARGET,
                process = %self.kind,
                error = %error,
                "failed to reap child process"
            );
        }
    }
}

/// Child process signalled through its slot in the IPC flag store.
#[derive(Debug)]
pub struct ProcessCommandsManagedProcess {
    child: ChildProcess,
    commands: ProcessCommands,
}

impl ProcessCommandsManagedProcess {
    pub(super) fn new(child: ChildProcess, commands: ProcessCommands) -> Self {
        Self { child, commands }
    }
}

impl ManagedProcess for ProcessCommandsManagedProcess {
    fn is_alive(&self) -> bool {
        self.child.is_alive()
    }

    fn destroy_forcibly(&self) {
        self.child.kill();
    }

    fn is_operational(&self) -> bool {
        self.commands.is_operational()
    }

    fn ask_for_stop(&self) {
        self.commands.ask_for_stop();
    }

    fn ask_for_hard_stop(&self) {
        self.commands.ask_for_hard_stop();
    }

    fn asked_for_restart(&self) -> bool {
        self.commands.asked_for_restart()
    }

    fn acknowledge_ask_for_restart(&self) {
        self.commands.acknowledge_ask_for_restart();
    }
}
