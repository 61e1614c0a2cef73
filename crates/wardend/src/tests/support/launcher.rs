//! Launcher double handing out [`FakeProcess`]es.

use std::collections::BTreeSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use warden_types::ProcessKind;

use crate::process::{
    LaunchCommand, LaunchError, ManagedProcess, ProcessLauncher, STARTUP_LEADER_ARGUMENT,
};

use super::FakeProcess;

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// One call to [`ProcessLauncher::launch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Launch {
    pub kind: ProcessKind,
    /// Value of the startup leader argument, for web server launches.
    pub first_start: Option<bool>,
}

#[derive(Default)]
struct LauncherState {
    launches: Vec<Launch>,
    processes: Vec<Arc<FakeProcess>>,
    failing: BTreeSet<ProcessKind>,
}

/// Records launches and returns cooperative fake processes.
#[derive(Default)]
pub struct FakeLauncher {
    state: Mutex<LauncherState>,
    changed: Condvar,
    closed: AtomicBool,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every later launch of `kind` fail with a spawn error.
    pub fn fail_on(&self, kind: ProcessKind) {
        self.lock().failing.insert(kind);
    }

    pub fn launches(&self) -> Vec<Launch> {
        self.lock().launches.clone()
    }

    pub fn launched_kinds(&self) -> Vec<ProcessKind> {
        self.launches().into_iter().map(|launch| launch.kind).collect()
    }

    /// Most recent process launched for `kind`.
    pub fn process(&self, kind: ProcessKind) -> Option<Arc<FakeProcess>> {
        self.lock()
            .processes
            .iter()
            .rev()
            .find(|process| process.kind() == kind)
            .cloned()
    }

    /// Waits until `count` launches of `kind` happened; returns the latest.
    pub fn wait_for_launches(&self, kind: ProcessKind, count: usize) -> Option<Arc<FakeProcess>> {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, WAIT_TIMEOUT, |state| {
                launch_count(state, kind) < count
            })
            .expect("launcher mutex poisoned");
        if launch_count(&state, kind) < count {
            return None;
        }
        drop(state);
        self.process(kind)
    }

    pub fn wait_for_launch(&self, kind: ProcessKind) -> Option<Arc<FakeProcess>> {
        self.wait_for_launches(kind, 1)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LauncherState> {
        self.state.lock().expect("launcher mutex poisoned")
    }
}

fn launch_count(state: &LauncherState, kind: ProcessKind) -> usize {
    state
        .launches
        .iter()
        .filter(|launch| launch.kind == kind)
        .count()
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, command: &LaunchCommand) -> Result<Arc<dyn ManagedProcess>, LaunchError> {
        let kind = command.kind();
        let first_start = command
            .argument(STARTUP_LEADER_ARGUMENT)
            .and_then(|value| value.parse::<bool>().ok());
        let mut state = self.lock();
        state.launches.push(Launch { kind, first_start });
        let result = if state.failing.contains(&kind) {
            Err(LaunchError::Spawn {
                kind,
                source: io::Error::new(io::ErrorKind::NotFound, "intentional test failure"),
            })
        } else {
            let process = FakeProcess::new(kind);
            state.processes.push(Arc::clone(&process));
            Ok(process as Arc<dyn ManagedProcess>)
        };
        drop(state);
        self.changed.notify_all();
        result
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
