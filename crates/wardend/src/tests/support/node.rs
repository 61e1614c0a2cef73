//! Scheduler wired to in-memory collaborators.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use warden_config::Config;
use warden_types::ProcessKind;

use crate::app_state::{AppState, LocalAppState};
use crate::bootstrap::Settings;
use crate::health::HealthReporter;
use crate::lifecycle::NodeState;
use crate::process::ProcessLauncher;
use crate::reloader::AppReloader;
use crate::scheduler::Scheduler;

use super::{FakeLauncher, FakeProcess, RecordingHealthReporter};

pub const TERMINATION_TIMEOUT: Duration = Duration::from_secs(10);
const POLL: Duration = Duration::from_millis(10);

/// Configuration with fast watchers rooted in `dir`.
pub fn fast_config(dir: &TempDir) -> Config {
    Config {
        home_path: Some(dir.path().to_path_buf()),
        temp_path: Some(dir.path().join("temp")),
        process_watcher_delay_ms: Some(10),
        stop_request_poll_ms: Some(10),
        web_graceful_stop_timeout_ms: Some(500),
        ce_graceful_stop_timeout_ms: Some(500),
        ..Config::default()
    }
}

/// A scheduler over a [`FakeLauncher`] and a recording reporter.
pub struct NodeHarness {
    _dir: TempDir,
    pub launcher: Arc<FakeLauncher>,
    pub reporter: Arc<RecordingHealthReporter>,
    pub scheduler: Scheduler,
}

impl NodeHarness {
    /// Standalone node with a fresh [`LocalAppState`].
    pub fn standalone(reloader: impl FnOnce(Arc<dyn AppState>) -> Arc<dyn AppReloader>) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let config = fast_config(&dir);
        let app_state: Arc<dyn AppState> = Arc::new(LocalAppState::new(config.node_host()));
        let reloader = reloader(Arc::clone(&app_state));
        Self::build(dir, config, app_state, reloader)
    }

    /// Node with an explicit configuration and app state.
    pub fn build(
        dir: TempDir,
        config: Config,
        app_state: Arc<dyn AppState>,
        reloader: Arc<dyn AppReloader>,
    ) -> Self {
        let launcher = FakeLauncher::new();
        let reporter = Arc::new(RecordingHealthReporter::default());
        let process_launcher: Arc<dyn ProcessLauncher> = launcher.clone();
        let health: Arc<dyn HealthReporter> = reporter.clone();
        let scheduler =
            Scheduler::builder(Settings::new(config), app_state, process_launcher, reloader)
                .reporter(health)
                .hard_stop_timeout(Duration::from_millis(500))
                .build();
        Self {
            _dir: dir,
            launcher,
            reporter,
            scheduler,
        }
    }

    /// Waits for the `count`th launch of `kind` and marks it operational.
    pub fn make_operational(&self, kind: ProcessKind, count: usize) -> Arc<FakeProcess> {
        let process = self
            .launcher
            .wait_for_launches(kind, count)
            .unwrap_or_else(|| panic!("{kind} launch #{count} did not happen"));
        process.set_operational();
        process
    }

    /// Drives every supervised process of generation `count` to operational.
    pub fn start_all(&self, count: usize) -> Vec<Arc<FakeProcess>> {
        ProcessKind::SUPERVISED
            .into_iter()
            .map(|kind| self.make_operational(kind, count))
            .collect()
    }

    /// Polls until the node reached `state`; returns `false` on timeout.
    pub fn wait_for_state(&self, state: NodeState) -> bool {
        let deadline = Instant::now() + TERMINATION_TIMEOUT;
        while Instant::now() < deadline {
            if self.scheduler.state() == state {
                return true;
            }
            thread::sleep(POLL);
        }
        false
    }

    pub fn await_termination(&self) -> bool {
        self.scheduler.await_termination_timeout(TERMINATION_TIMEOUT)
    }

    pub fn await_termination_timeout(&self, timeout: Duration) -> bool {
        self.scheduler.await_termination_timeout(timeout)
    }
}
