//! Runs a node from configuration loading to the final stop.

mod errors;
mod guard;
mod shutdown;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use warden_config::Config;
use warden_types::ProcessKind;

use crate::app_state::{self, ClusterMembership};
use crate::bootstrap::{ConfigLoader, Settings};
use crate::filesystem::NodeFileSystem;
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::process::ipc::{AllProcessesCommands, ProcessCommands};
use crate::process::{
    CommandFactory, DEFAULT_HARD_STOP_TIMEOUT, DefaultCommandFactory, ProcessLauncher,
    SystemProcessLauncher,
};
use crate::reloader::DefaultAppReloader;
use crate::scheduler::Scheduler;
use crate::telemetry;
use crate::watcher::{RequestWatcher, hard_stop_request_watcher, stop_request_watcher};

pub use errors::RuntimeError;
pub use shutdown::{
    ShutdownAction, ShutdownError, ShutdownListener, ShutdownSignal, SystemShutdownSignal,
};

pub(crate) const RUNTIME_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::runtime");

use guard::{HealthState, NodeGuard};

/// Builds the launcher of a node once its IPC flag store is open.
pub type LauncherFactory =
    Box<dyn FnOnce(&Config, Arc<AllProcessesCommands>) -> Arc<dyn ProcessLauncher>>;

/// Collaborators needed to run a node.
pub struct NodePlan {
    loader: Arc<dyn ConfigLoader>,
    shutdown: Box<dyn ShutdownSignal>,
    reporter: Arc<dyn HealthReporter>,
    launcher: LauncherFactory,
    commands: Arc<dyn CommandFactory>,
    membership: Option<Arc<dyn ClusterMembership>>,
    hard_stop_timeout: Duration,
}

impl NodePlan {
    /// Production collaborators around `loader`.
    #[must_use]
    pub fn new(loader: Arc<dyn ConfigLoader>) -> Self {
        Self {
            loader,
            shutdown: Box::new(SystemShutdownSignal),
            reporter: Arc::new(StructuredHealthReporter::new()),
            launcher: Box::new(|config, ipc| {
                Arc::new(SystemProcessLauncher::new(ipc, config.paths().temp()))
            }),
            commands: Arc::new(DefaultCommandFactory::new()),
            membership: None,
            hard_stop_timeout: DEFAULT_HARD_STOP_TIMEOUT,
        }
    }

    /// Replaces the termination signal listener.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Box<dyn ShutdownSignal>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Replaces the health reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn HealthReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Replaces the process launcher.
    #[must_use]
    pub fn with_launcher(mut self, launcher: LauncherFactory) -> Self {
        self.launcher = launcher;
        self
    }

    /// Replaces the launch command factory.
    #[must_use]
    pub fn with_command_factory(mut self, commands: Arc<dyn CommandFactory>) -> Self {
        self.commands = commands;
        self
    }

    /// Joins cluster nodes through `membership`.
    #[must_use]
    pub fn with_membership(mut self, membership: Arc<dyn ClusterMembership>) -> Self {
        self.membership = Some(membership);
        self
    }

    /// Time granted to each process after a hard stop request.
    #[must_use]
    pub fn with_hard_stop_timeout(mut self, timeout: Duration) -> Self {
        self.hard_stop_timeout = timeout;
        self
    }
}

/// Runs a node until it stops.
///
/// Returns once every child process is stopped and the runtime files are
/// removed. A launch failure stops the node and is returned afterwards.
pub fn run_node_with(plan: NodePlan) -> Result<(), RuntimeError> {
    let NodePlan {
        loader,
        shutdown,
        reporter,
        launcher,
        commands,
        membership,
        hard_stop_timeout,
    } = plan;

    let config = loader.load().map_err(|source| RuntimeError::Config { source })?;
    telemetry::initialise(&config).map_err(|source| RuntimeError::Telemetry { source })?;
    info!(
        target: RUNTIME_TARGET,
        node = config.node_name(),
        cluster = config.cluster_enabled(),
        "starting node"
    );

    let paths = config.paths();
    fs::create_dir_all(paths.temp()).map_err(|source| RuntimeError::TempDirectory {
        path: paths.temp().to_path_buf(),
        source,
    })?;
    let mut guard = NodeGuard::acquire(&paths)?;
    guard.write_pid(std::process::id())?;
    guard.write_health(HealthState::Starting)?;
    NodeFileSystem::new(paths.clone())
        .reset()
        .map_err(|source| RuntimeError::FileSystem { source })?;

    let ipc = Arc::new(
        AllProcessesCommands::open(&paths.ipc_path())
            .map_err(|source| RuntimeError::Ipc { source })?,
    );
    let app_commands = ipc
        .create_after_clean(ProcessKind::App.ipc_index())
        .map_err(|source| RuntimeError::Ipc { source })?;
    let app_state = app_state::create(&config, membership);
    let launcher = launcher(&config, Arc::clone(&ipc));
    let reloader = Arc::new(DefaultAppReloader::new(loader, Arc::clone(&app_state)));
    let scheduler = Scheduler::builder(
        Settings::new(config.clone()),
        Arc::clone(&app_state),
        Arc::clone(&launcher),
        reloader,
    )
    .command_factory(commands)
    .reporter(reporter)
    .hard_stop_timeout(hard_stop_timeout)
    .build();

    let outcome = supervise(&config, &scheduler, &app_commands, shutdown.as_ref(), &guard);

    launcher.close();
    app_state.close();
    info!(target: RUNTIME_TARGET, "node shutdown completed");
    outcome
}

fn supervise(
    config: &Config,
    scheduler: &Scheduler,
    app_commands: &ProcessCommands,
    shutdown: &dyn ShutdownSignal,
    guard: &NodeGuard,
) -> Result<(), RuntimeError> {
    let watchers: Vec<RequestWatcher> = stop_request_watcher(
        config,
        app_commands.clone(),
        scheduler.clone(),
    )
    .into_iter()
    .chain([hard_stop_request_watcher(
        config,
        app_commands.clone(),
        scheduler.clone(),
    )])
    .collect();
    for watcher in &watchers {
        if let Err(source) = watcher.start_watching() {
            scheduler.hard_stop();
            return Err(RuntimeError::Watcher {
                name: watcher.name(),
                source,
            });
        }
    }
    let signal_scheduler = scheduler.clone();
    let listener = match shutdown.listen(Box::new(move || signal_scheduler.hard_stop())) {
        Ok(listener) => listener,
        Err(source) => {
            scheduler.hard_stop();
            return Err(source.into());
        }
    };

    app_commands.set_up();
    let scheduled = scheduler
        .schedule()
        .map_err(|source| RuntimeError::Scheduler { source });
    let running = scheduled
        .and_then(|()| guard.write_health(HealthState::Running))
        .inspect_err(|run_error| {
            error!(
                target: RUNTIME_TARGET,
                error = %run_error,
                "node failed to start"
            );
            scheduler.hard_stop();
        });
    scheduler.await_termination();

    for watcher in &watchers {
        watcher.stop_watching();
    }
    listener.close();
    running.and_then(|()| guard.write_health(HealthState::Stopping))
}

/// Asks the node configured by `config` to stop through its IPC flag store.
///
/// A graceful request is honoured only when the node enables the stop
/// command; a hard stop request always is.
pub fn request_stop(config: &Config, hard: bool) -> Result<(), RuntimeError> {
    let ipc = Arc::new(
        AllProcessesCommands::open(&config.paths().ipc_path())
            .map_err(|source| RuntimeError::Ipc { source })?,
    );
    let commands = ipc
        .slot(ProcessKind::App.ipc_index())
        .map_err(|source| RuntimeError::Ipc { source })?;
    if hard {
        commands.ask_for_hard_stop();
    } else {
        commands.ask_for_stop();
    }
    info!(
        target: RUNTIME_TARGET,
        hard,
        file = %ipc.path().display(),
        "stop requested"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use rstest::rstest;
    use tempfile::TempDir;

    use crate::bootstrap::StaticConfigLoader;
    use crate::tests::support::{FakeLauncher, fast_config};

    struct SilentSignal;

    impl ShutdownSignal for SilentSignal {
        fn listen(&self, _action: ShutdownAction) -> Result<ShutdownListener, ShutdownError> {
            Ok(ShutdownListener::inert())
        }
    }

    #[rstest]
    fn node_runs_until_a_hard_stop_request() {
        let dir = TempDir::new().expect("temp dir");
        let config = fast_config(&dir);
        let launcher = FakeLauncher::new();
        let factory_launcher: Arc<dyn ProcessLauncher> = launcher.clone();
        let plan = NodePlan::new(Arc::new(StaticConfigLoader::new(config.clone())))
            .with_shutdown(Box::new(SilentSignal))
            .with_launcher(Box::new(move |_, _| factory_launcher))
            .with_hard_stop_timeout(Duration::from_millis(500));

        let stopper = {
            let launcher = Arc::clone(&launcher);
            let config = config.clone();
            thread::spawn(move || {
                let launched = launcher.wait_for_launch(ProcessKind::Elasticsearch).is_some();
                let pid_written = config.paths().pid_path().exists();
                request_stop(&config, true).expect("request hard stop");
                (launched, pid_written)
            })
        };
        run_node_with(plan).expect("node run");
        let (launched, pid_written) = stopper.join().expect("stopper thread");

        assert!(launched);
        assert!(pid_written);
        assert!(launcher.is_closed());
        let paths = config.paths();
        assert!(!paths.lock_path().exists());
        assert!(!paths.pid_path().exists());
        assert!(!paths.health_path().exists());
        assert!(paths.data().is_dir());
    }

    #[rstest]
    fn stop_requests_raise_the_app_flags() {
        let dir = TempDir::new().expect("temp dir");
        let config = fast_config(&dir);
        fs::create_dir_all(config.paths().temp()).expect("temp dir");

        request_stop(&config, false).expect("graceful request");

        let store = AllProcessesCommands::open(&config.paths().ipc_path())
            .map(Arc::new)
            .expect("open store");
        let app = store.slot(ProcessKind::App.ipc_index()).expect("app slot");
        assert!(app.asked_for_stop());
        assert!(!app.asked_for_hard_stop());

        request_stop(&config, true).expect("hard request");
        assert!(app.asked_for_hard_stop());
    }
}
