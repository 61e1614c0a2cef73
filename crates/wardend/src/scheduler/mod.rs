//! Startup ordering, stop escalation, and in-place restart of a node.
//!
//! The scheduler starts the search engine first, the web server once search
//! is usable, and the compute engine once the web server is operational on
//! this node. It re-evaluates that order whenever the [`AppState`] reports a
//! new operational process, whether local or remote.
//!
//! Every stop funnels into [`Scheduler::hard_stop`] or the graceful
//! [`Scheduler::stop`]. The [`NodeLifecycle`] table decides which caller wins,
//! so the side effects of a stop run once even when several triggers race.
//! Asynchronous sequences run on [`WorkerSlot`]s and are cancelled by a hard
//! stop rather than joined.

mod generation;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use warden_types::ProcessKind;

use crate::app_state::{AppState, AppStateListener};
use crate::bootstrap::Settings;
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::lifecycle::{NodeLifecycle, NodeState};
use crate::process::{
    CommandFactory, DEFAULT_HARD_STOP_TIMEOUT, DefaultCommandFactory, LaunchCommand, LaunchError,
    ProcessEvent, ProcessEventListener, ProcessLauncher, ProcessLifecycleListener, ProcessState,
};
use crate::reloader::AppReloader;
use crate::worker::{self, WorkerSlot};

use self::generation::{Generation, TerminationLatch};

const SCHEDULER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::scheduler");

/// Errors returned while starting processes.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The worker running the start sequence was cancelled by a stop.
    #[error("process start interrupted by a stop in progress")]
    Interrupted,
    /// A process failed to launch; the node has been hard stopped.
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Builder of [`Scheduler`].
pub struct SchedulerBuilder {
    settings: Settings,
    app_state: Arc<dyn AppState>,
    launcher: Arc<dyn ProcessLauncher>,
    reloader: Arc<dyn AppReloader>,
    commands: Arc<dyn CommandFactory>,
    reporter: Arc<dyn HealthReporter>,
    hard_stop_timeout: Duration,
}

impl SchedulerBuilder {
    /// Replaces the [`DefaultCommandFactory`].
    #[must_use]
    pub fn command_factory(mut self, commands: Arc<dyn CommandFactory>) -> Self {
        self.commands = commands;
        self
    }

    /// Replaces the [`StructuredHealthReporter`].
    #[must_use]
    pub fn reporter(mut self, reporter: Arc<dyn HealthReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Time granted to each process after a hard stop request.
    #[must_use]
    pub fn hard_stop_timeout(mut self, timeout: Duration) -> Self {
        self.hard_stop_timeout = timeout;
        self
    }

    /// Builds the scheduler and subscribes it to the app state.
    #[must_use]
    pub fn build(self) -> Scheduler {
        let inner = Arc::new(SchedulerInner {
            settings: self.settings,
            app_state: self.app_state,
            launcher: self.launcher,
            reloader: self.reloader,
            commands: self.commands,
            reporter: self.reporter,
            hard_stop_timeout: self.hard_stop_timeout,
            lifecycle: NodeLifecycle::new(),
            generation: Mutex::new(None),
            next_generation: AtomicU64::new(1),
            start_lock: Mutex::new(()),
            restarter: WorkerSlot::new("Restarter"),
            hard_stopper: WorkerSlot::new("Hard stopper"),
            restart_stopper: WorkerSlot::new("Restart stopper"),
            stopper: WorkerSlot::new("Stopper"),
            termination: TerminationLatch::default(),
        });
        inner.app_state.add_listener(Arc::new(AppStateForwarder {
            scheduler: Arc::downgrade(&inner),
        }));
        Scheduler { inner }
    }
}

/// Orchestrates the child processes of one node.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Starts building a scheduler.
    #[must_use]
    pub fn builder(
        settings: Settings,
        app_state: Arc<dyn AppState>,
        launcher: Arc<dyn ProcessLauncher>,
        reloader: Arc<dyn AppReloader>,
    ) -> SchedulerBuilder {
        SchedulerBuilder {
            settings,
            app_state,
            launcher,
            reloader,
            commands: Arc::new(DefaultCommandFactory::new()),
            reporter: Arc::new(StructuredHealthReporter::new()),
            hard_stop_timeout: DEFAULT_HARD_STOP_TIMEOUT,
        }
    }

    /// Current node state.
    #[must_use]
    pub fn state(&self) -> NodeState {
        self.inner.lifecycle.state()
    }

    /// Builds a fresh generation of handlers and starts what can start.
    ///
    /// Does nothing unless the node may move to [`NodeState::Starting`].
    /// A launch failure hard stops the node before the error is returned.
    pub fn schedule(&self) -> Result<(), SchedulerError> {
        self.inner.schedule()
    }

    /// Stops every process gracefully on the "Stopper" worker.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Stops every process as fast as possible. Blocks until they stopped.
    pub fn hard_stop(&self) {
        self.inner.hard_stop();
    }

    /// Blocks until the node reached its terminal state.
    pub fn await_termination(&self) {
        self.inner.termination.wait();
    }

    /// Blocks at most `timeout`; returns `true` once the node terminated.
    pub fn await_termination_timeout(&self, timeout: Duration) -> bool {
        self.inner.termination.wait_timeout(timeout)
    }
}

struct SchedulerInner {
    settings: Settings,
    app_state: Arc<dyn AppState>,
    launcher: Arc<dyn ProcessLauncher>,
    reloader: Arc<dyn AppReloader>,
    commands: Arc<dyn CommandFactory>,
    reporter: Arc<dyn HealthReporter>,
    hard_stop_timeout: Duration,
    lifecycle: NodeLifecycle,
    generation: Mutex<Option<Arc<Generation>>>,
    next_generation: AtomicU64,
    // Serialises start attempts; never held while stopping processes.
    start_lock: Mutex<()>,
    restarter: WorkerSlot,
    hard_stopper: WorkerSlot,
    restart_stopper: WorkerSlot,
    stopper: WorkerSlot,
    termination: TerminationLatch,
}

impl SchedulerInner {
    fn move_to(&self, state: NodeState) -> bool {
        let moved = self.lifecycle.try_to_move_to(state);
        if moved {
            self.reporter.node_state_changed(state);
        }
        moved
    }

    fn current_generation(&self) -> Option<Arc<Generation>> {
        self.generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_current(&self, id: u64) -> bool {
        let current = self.current_generation().map(|generation| generation.id());
        if current != Some(id) {
            debug!(
                target: SCHEDULER_TARGET,
                generation = id,
                current = ?current,
                "dropping event from a previous generation"
            );
            return false;
        }
        true
    }

    fn schedule(self: &Arc<Self>) -> Result<(), SchedulerError> {
        if self.termination.is_released() || !self.move_to(NodeState::Starting) {
            debug!(
                target: SCHEDULER_TARGET,
                state = %self.lifecycle.state(),
                "schedule ignored"
            );
            return Ok(());
        }
        let id = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let listener = Arc::new(GenerationListener {
            generation: id,
            scheduler: Arc::downgrade(self),
        });
        let lifecycle: Arc<dyn ProcessLifecycleListener> = listener.clone();
        let events: Arc<dyn ProcessEventListener> = listener;
        let generation = Arc::new(Generation::new(
            id,
            self.settings.snapshot(),
            self.hard_stop_timeout,
            &lifecycle,
            &events,
        ));
        {
            let _start = self.start_lock.lock().unwrap_or_else(PoisonError::into_inner);
            *self.generation.lock().unwrap_or_else(PoisonError::into_inner) = Some(generation);
        }
        info!(target: SCHEDULER_TARGET, generation = id, "processes scheduled");
        self.try_to_start_all()
    }

    fn try_to_start_all(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let Some(generation) = self.current_generation() else {
            return Ok(());
        };
        let result = {
            let _start = self.start_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.start_eligible(&generation)
        };
        if let Err(SchedulerError::Launch(launch_error)) = &result {
            self.reporter.launch_failed(launch_error);
            self.hard_stop();
        }
        result
    }

    fn start_eligible(&self, generation: &Generation) -> Result<(), SchedulerError> {
        let config = generation.config();
        self.try_to_start(generation, ProcessKind::Elasticsearch, || {
            self.commands.create_es_command(config)
        })?;
        if !self.is_search_startable(generation) {
            return Ok(());
        }
        self.try_to_start_web(generation)?;
        if self.app_state.is_operational(ProcessKind::WebServer, true) {
            self.try_to_start(generation, ProcessKind::ComputeEngine, || {
                self.commands.create_ce_command(config)
            })?;
        }
        Ok(())
    }

    fn is_search_startable(&self, generation: &Generation) -> bool {
        self.app_state.is_operational(
            ProcessKind::Elasticsearch,
            generation.config().require_local_search(),
        )
    }

    fn try_to_start_web(&self, generation: &Generation) -> Result<(), SchedulerError> {
        let pending = generation
            .handler(ProcessKind::WebServer)
            .is_some_and(|handler| handler.state() == ProcessState::Init);
        if !pending {
            return Ok(());
        }
        let config = generation.config();
        let web_operational = self.app_state.is_operational(ProcessKind::WebServer, false)
            || self.app_state.is_operational(ProcessKind::WebServer, true);
        if web_operational {
            return self.try_to_start(generation, ProcessKind::WebServer, || {
                self.commands.create_web_command(config, false)
            });
        }
        if self.app_state.try_to_lock_web_leader() {
            return self.try_to_start(generation, ProcessKind::WebServer, || {
                self.commands.create_web_command(config, true)
            });
        }
        match self.app_state.leader_host_name() {
            Some(leader) => info!(
                target: SCHEDULER_TARGET,
                leader = %leader,
                "Waiting for initialization from {leader}"
            ),
            None => error!(
                target: SCHEDULER_TARGET,
                "Initialization failed. All nodes must be restarted"
            ),
        }
        Ok(())
    }

    fn try_to_start<F>(
        &self,
        generation: &Generation,
        kind: ProcessKind,
        command: F,
    ) -> Result<(), SchedulerError>
    where
        F: FnOnce() -> LaunchCommand,
    {
        let Some(handler) = generation.handler(kind) else {
            return Ok(());
        };
        if handler.state() != ProcessState::Init {
            return Ok(());
        }
        if worker::is_cancelled() {
            return Err(SchedulerError::Interrupted);
        }
        if self.lifecycle.state() != NodeState::Starting {
            return Ok(());
        }
        let command = command();
        let launcher = Arc::clone(&self.launcher);
        if handler.start(Box::new(move || launcher.launch(&command)))? {
            self.reporter.process_launched(kind);
        }
        Ok(())
    }

    fn on_operational(self: &Arc<Self>, generation: &Generation, kind: ProcessKind) {
        self.reporter.process_operational(kind);
        self.app_state.set_operational(kind);
        if generation.process_operational() {
            self.move_to(NodeState::Operational);
        }
    }

    fn on_restart_requested(self: &Arc<Self>, kind: ProcessKind) {
        self.reporter.restart_requested(kind);
        if !self.move_to(NodeState::Restarting) {
            debug!(
                target: SCHEDULER_TARGET,
                process = %kind,
                state = %self.lifecycle.state(),
                "restart request ignored"
            );
            return;
        }
        info!(target: SCHEDULER_TARGET, process = %kind, "Restart requested by {kind}");
        let scheduler = Arc::clone(self);
        self.spawn_worker(&self.restart_stopper, move || {
            if let Some(generation) = scheduler.current_generation() {
                stop_processes_hard(&generation);
            }
        });
    }

    /// Reacts to one confirmed process stop; `all_stopped` is set by the last.
    fn on_process_stopped(self: &Arc<Self>, kind: ProcessKind, all_stopped: bool) {
        match self.lifecycle.state() {
            NodeState::Restarting if all_stopped => {
                let scheduler = Arc::clone(self);
                self.spawn_worker(&self.restarter, move || scheduler.restart());
            }
            NodeState::Stopping | NodeState::HardStopping if all_stopped => self.finalize(),
            NodeState::Starting | NodeState::Operational => {
                warn!(
                    target: SCHEDULER_TARGET,
                    process = %kind,
                    "{kind} stopped without a stop request; hard stopping the node"
                );
                self.hard_stop_async();
            }
            NodeState::Init
            | NodeState::Restarting
            | NodeState::Stopping
            | NodeState::HardStopping
            | NodeState::FinalizeStopping
            | NodeState::Stopped => {}
        }
    }

    fn restart(self: &Arc<Self>) {
        if worker::is_cancelled() {
            return;
        }
        info!(target: SCHEDULER_TARGET, "restarting node");
        if let Err(reload_error) = self.reloader.reload(&self.settings) {
            self.reporter.restart_failed(&reload_error);
            self.hard_stop();
            return;
        }
        match self.schedule() {
            Ok(()) => {}
            Err(SchedulerError::Interrupted) => {
                debug!(target: SCHEDULER_TARGET, "restart interrupted by a stop");
            }
            // The node was hard stopped when the launch failed.
            Err(SchedulerError::Launch(_)) => {}
        }
    }

    fn stop(self: &Arc<Self>) {
        if !self.move_to(NodeState::Stopping) {
            debug!(
                target: SCHEDULER_TARGET,
                state = %self.lifecycle.state(),
                "graceful stop ignored"
            );
            return;
        }
        info!(target: SCHEDULER_TARGET, "stopping node");
        let scheduler = Arc::clone(self);
        self.spawn_worker(&self.stopper, move || {
            drop(scheduler.start_lock.lock().unwrap_or_else(PoisonError::into_inner));
            if let Some(generation) = scheduler.current_generation() {
                for handler in generation.handlers_in_stop_order() {
                    handler.stop();
                }
            }
            scheduler.finalize();
        });
    }

    fn hard_stop(self: &Arc<Self>) {
        if self.move_to(NodeState::HardStopping) {
            info!(target: SCHEDULER_TARGET, "hard stopping node");
        } else {
            info!(
                target: SCHEDULER_TARGET,
                state = %self.lifecycle.state(),
                "hard stop requested while the node is {}",
                self.lifecycle.state()
            );
        }
        // Let a start in flight register its process before stopping it.
        drop(self.start_lock.lock().unwrap_or_else(PoisonError::into_inner));
        if let Some(generation) = self.current_generation() {
            stop_processes_hard(&generation);
        }
        self.cancel_workers();
        self.finalize();
        if self.lifecycle.state() == NodeState::Init {
            self.termination.release();
        }
    }

    fn hard_stop_async(self: &Arc<Self>) {
        let scheduler = Arc::clone(self);
        self.spawn_worker(&self.hard_stopper, move || scheduler.hard_stop());
    }

    fn finalize(&self) {
        if !self.move_to(NodeState::FinalizeStopping) {
            return;
        }
        self.cancel_workers();
        self.move_to(NodeState::Stopped);
        self.termination.release();
        info!(target: SCHEDULER_TARGET, "node stopped");
    }

    fn cancel_workers(&self) {
        for slot in [
            &self.restarter,
            &self.restart_stopper,
            &self.stopper,
            &self.hard_stopper,
        ] {
            slot.cancel_unless_current();
        }
    }

    fn spawn_worker<F>(&self, slot: &WorkerSlot, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match slot.spawn(task) {
            Ok(true) => debug!(target: SCHEDULER_TARGET, worker = slot.name(), "worker started"),
            Ok(false) => {}
            Err(spawn_error) => error!(
                target: SCHEDULER_TARGET,
                worker = slot.name(),
                error = %spawn_error,
                "failed to spawn worker"
            ),
        }
    }
}

fn stop_processes_hard(generation: &Generation) {
    for handler in generation.handlers_in_stop_order() {
        handler.hard_stop();
    }
}

struct GenerationListener {
    generation: u64,
    scheduler: Weak<SchedulerInner>,
}

impl GenerationListener {
    fn resolve(&self) -> Option<(Arc<SchedulerInner>, Arc<Generation>)> {
        let scheduler = self.scheduler.upgrade()?;
        if !scheduler.is_current(self.generation) {
            return None;
        }
        let generation = scheduler.current_generation()?;
        Some((scheduler, generation))
    }
}

impl ProcessLifecycleListener for GenerationListener {
    fn on_process_state(&self, kind: ProcessKind, state: ProcessState) {
        let Some((scheduler, generation)) = self.resolve() else {
            return;
        };
        match state {
            ProcessState::Starting => generation.process_starting(),
            ProcessState::Stopped => {
                scheduler.reporter.process_stopped(kind);
                let all_stopped = generation.process_stopped();
                scheduler.on_process_stopped(kind, all_stopped);
            }
            ProcessState::Init
            | ProcessState::Started
            | ProcessState::Stopping
            | ProcessState::HardStopping
            | ProcessState::FinalizeStopping => {}
        }
    }
}

impl ProcessEventListener for GenerationListener {
    fn on_process_event(&self, kind: ProcessKind, event: ProcessEvent) {
        let Some((scheduler, generation)) = self.resolve() else {
            return;
        };
        match event {
            ProcessEvent::Operational => scheduler.on_operational(&generation, kind),
            ProcessEvent::AskForRestart => scheduler.on_restart_requested(kind),
        }
    }
}

struct AppStateForwarder {
    scheduler: Weak<SchedulerInner>,
}

impl AppStateListener for AppStateForwarder {
    fn on_app_state_operational(&self, kind: ProcessKind) {
        let Some(scheduler) = self.scheduler.upgrade() else {
            return;
        };
        if scheduler.lifecycle.state() != NodeState::Starting {
            return;
        }
        if let Err(start_error) = scheduler.try_to_start_all() {
            warn!(
                target: SCHEDULER_TARGET,
                trigger = %kind,
                error = %start_error,
                "process start failed"
            );
        }
    }
}
