//! Supervises one child process from launch to confirmed stop.
//!
//! A handler owns two watcher threads once its process is launched. The
//! stop watcher polls liveness and finalises the lifecycle when the process
//! exits, whether or not a stop was requested. The event watcher polls the
//! process for readiness and restart requests and forwards them to the
//! registered [`ProcessEventListener`]s.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use warden_config::DEFAULT_WATCHER_DELAY;
use warden_types::ProcessKind;

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::handler_lifecycle::{ManagedProcessLifecycle, ProcessLifecycleListener, ProcessState};
use super::managed::ManagedProcess;

/// Default delay granted to a process after a hard stop request.
pub const DEFAULT_HARD_STOP_TIMEOUT: Duration = Duration::from_secs(60);

const DEFAULT_GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(60);

/// Application-level notifications raised by a running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessEvent {
    /// The process is ready to serve.
    Operational,
    /// The process asked for a restart of the whole node.
    AskForRestart,
}

/// Receives [`ProcessEvent`]s from handlers.
pub trait ProcessEventListener: Send + Sync {
    /// Invoked on the event watcher thread of `kind`.
    fn on_process_event(&self, kind: ProcessKind, event: ProcessEvent);
}

/// Supplies the process launched by [`ManagedProcessHandler::start`].
pub type ProcessSupplier<'a> =
    Box<dyn FnOnce() -> Result<Arc<dyn ManagedProcess>, LaunchError> + 'a>;

/// Builder of [`ManagedProcessHandler`].
pub struct ManagedProcessHandlerBuilder {
    kind: ProcessKind,
    watcher_delay: Duration,
    graceful_stop_timeout: Duration,
    hard_stop_timeout: Duration,
    lifecycle_listeners: Vec<Arc<dyn ProcessLifecycleListener>>,
    event_listeners: Vec<Arc<dyn ProcessEventListener>>,
}

impl ManagedProcessHandlerBuilder {
    /// Poll interval of the watcher threads.
    #[must_use]
    pub fn watcher_delay(mut self, delay: Duration) -> Self {
        self.watcher_delay = delay;
        self
    }

    /// Time granted to a graceful stop before escalating.
    #[must_use]
    pub fn graceful_stop_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_stop_timeout = timeout;
        self
    }

    /// Time granted to a hard stop before killing the process.
    #[must_use]
    pub fn hard_stop_timeout(mut self, timeout: Duration) -> Self {
        self.hard_stop_timeout = timeout;
        self
    }

    /// Registers a lifecycle listener.
    #[must_use]
    pub fn add_lifecycle_listener(mut self, listener: Arc<dyn ProcessLifecycleListener>) -> Self {
        self.lifecycle_listeners.push(listener);
        self
    }

    /// Registers an event listener.
    #[must_use]
    pub fn add_event_listener(mut self, listener: Arc<dyn ProcessEventListener>) -> Self {
        self.event_listeners.push(listener);
        self
    }

    /// Builds the handler in [`ProcessState::Init`].
    #[must_use]
    pub fn build(self) -> ManagedProcessHandler {
        ManagedProcessHandler {
            kind: self.kind,
            lifecycle: ManagedProcessLifecycle::new(self.kind, self.lifecycle_listeners),
            process: Mutex::new(None),
            watcher_delay: self.watcher_delay,
            graceful_stop_timeout: self.graceful_stop_timeout,
            hard_stop_timeout: self.hard_stop_timeout,
            event_listeners: self.event_listeners,
        }
    }
}

/// Launches, watches, and stops one child process.
pub struct ManagedProcessHandler {
    kind: ProcessKind,
    lifecycle: ManagedProcessLifecycle,
    process: Mutex<Option<Arc<dyn ManagedProcess>>>,
    watcher_delay: Duration,
    graceful_stop_timeout: Duration,
    hard_stop_timeout: Duration,
    event_listeners: Vec<Arc<dyn ProcessEventListener>>,
}

impl ManagedProcessHandler {
    /// Starts building a handler for `kind`.
    #[must_use]
    pub fn builder(kind: ProcessKind) -> ManagedProcessHandlerBuilder {
        ManagedProcessHandlerBuilder {
            kind,
            watcher_delay: DEFAULT_WATCHER_DELAY,
            graceful_stop_timeout: DEFAULT_GRACEFUL_STOP_TIMEOUT,
            hard_stop_timeout: DEFAULT_HARD_STOP_TIMEOUT,
            lifecycle_listeners: Vec::new(),
            event_listeners: Vec::new(),
        }
    }

    /// Kind of the supervised process.
    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessState {
        self.lifecycle.state()
    }

    /// Launches the process produced by `supplier`.
    ///
    /// Returns `Ok(false)` without calling `supplier` when the handler was
    /// already started. A supplier failure finalises the handler to
    /// [`ProcessState::Stopped`] before the error is returned.
    pub fn start(self: &Arc<Self>, supplier: ProcessSupplier<'_>) -> Result<bool, LaunchError> {
        if !self.lifecycle.try_to_move_to(ProcessState::Starting) {
            return Ok(false);
        }
        let process = match supplier() {
            Ok(process) => process,
            Err(error) => {
                self.lifecycle.try_to_move_to(ProcessState::HardStopping);
                self.finalize();
                return Err(error);
            }
        };
        *self.process.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&process));
        if let Err(source) = self.spawn_watchers(&process) {
            self.lifecycle.try_to_move_to(ProcessState::HardStopping);
            self.kill(process.as_ref());
            return Err(LaunchError::Watcher {
                kind: self.kind,
                source,
            });
        }
        if !self.lifecycle.try_to_move_to(ProcessState::Started) {
            // A stop arrived while the process was launching.
            self.kill(process.as_ref());
        }
        Ok(true)
    }

    /// Stops the process gracefully, escalating to [`Self::hard_stop`] once
    /// the graceful timeout elapses. Blocks until the process is stopped.
    pub fn stop(&self) {
        if !self.lifecycle.try_to_move_to(ProcessState::Stopping) {
            self.hard_stop();
            return;
        }
        let Some(process) = self.current_process() else {
            self.hard_stop();
            return;
        };
        info!(
            target: PROCESS_TARGET,
            process = %self.kind,
            timeout_ms = self.graceful_stop_timeout.as_millis(),
            "asking process to stop"
        );
        process.ask_for_stop();
        let deadline = Instant::now() + self.graceful_stop_timeout;
        while process.is_alive() && self.lifecycle.state() == ProcessState::Stopping {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(self.watcher_delay.min(deadline - now));
        }
        if process.is_alive() {
            warn!(
                target: PROCESS_TARGET,
                process = %self.kind,
                "graceful stop did not complete; escalating to hard stop"
            );
            self.hard_stop();
            return;
        }
        self.finalize();
        self.lifecycle.await_stopped();
    }

    /// Stops the process as fast as possible. Blocks until it is stopped.
    ///
    /// Returns immediately when the process was never started.
    pub fn hard_stop(&self) {
        loop {
            match self.lifecycle.state() {
                ProcessState::Init => return,
                ProcessState::Starting | ProcessState::Started | ProcessState::Stopping => {
                    if self.lifecycle.try_to_move_to(ProcessState::HardStopping) {
                        if let Some(process) = self.current_process() {
                            self.kill(process.as_ref());
                        }
                        break;
                    }
                }
                ProcessState::HardStopping
                | ProcessState::FinalizeStopping
                | ProcessState::Stopped => break,
            }
        }
        self.lifecycle.await_stopped();
    }

    fn current_process(&self) -> Option<Arc<dyn ManagedProcess>> {
        self.process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn kill(&self, process: &dyn ManagedProcess) {
        info!(
            target: PROCESS_TARGET,
            process = %self.kind,
            timeout_ms = self.hard_stop_timeout.as_millis(),
            "hard stopping process"
        );
        process.ask_for_hard_stop();
        if !process.wait_for(self.hard_stop_timeout) {
            warn!(
                target: PROCESS_TARGET,
                process = %self.kind,
                "process ignored the hard stop request; destroying it"
            );
            process.destroy_forcibly();
            if !process.wait_for(self.hard_stop_timeout) {
                warn!(
                    target: PROCESS_TARGET,
                    process = %self.kind,
                    "process still alive after being destroyed"
                );
            }
        }
        self.finalize();
    }

    fn finalize(&self) {
        if self.lifecycle.try_to_move_to(ProcessState::FinalizeStopping) {
            self.lifecycle.try_to_move_to(ProcessState::Stopped);
        }
    }

    fn spawn_watchers(self: &Arc<Self>, process: &Arc<dyn ManagedProcess>) -> std::io::Result<()> {
        let stop_handler = Arc::clone(self);
        let stop_process = Arc::clone(process);
        thread::Builder::new()
            .name(format!("{}-stop-watcher", self.kind.key()))
            .spawn(move || stop_handler.watch_exit(stop_process.as_ref()))?;
        let event_handler = Arc::clone(self);
        let event_process = Arc::clone(process);
        thread::Builder::new()
            .name(format!("{}-event-watcher", self.kind.key()))
            .spawn(move || event_handler.watch_events(event_process.as_ref()))?;
        Ok(())
    }

    fn watch_exit(&self, process: &dyn ManagedProcess) {
        while process.is_alive() {
            if self.lifecycle.state() == ProcessState::Stopped {
                return;
            }
            thread::sleep(self.watcher_delay);
        }
        if matches!(
            self.lifecycle.state(),
            ProcessState::Starting | ProcessState::Started
        ) {
            warn!(
                target: PROCESS_TARGET,
                process = %self.kind,
                "process exited without a stop request"
            );
            self.lifecycle.try_to_move_to(ProcessState::HardStopping);
        }
        self.finalize();
    }

    fn watch_events(&self, process: &dyn ManagedProcess) {
        let mut operational = false;
        while matches!(
            self.lifecycle.state(),
            ProcessState::Starting | ProcessState::Started
        ) {
            if !operational && process.is_operational() {
                operational = true;
                self.notify(ProcessEvent::Operational);
            }
            if process.asked_for_restart() {
                process.acknowledge_ask_for_restart();
                self.notify(ProcessEvent::AskForRestart);
            }
            thread::sleep(self.watcher_delay);
        }
    }

    fn notify(&self, event: ProcessEvent) {
        info!(
            target: PROCESS_TARGET,
            process = %self.kind,
            ?event,
            "process event"
        );
        for listener in &self.event_listeners {
            listener.on_process_event(self.kind, event);
        }
    }
}
