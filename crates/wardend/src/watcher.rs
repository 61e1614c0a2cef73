//! Pollers turning IPC stop flags into scheduler actions.
//!
//! Stop requests travel through the APP slot of the IPC flag store so any
//! external tool able to flip a byte can stop the node. Each watcher polls
//! its flag on a timer, runs its action the first time the flag is seen,
//! and then exits.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use warden_config::Config;

use crate::process::ipc::ProcessCommands;
use crate::scheduler::Scheduler;
use crate::worker::{self, CancelToken};

const WATCHER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::watcher");

type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;
type Action = Arc<dyn Fn() + Send + Sync>;

struct Running {
    token: CancelToken,
    handle: JoinHandle<()>,
}

/// Daemon thread running an action once its predicate turns true.
pub struct RequestWatcher {
    name: &'static str,
    poll: Duration,
    predicate: Predicate,
    action: Action,
    running: Mutex<Option<Running>>,
}

impl RequestWatcher {
    /// Builds a watcher that is not yet polling.
    pub fn new<P, A>(name: &'static str, poll: Duration, predicate: P, action: A) -> Self
    where
        P: Fn() -> bool + Send + Sync + 'static,
        A: Fn() + Send + Sync + 'static,
    {
        Self {
            name,
            poll,
            predicate: Arc::new(predicate),
            action: Arc::new(action),
            running: Mutex::new(None),
        }
    }

    /// Thread name of the watcher.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Starts polling. Calling it again while polling has no effect.
    pub fn start_watching(&self) -> io::Result<()> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return Ok(());
        }
        let token = CancelToken::new();
        let predicate = Arc::clone(&self.predicate);
        let action = Arc::clone(&self.action);
        let poll = self.poll;
        let name = self.name;
        let handle = worker::spawn_named(name, token.clone(), move || {
            while !worker::is_cancelled() {
                if predicate() {
                    info!(target: WATCHER_TARGET, watcher = name, "request received");
                    action();
                    return;
                }
                if !worker::sleep_unless_cancelled(poll) {
                    break;
                }
            }
            debug!(target: WATCHER_TARGET, watcher = name, "watcher stopped");
        })?;
        *running = Some(Running { token, handle });
        Ok(())
    }

    /// Stops polling and waits for the thread to exit.
    ///
    /// No-op when the watcher never started or already stopped.
    pub fn stop_watching(&self) {
        let Some(running) = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        running.token.cancel();
        running.handle.thread().unpark();
        if running.handle.thread().id() == thread::current().id() {
            return;
        }
        if running.handle.join().is_err() {
            debug!(target: WATCHER_TARGET, watcher = self.name, "watcher panicked");
        }
    }

    /// Returns `true` while the polling thread is alive.
    pub fn is_watching(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }
}

impl Drop for RequestWatcher {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

/// Watcher stopping the node gracefully on an "ask for stop" request.
///
/// Returns `None` unless the stop command is enabled in `config`.
#[must_use]
pub fn stop_request_watcher(
    config: &Config,
    commands: ProcessCommands,
    scheduler: Scheduler,
) -> Option<RequestWatcher> {
    if !config.stop_command_enabled() {
        return None;
    }
    Some(RequestWatcher::new(
        "StopRequestWatcher",
        config.stop_request_poll(),
        move || commands.asked_for_stop(),
        move || scheduler.stop(),
    ))
}

/// Watcher hard stopping the node on an "ask for hard stop" request.
#[must_use]
pub fn hard_stop_request_watcher(
    config: &Config,
    commands: ProcessCommands,
    scheduler: Scheduler,
) -> RequestWatcher {
    RequestWatcher::new(
        "HardStopRequestWatcher",
        config.stop_request_poll(),
        move || commands.asked_for_hard_stop(),
        move || scheduler.hard_stop(),
    )
}
