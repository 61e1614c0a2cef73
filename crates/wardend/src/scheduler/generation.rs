use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use warden_config::Config;
use warden_types::ProcessKind;

use crate::process::{ManagedProcessHandler, ProcessEventListener, ProcessLifecycleListener};

/// Handlers and counters of one `schedule()` call.
///
/// A generation is never mutated structurally; a restart builds a new one.
pub(super) struct Generation {
    id: u64,
    config: Config,
    handlers: BTreeMap<ProcessKind, Arc<ManagedProcessHandler>>,
    operational_countdown: AtomicUsize,
    stop_countdown: AtomicUsize,
}

impl Generation {
    pub(super) fn new(
        id: u64,
        config: Config,
        hard_stop_timeout: Duration,
        lifecycle: &Arc<dyn ProcessLifecycleListener>,
        events: &Arc<dyn ProcessEventListener>,
    ) -> Self {
        let handlers: BTreeMap<_, _> = config
            .enabled_processes()
            .into_iter()
            .map(|kind| {
                let handler = ManagedProcessHandler::builder(kind)
                    .watcher_delay(config.process_watcher_delay())
                    .graceful_stop_timeout(config.graceful_stop_timeout(kind))
                    .hard_stop_timeout(hard_stop_timeout)
                    .add_lifecycle_listener(Arc::clone(lifecycle))
                    .add_event_listener(Arc::clone(events))
                    .build();
                (kind, Arc::new(handler))
            })
            .collect();
        Self {
            id,
            operational_countdown: AtomicUsize::new(handlers.len()),
            stop_countdown: AtomicUsize::new(0),
            config,
            handlers,
        }
    }

    pub(super) fn id(&self) -> u64 {
        self.id
    }

    pub(super) fn config(&self) -> &Config {
        &self.config
    }

    pub(super) fn handler(&self, kind: ProcessKind) -> Option<&Arc<ManagedProcessHandler>> {
        self.handlers.get(&kind)
    }

    /// Handlers in reverse dependency order.
    pub(super) fn handlers_in_stop_order(&self) -> impl Iterator<Item = &Arc<ManagedProcessHandler>> {
        ProcessKind::SUPERVISED
            .into_iter()
            .rev()
            .filter_map(move |kind| self.handlers.get(&kind))
    }

    pub(super) fn process_starting(&self) {
        self.stop_countdown.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns `true` when the last tracked process confirmed its stop.
    pub(super) fn process_stopped(&self) -> bool {
        count_down(&self.stop_countdown)
    }

    /// Returns `true` when the last pending process became operational.
    pub(super) fn process_operational(&self) -> bool {
        count_down(&self.operational_countdown)
    }
}

fn count_down(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1))
        .is_ok_and(|previous| previous == 1)
}

/// One-shot latch released when the node stops.
#[derive(Debug, Default)]
pub(super) struct TerminationLatch {
    released: Mutex<bool>,
    changed: Condvar,
}

impl TerminationLatch {
    /// Releases the latch; later calls are no-ops.
    pub(super) fn release(&self) -> bool {
        let mut released = self.released.lock().unwrap_or_else(PoisonError::into_inner);
        if *released {
            return false;
        }
        *released = true;
        self.changed.notify_all();
        true
    }

    pub(super) fn is_released(&self) -> bool {
        *self.released.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn wait(&self) {
        let mut released = self.released.lock().unwrap_or_else(PoisonError::into_inner);
        while !*released {
            released = self
                .changed
                .wait(released)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Waits at most `timeout`; returns `true` once released.
    pub(super) fn wait_timeout(&self, timeout: Duration) -> bool {
        let released = self.released.lock().unwrap_or_else(PoisonError::into_inner);
        let (released, _) = self
            .changed
            .wait_timeout_while(released, timeout, |released| !*released)
            .unwrap_or_else(PoisonError::into_inner);
        *released
    }
}
