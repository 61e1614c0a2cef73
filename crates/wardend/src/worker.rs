//! Named, cancellable supervisor workers.
//!
//! Restart and stop sequences run on short-lived threads. Each worker owns a
//! [`CancelToken`] which code running on the worker can poll through
//! [`is_cancelled`]. A [`WorkerSlot`] keeps at most one worker in flight and
//! rejects new requests until the current one has finished.

use std::cell::RefCell;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use tracing::debug;

const WORKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::worker");

thread_local! {
    static CURRENT_TOKEN: RefCell<Option<CancelToken>> = const { RefCell::new(None) };
}

/// Shared cancellation flag of one worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Builds a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`CancelToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Returns `true` when the worker running on the calling thread was cancelled.
///
/// Threads that are not supervisor workers are never cancelled.
#[must_use]
pub fn is_cancelled() -> bool {
    CURRENT_TOKEN.with(|token| token.borrow().as_ref().is_some_and(CancelToken::is_cancelled))
}

/// Sleeps for `duration`, waking early when the current worker is cancelled.
///
/// Returns `false` when the sleep ended because of a cancellation.
pub fn sleep_unless_cancelled(duration: Duration) -> bool {
    if is_cancelled() {
        return false;
    }
    thread::park_timeout(duration);
    !is_cancelled()
}

/// Spawns a named thread that runs `task` under `token`.
pub(crate) fn spawn_named<F>(name: &str, token: CancelToken, task: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new().name(name.to_owned()).spawn(move || {
        CURRENT_TOKEN.with(|current| *current.borrow_mut() = Some(token));
        task();
    })
}

#[derive(Debug)]
struct Worker {
    token: CancelToken,
    handle: JoinHandle<()>,
}

impl Worker {
    fn thread(&self) -> &Thread {
        self.handle.thread()
    }

    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Holder of at most one in-flight worker of a given kind.
#[derive(Debug)]
pub(crate) struct WorkerSlot {
    name: &'static str,
    worker: Mutex<Option<Worker>>,
}

impl WorkerSlot {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self {
            name,
            worker: Mutex::new(None),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    /// Starts `task` on a fresh worker unless one is already running.
    ///
    /// Returns `Ok(false)` when the request was rejected.
    pub(crate) fn spawn<F>(&self, task: F) -> io::Result<bool>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(Worker::is_running) {
            debug!(
                target: WORKER_TARGET,
                worker = self.name,
                "worker already in flight; request rejected"
            );
            return Ok(false);
        }
        let token = CancelToken::new();
        let handle = spawn_named(self.name, token.clone(), task)?;
        *slot = Some(Worker { token, handle });
        Ok(true)
    }

    /// Cancels the in-flight worker unless it is the calling thread.
    pub(crate) fn cancel_unless_current(&self) {
        let slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(worker) = slot.as_ref() else {
            return;
        };
        if worker.thread().id() == thread::current().id() || !worker.is_running() {
            return;
        }
        debug!(
            target: WORKER_TARGET,
            worker = self.name,
            "cancelling in-flight worker"
        );
        worker.token.cancel();
        worker.thread().unpark();
    }

    /// Returns `true` while a worker spawned by this slot is still running.
    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Worker::is_running)
    }

    /// Thread id of the in-flight worker, if any.
    #[cfg(test)]
    pub(crate) fn running_thread(&self) -> Option<thread::ThreadId> {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|worker| worker.is_running())
            .map(|worker| worker.thread().id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Instant;

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn threads_outside_workers_are_never_cancelled() {
        assert!(!is_cancelled());
    }

    #[test]
    fn rejects_second_request_while_first_is_running() {
        let slot = WorkerSlot::new("Restarter");
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let runs = Arc::new(AtomicUsize::new(0));

        let first_runs = Arc::clone(&runs);
        let spawned = slot
            .spawn(move || {
                first_runs.fetch_add(1, Ordering::SeqCst);
                let _ = release_rx.recv();
            })
            .expect("spawn worker");
        assert!(spawned);

        let second_runs = Arc::clone(&runs);
        let rejected = slot
            .spawn(move || {
                second_runs.fetch_add(1, Ordering::SeqCst);
            })
            .expect("spawn worker");
        assert!(!rejected);

        release_tx.send(()).expect("release worker");
        assert!(wait_until(|| !slot.is_running()));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let third = slot.spawn(|| {}).expect("spawn worker");
        assert!(third, "a finished worker must not block new requests");
    }

    #[test]
    fn cancellation_wakes_a_sleeping_worker() {
        let slot = WorkerSlot::new("Hard stopper");
        let (done_tx, done_rx) = mpsc::channel();
        slot.spawn(move || {
            let completed = sleep_unless_cancelled(Duration::from_secs(30));
            let _ = done_tx.send((completed, is_cancelled()));
        })
        .expect("spawn worker");

        assert!(wait_until(|| slot.running_thread().is_some()));
        slot.cancel_unless_current();
        let (completed, cancelled) = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker should observe cancellation");
        assert!(!completed);
        assert!(cancelled);
    }

    #[test]
    fn workers_carry_their_slot_name() {
        let slot = WorkerSlot::new("Stopper");
        let (name_tx, name_rx) = mpsc::channel();
        slot.spawn(move || {
            let _ = name_tx.send(thread::current().name().map(str::to_owned));
        })
        .expect("spawn worker");
        let name = name_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker name");
        assert_eq!(name.as_deref(), Some(slot.name()));
    }
}
