//! In-memory [`ManagedProcess`] and a listener recording what handlers report.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use warden_types::ProcessKind;

use crate::process::{
    ManagedProcess, ProcessEvent, ProcessEventListener, ProcessLifecycleListener, ProcessState,
};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Process double driven by the test through its flags.
///
/// A cooperative process exits on any stop request. A stubborn one only
/// exits once destroyed.
#[derive(Debug)]
pub struct FakeProcess {
    kind: ProcessKind,
    stubborn: bool,
    alive: AtomicBool,
    operational: AtomicBool,
    restart: AtomicBool,
    destroyed: AtomicBool,
    stop_requests: AtomicUsize,
    hard_stop_requests: AtomicUsize,
}

impl FakeProcess {
    /// Cooperative process of `kind`.
    pub fn new(kind: ProcessKind) -> Arc<Self> {
        Arc::new(Self::build(kind, false))
    }

    /// Process ignoring stop requests.
    pub fn stubborn(kind: ProcessKind) -> Arc<Self> {
        Arc::new(Self::build(kind, true))
    }

    fn build(kind: ProcessKind, stubborn: bool) -> Self {
        Self {
            kind,
            stubborn,
            alive: AtomicBool::new(true),
            operational: AtomicBool::new(false),
            restart: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            stop_requests: AtomicUsize::new(0),
            hard_stop_requests: AtomicUsize::new(0),
        }
    }

    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    pub fn set_operational(&self) {
        self.operational.store(true, Ordering::SeqCst);
    }

    pub fn request_restart(&self) {
        self.restart.store(true, Ordering::SeqCst);
    }

    /// Simulates the process dying on its own.
    pub fn exit(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn stop_requests(&self) -> usize {
        self.stop_requests.load(Ordering::SeqCst)
    }

    pub fn hard_stop_requests(&self) -> usize {
        self.hard_stop_requests.load(Ordering::SeqCst)
    }

    pub fn was_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl ManagedProcess for FakeProcess {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn destroy_forcibly(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.exit();
    }

    fn is_operational(&self) -> bool {
        self.operational.load(Ordering::SeqCst)
    }

    fn ask_for_stop(&self) {
        self.stop_requests.fetch_add(1, Ordering::SeqCst);
        if !self.stubborn {
            self.exit();
        }
    }

    fn ask_for_hard_stop(&self) {
        self.hard_stop_requests.fetch_add(1, Ordering::SeqCst);
        if !self.stubborn {
            self.exit();
        }
    }

    fn asked_for_restart(&self) -> bool {
        self.restart.load(Ordering::SeqCst)
    }

    fn acknowledge_ask_for_restart(&self) {
        self.restart.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct Recorded {
    events: Vec<ProcessEvent>,
    states: Vec<ProcessState>,
}

/// Records process events and lifecycle transitions in arrival order.
#[derive(Debug, Default)]
pub struct RecordingProcessListener {
    recorded: Mutex<Recorded>,
    changed: Condvar,
}

impl RecordingProcessListener {
    pub fn events(&self) -> Vec<ProcessEvent> {
        self.recorded
            .lock()
            .expect("listener mutex poisoned")
            .events
            .clone()
    }

    pub fn states(&self) -> Vec<ProcessState> {
        self.recorded
            .lock()
            .expect("listener mutex poisoned")
            .states
            .clone()
    }

    /// Waits until `event` was recorded; returns `false` on timeout.
    pub fn wait_for_event(&self, event: ProcessEvent) -> bool {
        self.wait_until(|recorded| recorded.events.contains(&event))
    }

    /// Waits until `state` was recorded; returns `false` on timeout.
    pub fn wait_for_state(&self, state: ProcessState) -> bool {
        self.wait_until(|recorded| recorded.states.contains(&state))
    }

    fn wait_until(&self, mut condition: impl FnMut(&Recorded) -> bool) -> bool {
        let recorded = self.recorded.lock().expect("listener mutex poisoned");
        let (recorded, _) = self
            .changed
            .wait_timeout_while(recorded, WAIT_TIMEOUT, |recorded| !condition(recorded))
            .expect("listener mutex poisoned");
        condition(&recorded)
    }

    fn record(&self, update: impl FnOnce(&mut Recorded)) {
        update(&mut self.recorded.lock().expect("listener mutex poisoned"));
        self.changed.notify_all();
    }
}

impl ProcessEventListener for RecordingProcessListener {
    fn on_process_event(&self, _kind: ProcessKind, event: ProcessEvent) {
        self.record(|recorded| recorded.events.push(event));
    }
}

impl ProcessLifecycleListener for RecordingProcessListener {
    fn on_process_state(&self, _kind: ProcessKind, state: ProcessState) {
        self.record(|recorded| recorded.states.push(state));
    }
}
