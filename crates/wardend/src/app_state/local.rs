use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use warden_types::ProcessKind;

use super::{APP_STATE_TARGET, AppState, AppStateListener};

/// App state of a standalone node.
///
/// Remote queries always answer `false`.
pub struct LocalAppState {
    host: String,
    operational: [AtomicBool; ProcessKind::ALL.len()],
    web_leader_locked: AtomicBool,
    listeners: Mutex<Vec<Arc<dyn AppStateListener>>>,
}

impl LocalAppState {
    /// Builds an empty state for a node reachable on `host`.
    #[must_use]
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_owned(),
            operational: Default::default(),
            web_leader_locked: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn flag(&self, kind: ProcessKind) -> Option<&AtomicBool> {
        self.operational.get(kind.ipc_index())
    }

    /// Records `kind` operational; returns `true` on the first transition.
    pub(super) fn mark_operational(&self, kind: ProcessKind) -> bool {
        self.flag(kind)
            .is_some_and(|flag| !flag.swap(true, Ordering::SeqCst))
    }

    /// Notifies every listener outside the listener lock.
    pub(super) fn notify(&self, kind: ProcessKind) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.on_app_state_operational(kind);
        }
    }
}

impl AppState for LocalAppState {
    fn add_listener(&self, listener: Arc<dyn AppStateListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn is_operational(&self, kind: ProcessKind, local: bool) -> bool {
        local
            && self
                .flag(kind)
                .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn set_operational(&self, kind: ProcessKind) {
        if self.mark_operational(kind) {
            info!(
                target: APP_STATE_TARGET,
                process = %kind,
                "process is operational"
            );
        }
        self.notify(kind);
    }

    fn try_to_lock_web_leader(&self) -> bool {
        self.web_leader_locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn leader_host_name(&self) -> Option<String> {
        self.web_leader_locked
            .load(Ordering::SeqCst)
            .then(|| self.host.clone())
    }

    fn reset(&self) {
        self.web_leader_locked.store(false, Ordering::SeqCst);
        for flag in &self.operational {
            flag.store(false, Ordering::SeqCst);
        }
        debug!(target: APP_STATE_TARGET, "app state reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use rstest::rstest;

    struct Requery {
        state: Arc<LocalAppState>,
        seen: Mutex<Vec<(ProcessKind, bool)>>,
    }

    impl AppStateListener for Requery {
        fn on_app_state_operational(&self, kind: ProcessKind) {
            let operational = self.state.is_operational(kind, true);
            self.seen
                .lock()
                .expect("listener mutex poisoned")
                .push((kind, operational));
        }
    }

    #[rstest]
    #[case(8)]
    #[case(32)]
    fn exactly_one_caller_wins_the_leader_lock(#[case] callers: usize) {
        let state = Arc::new(LocalAppState::new("127.0.0.1"));
        let barrier = Arc::new(Barrier::new(callers));
        let winners = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let state = Arc::clone(&state);
                let barrier = Arc::clone(&barrier);
                let winners = Arc::clone(&winners);
                thread::spawn(move || {
                    barrier.wait();
                    if state.try_to_lock_web_leader() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("caller thread panicked");
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(state.leader_host_name().as_deref(), Some("127.0.0.1"));
    }

    #[rstest]
    fn listeners_may_query_the_state_they_are_notified_about() {
        let state = Arc::new(LocalAppState::new("127.0.0.1"));
        let listener = Arc::new(Requery {
            state: Arc::clone(&state),
            seen: Mutex::new(Vec::new()),
        });
        state.add_listener(Arc::clone(&listener) as Arc<dyn AppStateListener>);

        state.set_operational(ProcessKind::Elasticsearch);

        let seen = listener.seen.lock().expect("listener mutex poisoned");
        assert_eq!(seen.as_slice(), &[(ProcessKind::Elasticsearch, true)]);
    }

    #[rstest]
    fn remote_queries_are_always_false() {
        let state = LocalAppState::new("127.0.0.1");
        state.set_operational(ProcessKind::WebServer);
        assert!(!state.is_operational(ProcessKind::WebServer, false));
    }

    #[rstest]
    fn reset_clears_flags_and_leader_lock() {
        let state = LocalAppState::new("127.0.0.1");
        state.set_operational(ProcessKind::WebServer);
        assert!(state.try_to_lock_web_leader());

        state.reset();

        assert!(!state.is_operational(ProcessKind::WebServer, true));
        assert_eq!(state.leader_host_name(), None);
        assert!(state.try_to_lock_web_leader());
    }
}
