//! Operational state of the node's processes and the web leader lock.
//!
//! Standalone nodes use [`LocalAppState`]. Cluster nodes use
//! [`ClusterAppState`], which answers remote queries through a
//! [`ClusterMembership`] collaborator. In both cases listeners are invoked
//! after the state has been committed and every internal lock released, so
//! a listener may query the state it is being notified about.

mod cluster;
mod local;

use std::sync::Arc;

use tracing::warn;

use warden_config::Config;
use warden_types::ProcessKind;

pub use cluster::{ClusterAppState, ClusterMembership, InMemoryCluster, MembershipListener};
pub use local::LocalAppState;

pub(crate) const APP_STATE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::app_state");

/// Receives operational transitions recorded by an [`AppState`].
pub trait AppStateListener: Send + Sync {
    /// Invoked once `kind` became operational, locally or on another node.
    fn on_app_state_operational(&self, kind: ProcessKind);
}

/// Shared view of which processes are operational.
pub trait AppState: Send + Sync {
    /// Registers a listener for operational transitions.
    fn add_listener(&self, listener: Arc<dyn AppStateListener>);

    /// Returns whether `kind` is operational.
    ///
    /// With `local` set, only this node's own flag is consulted. Otherwise
    /// the answer reflects the other nodes of the cluster.
    fn is_operational(&self, kind: ProcessKind, local: bool) -> bool;

    /// Records `kind` as operational on this node and notifies listeners.
    fn set_operational(&self, kind: ProcessKind);

    /// Attempts to take the web leader lock; returns `true` for the winner.
    fn try_to_lock_web_leader(&self) -> bool;

    /// Host of the node holding the web leader lock, when known.
    fn leader_host_name(&self) -> Option<String>;

    /// Clears the leader lock and every operational flag.
    fn reset(&self);

    /// Releases resources held by the state.
    fn close(&self) {}
}

/// Builds the app state matching the node configuration.
///
/// Cluster nodes without an external `membership` join a fresh
/// [`InMemoryCluster`], which only spans the current process.
#[must_use]
pub fn create(config: &Config, membership: Option<Arc<dyn ClusterMembership>>) -> Arc<dyn AppState> {
    if !config.cluster_enabled() {
        return Arc::new(LocalAppState::new(config.node_host()));
    }
    let membership = membership.unwrap_or_else(|| {
        warn!(
            target: APP_STATE_TARGET,
            node = config.node_name(),
            "no cluster membership configured; using an in-process cluster"
        );
        Arc::new(InMemoryCluster::new()) as Arc<dyn ClusterMembership>
    });
    ClusterAppState::join(config.node_name(), config.node_host(), membership)
}
