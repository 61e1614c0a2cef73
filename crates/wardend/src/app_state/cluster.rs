//! Cluster-aware app state.
//!
//! Each node is the single writer of its own operational flags. Other
//! nodes learn about them through the [`ClusterMembership`] collaborator,
//! which may deliver updates later than they were written.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use warden_types::ProcessKind;

use super::local::LocalAppState;
use super::{APP_STATE_TARGET, AppState, AppStateListener};

/// Receives operational transitions published by any node.
pub trait MembershipListener: Send + Sync {
    /// Invoked after `node` published `kind` as operational.
    fn on_operational(&self, node: &str, kind: ProcessKind);
}

/// Cross-node transport for operational state and the web leader lock.
pub trait ClusterMembership: Send + Sync {
    /// Publishes `kind` as operational on `node`.
    fn publish_operational(&self, node: &str, kind: ProcessKind);

    /// Returns `true` when any node other than `node` reports `kind`.
    fn is_operational_elsewhere(&self, node: &str, kind: ProcessKind) -> bool;

    /// Attempts to take the cluster-wide web leader lock for `node`.
    fn try_lock_web_leader(&self, node: &str, host: &str) -> bool;

    /// Host of the current web leader, when one holds the lock.
    fn leader_host_name(&self) -> Option<String>;

    /// Registers a listener for published transitions.
    fn subscribe(&self, listener: Arc<dyn MembershipListener>);

    /// Withdraws every flag published by `node`.
    fn leave(&self, node: &str);
}

#[derive(Default)]
struct ClusterRegistry {
    operational: BTreeMap<String, BTreeSet<ProcessKind>>,
    leader: Option<(String, String)>,
    listeners: Vec<Arc<dyn MembershipListener>>,
}

/// Membership shared by nodes living in the same OS process.
#[derive(Default)]
pub struct InMemoryCluster {
    registry: Mutex<ClusterRegistry>,
}

impl InMemoryCluster {
    /// Builds an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, ClusterRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClusterMembership for InMemoryCluster {
    fn publish_operational(&self, node: &str, kind: ProcessKind) {
        let listeners = {
            let mut registry = self.registry();
            registry
                .operational
                .entry(node.to_owned())
                .or_default()
                .insert(kind);
            registry.listeners.clone()
        };
        for listener in listeners {
            listener.on_operational(node, kind);
        }
    }

    fn is_operational_elsewhere(&self, node: &str, kind: ProcessKind) -> bool {
        self.registry()
            .operational
            .iter()
            .any(|(other, kinds)| other != node && kinds.contains(&kind))
    }

    fn try_lock_web_leader(&self, node: &str, host: &str) -> bool {
        let mut registry = self.registry();
        if registry.leader.is_some() {
            return false;
        }
        registry.leader = Some((node.to_owned(), host.to_owned()));
        true
    }

    fn leader_host_name(&self) -> Option<String> {
        self.registry().leader.as_ref().map(|(_, host)| host.clone())
    }

    fn subscribe(&self, listener: Arc<dyn MembershipListener>) {
        self.registry().listeners.push(listener);
    }

    fn leave(&self, node: &str) {
        let mut registry = self.registry();
        registry.operational.remove(node);
        if registry
            .leader
            .as_ref()
            .is_some_and(|(leader, _)| leader == node)
        {
            registry.leader = None;
        }
    }
}

struct RemoteForwarder {
    node: String,
    local: Arc<LocalAppState>,
}

impl MembershipListener for RemoteForwarder {
    fn on_operational(&self, node: &str, kind: ProcessKind) {
        if node == self.node {
            return;
        }
        debug!(
            target: APP_STATE_TARGET,
            remote = node,
            process = %kind,
            "remote process is operational"
        );
        self.local.notify(kind);
    }
}

/// App state of a node taking part in a cluster.
pub struct ClusterAppState {
    node: String,
    host: String,
    local: Arc<LocalAppState>,
    membership: Arc<dyn ClusterMembership>,
}

impl ClusterAppState {
    /// Joins `membership` as `node`, reachable on `host`.
    #[must_use]
    pub fn join(node: &str, host: &str, membership: Arc<dyn ClusterMembership>) -> Arc<Self> {
        let local = Arc::new(LocalAppState::new(host));
        membership.subscribe(Arc::new(RemoteForwarder {
            node: node.to_owned(),
            local: Arc::clone(&local),
        }));
        info!(
            target: APP_STATE_TARGET,
            node,
            host,
            "joined cluster"
        );
        Arc::new(Self {
            node: node.to_owned(),
            host: host.to_owned(),
            local,
            membership,
        })
    }
}

impl AppState for ClusterAppState {
    fn add_listener(&self, listener: Arc<dyn AppStateListener>) {
        self.local.add_listener(listener);
    }

    fn is_operational(&self, kind: ProcessKind, local: bool) -> bool {
        if local {
            return self.local.is_operational(kind, true);
        }
        self.membership.is_operational_elsewhere(&self.node, kind)
    }

    fn set_operational(&self, kind: ProcessKind) {
        if self.local.mark_operational(kind) {
            info!(
                target: APP_STATE_TARGET,
                node = %self.node,
                process = %kind,
                "process is operational"
            );
        }
        self.local.notify(kind);
        self.membership.publish_operational(&self.node, kind);
    }

    fn try_to_lock_web_leader(&self) -> bool {
        self.membership.try_lock_web_leader(&self.node, &self.host)
    }

    fn leader_host_name(&self) -> Option<String> {
        self.membership.leader_host_name()
    }

    fn reset(&self) {
        self.local.reset();
        self.membership.leave(&self.node);
    }

    fn close(&self) {
        self.membership.leave(&self.node);
    }
}
