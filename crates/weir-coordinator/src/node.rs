//! Worker node types and the live-node view
//!
//! The node watcher (service discovery, liveness) is an external
//! collaborator; [`NodeManager`] is the coordinator-side view of its
//! output: the current live-node set plus change notifications.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique node identifier
pub type NodeId = String;

/// Information about a worker node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    /// Unique node identifier
    pub id: NodeId,

    /// Address other nodes and clients use to reach this node
    pub advertise_addr: String,

    /// Liveness epoch, bumped each time the node re-registers
    pub epoch: u64,
}

impl NodeInfo {
    /// Create new node info
    pub fn new(id: impl Into<NodeId>, advertise_addr: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            advertise_addr: advertise_addr.into(),
            epoch: 0,
        }
    }

    /// Set the liveness epoch
    pub fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }
}

/// Callback invoked when the live-node set changes
pub type NodeChangeHandler = Box<dyn Fn(&HashMap<NodeId, NodeInfo>) + Send + Sync>;

/// Coordinator-side cache of the live-node set.
///
/// The external watcher pushes full snapshots through
/// [`NodeManager::apply_node_changes`]; registered handlers fire on every
/// snapshot so consumers can flip their own dirty flags without holding
/// this manager's lock.
#[derive(Default)]
pub struct NodeManager {
    alive: RwLock<HashMap<NodeId, NodeInfo>>,
    handlers: Mutex<Vec<(String, NodeChangeHandler)>>,
}

impl NodeManager {
    /// Create an empty node manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the live-node set with a fresh snapshot and notify handlers
    pub fn apply_node_changes(&self, nodes: HashMap<NodeId, NodeInfo>) {
        *self.alive.write() = nodes;
        let snapshot = self.alive.read().clone();
        for (_, handler) in self.handlers.lock().iter() {
            handler(&snapshot);
        }
    }

    /// Register a named change handler
    pub fn register_node_change_handler(&self, name: impl Into<String>, handler: NodeChangeHandler) {
        self.handlers.lock().push((name.into(), handler));
    }

    /// Current live-node set
    pub fn get_alive_nodes(&self) -> HashMap<NodeId, NodeInfo> {
        self.alive.read().clone()
    }

    /// Look up a single live node
    pub fn get_node_info(&self, id: &NodeId) -> Option<NodeInfo> {
        self.alive.read().get(id).cloned()
    }

    /// Number of live nodes
    pub fn alive_count(&self) -> usize {
        self.alive.read().len()
    }
}
