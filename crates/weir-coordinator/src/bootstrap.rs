//! Startup handshake tracking
//!
//! At startup (and whenever the fleet changes before completion) the
//! coordinator asks every known node which maintainers it runs. The
//! bootstrapper tracks who has answered; once every known node has, it
//! hands the collected payloads to the controller exactly once.

use crate::messaging::OutboundMessage;
use crate::node::{NodeId, NodeInfo};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Factory producing the handshake message for one node
pub type BootstrapMessageFactory = Box<dyn Fn(&NodeId) -> OutboundMessage + Send + Sync>;

enum EntryState<T> {
    Pending { last_send: Option<Instant> },
    Responded(Option<T>),
}

/// Tracks the startup handshake across the node fleet.
///
/// Not internally synchronized; the controller drives it from the event
/// loop under its own lock.
pub struct Bootstrapper<T> {
    name: &'static str,
    message_factory: BootstrapMessageFactory,
    resend_interval: Duration,
    nodes: HashMap<NodeId, EntryState<T>>,
    bootstrapped: bool,
}

impl<T> Bootstrapper<T> {
    pub fn new(name: &'static str, message_factory: BootstrapMessageFactory) -> Self {
        Self {
            name,
            message_factory,
            resend_interval: Duration::from_millis(500),
            nodes: HashMap::new(),
            bootstrapped: false,
        }
    }

    /// Node ids the bootstrapper currently tracks
    pub fn all_node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    /// Whether every known node has answered (and the cache was handed out)
    pub fn check_all_node_initialized(&self) -> bool {
        self.bootstrapped
    }

    /// Track freshly seen nodes and return one handshake per node
    pub fn handle_new_nodes(&mut self, nodes: &[NodeInfo]) -> Vec<OutboundMessage> {
        let mut outbound = Vec::new();
        let now = Instant::now();
        for node in nodes {
            if self.nodes.contains_key(&node.id) {
                continue;
            }
            info!(component = self.name, node = %node.id, "sending bootstrap request");
            self.nodes.insert(
                node.id.clone(),
                EntryState::Pending {
                    last_send: Some(now),
                },
            );
            outbound.push((self.message_factory)(&node.id));
        }
        outbound
    }

    /// Store a node's handshake answer. Returns the full cache iff this
    /// response completed the set; the cache is consumed by the call.
    pub fn handle_bootstrap_response(&mut self, from: &NodeId, payload: T) -> Option<HashMap<NodeId, T>> {
        match self.nodes.get_mut(from) {
            Some(entry) => *entry = EntryState::Responded(Some(payload)),
            None => {
                warn!(component = self.name, node = %from, "bootstrap response from unknown node");
                return None;
            }
        }
        self.maybe_finish()
    }

    /// Forget removed nodes. Removing the last pending node may complete
    /// the set; the cache is returned the same single time.
    pub fn handle_remove_nodes(&mut self, removed: &[NodeId]) -> Option<HashMap<NodeId, T>> {
        for id in removed {
            self.nodes.remove(id);
        }
        self.maybe_finish()
    }

    /// Re-emit handshakes for nodes still pending past the resend interval
    pub fn resend_bootstrap_message(&mut self) -> Vec<OutboundMessage> {
        let now = Instant::now();
        let mut outbound = Vec::new();
        for (id, entry) in self.nodes.iter_mut() {
            if let EntryState::Pending { last_send } = entry {
                let due = match last_send {
                    None => true,
                    Some(at) => now.duration_since(*at) >= self.resend_interval,
                };
                if due {
                    *last_send = Some(now);
                    outbound.push((self.message_factory)(id));
                }
            }
        }
        outbound
    }

    fn maybe_finish(&mut self) -> Option<HashMap<NodeId, T>> {
        if self.bootstrapped || self.nodes.is_empty() {
            return None;
        }
        let all_responded = self
            .nodes
            .values()
            .all(|entry| matches!(entry, EntryState::Responded(_)));
        if !all_responded {
            return None;
        }
        self.bootstrapped = true;
        let mut cache = HashMap::new();
        for (id, entry) in self.nodes.iter_mut() {
            if let EntryState::Responded(payload) = entry {
                if let Some(payload) = payload.take() {
                    cache.insert(id.clone(), payload);
                }
            }
        }
        info!(component = self.name, nodes = cache.len(), "all nodes have sent bootstrap response");
        Some(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CoordinatorMessage;

    fn bootstrapper() -> Bootstrapper<u64> {
        Bootstrapper::new(
            "coordinator",
            Box::new(|id| {
                OutboundMessage::new(id.clone(), CoordinatorMessage::BootstrapRequest { version: 1 })
            }),
        )
    }

    fn nodes(ids: &[&str]) -> Vec<NodeInfo> {
        ids.iter()
            .map(|id| NodeInfo::new(*id, format!("{id}:8300")))
            .collect()
    }

    #[test]
    fn test_handshake_per_new_node_only() {
        let mut b = bootstrapper();
        assert_eq!(b.handle_new_nodes(&nodes(&["n1", "n2"])).len(), 2);
        // already-known nodes get no second handshake
        assert_eq!(b.handle_new_nodes(&nodes(&["n1", "n3"])).len(), 1);
        assert_eq!(b.all_node_ids().len(), 3);
    }

    #[test]
    fn test_cache_returned_exactly_once() {
        let mut b = bootstrapper();
        b.handle_new_nodes(&nodes(&["n1", "n2"]));

        assert!(b.handle_bootstrap_response(&"n1".to_string(), 10).is_none());
        assert!(!b.check_all_node_initialized());

        let cache = b.handle_bootstrap_response(&"n2".to_string(), 20).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache[&"n1".to_string()], 10);
        assert!(b.check_all_node_initialized());

        // a late duplicate answer never re-yields the cache
        assert!(b.handle_bootstrap_response(&"n1".to_string(), 11).is_none());
    }

    #[test]
    fn test_remove_nodes_can_complete_set() {
        let mut b = bootstrapper();
        b.handle_new_nodes(&nodes(&["n1", "n2"]));
        b.handle_bootstrap_response(&"n1".to_string(), 10);

        // n2 never answers and drops out of the cluster
        let cache = b.handle_remove_nodes(&["n2".to_string()]).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(b.check_all_node_initialized());
    }

    #[test]
    fn test_unknown_responder_ignored() {
        let mut b = bootstrapper();
        b.handle_new_nodes(&nodes(&["n1"]));
        assert!(b.handle_bootstrap_response(&"nx".to_string(), 1).is_none());
        assert!(!b.check_all_node_initialized());
    }

    #[test]
    fn test_resend_only_pending_and_overdue() {
        let mut b = bootstrapper();
        b.resend_interval = Duration::from_millis(0);
        b.handle_new_nodes(&nodes(&["n1", "n2"]));
        b.handle_bootstrap_response(&"n1".to_string(), 1);

        let resent = b.resend_bootstrap_message();
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].to, "n2");

        // within the interval nothing goes out
        b.resend_interval = Duration::from_secs(60);
        assert!(b.resend_bootstrap_message().is_empty());
    }
}
