//! Message transport seam
//!
//! The real transport (addressable RPC between nodes) lives outside this
//! crate; the coordinator only needs fire-and-forget "send to node".
//! [`LocalRouter`] is the in-process implementation used by tests and
//! single-binary deployments.

use crate::error::{CoordinatorError, Result};
use crate::node::NodeId;
use crate::protocol::CoordinatorMessage;
use dashmap::DashMap;
use std::fmt;

/// A message addressed to one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub to: NodeId,
    pub message: CoordinatorMessage,
}

impl OutboundMessage {
    pub fn new(to: impl Into<NodeId>, message: CoordinatorMessage) -> Self {
        Self {
            to: to.into(),
            message,
        }
    }
}

/// A message received from one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub from: NodeId,
    pub message: CoordinatorMessage,
}

impl IncomingMessage {
    pub fn new(from: impl Into<NodeId>, message: CoordinatorMessage) -> Self {
        Self {
            from: from.into(),
            message,
        }
    }
}

/// Fire-and-forget send. Errors are surfaced but callers are expected to
/// rely on the periodic resend layer rather than per-send retries.
pub trait MessageSender: Send + Sync {
    fn send(&self, message: OutboundMessage) -> Result<()>;
}

/// In-process router delivering into per-node queues
#[derive(Default)]
pub struct LocalRouter {
    queues: DashMap<NodeId, Vec<CoordinatorMessage>>,
}

impl LocalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything queued for one node
    pub fn take(&self, node: &NodeId) -> Vec<CoordinatorMessage> {
        self.queues
            .get_mut(node)
            .map(|mut q| std::mem::take(q.value_mut()))
            .unwrap_or_default()
    }

    /// Total queued messages across all nodes
    pub fn pending_count(&self) -> usize {
        self.queues.iter().map(|q| q.value().len()).sum()
    }
}

impl MessageSender for LocalRouter {
    fn send(&self, message: OutboundMessage) -> Result<()> {
        if message.to.is_empty() {
            return Err(CoordinatorError::Transport("empty target node".into()));
        }
        self.queues
            .entry(message.to)
            .or_default()
            .push(message.message);
        Ok(())
    }
}

impl fmt::Debug for LocalRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalRouter")
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_queues_per_node() {
        let router = LocalRouter::new();
        router
            .send(OutboundMessage::new(
                "n1",
                CoordinatorMessage::BootstrapRequest { version: 1 },
            ))
            .unwrap();
        router
            .send(OutboundMessage::new(
                "n2",
                CoordinatorMessage::BootstrapRequest { version: 1 },
            ))
            .unwrap();

        assert_eq!(router.pending_count(), 2);
        assert_eq!(router.take(&"n1".to_string()).len(), 1);
        assert_eq!(router.take(&"n1".to_string()).len(), 0);
        assert_eq!(router.pending_count(), 1);
    }

    #[test]
    fn test_empty_target_rejected() {
        let router = LocalRouter::new();
        let result = router.send(OutboundMessage::new(
            "",
            CoordinatorMessage::BootstrapRequest { version: 1 },
        ));
        assert!(result.is_err());
    }
}
