//! Operator controller
//!
//! Owns every outstanding scheduling operator and executes them against
//! nodes: sends the current command, re-sends after a backoff, retires
//! finished operators and applies their registry side effects. At most
//! one operator exists per changefeed at any time.

use crate::changefeed::ChangefeedId;
use crate::messaging::{MessageSender, OutboundMessage};
use crate::node::NodeId;
use crate::observability::CoordinatorMetrics;
use crate::operator::{Operator, OperatorCommand, RemoveReason, RetireAction};
use crate::protocol::{CoordinatorMessage, MaintainerStatus};
use crate::registry::ChangefeedRegistry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

struct OperatorEntry {
    op: Operator,
    last_sent: Option<Instant>,
    attempts: u64,
}

/// Manages outstanding operators and their outbound commands
pub struct OperatorController {
    registry: Arc<ChangefeedRegistry>,
    sender: Arc<dyn MessageSender>,
    batch_size: usize,
    resend_interval: Duration,
    operators: Mutex<HashMap<ChangefeedId, OperatorEntry>>,
}

impl OperatorController {
    pub fn new(
        registry: Arc<ChangefeedRegistry>,
        sender: Arc<dyn MessageSender>,
        batch_size: usize,
        resend_interval: Duration,
    ) -> Self {
        Self {
            registry,
            sender,
            batch_size,
            resend_interval,
            operators: Mutex::new(HashMap::new()),
        }
    }

    // ==================== Submission ====================

    /// File an Add operator. Returns false when the feed already has one.
    pub fn submit_add(&self, id: ChangefeedId, dest: NodeId) -> bool {
        let mut operators = self.operators.lock();
        if operators.contains_key(&id) {
            return false;
        }
        self.registry.bind_node(&id, dest.clone());
        info!(changefeed = %id, node = %dest, "add maintainer operator created");
        CoordinatorMetrics::increment_operators_created("add");
        operators.insert(
            id,
            OperatorEntry {
                op: Operator::add(id, dest),
                last_sent: None,
                attempts: 0,
            },
        );
        true
    }

    /// File a Move operator. Returns false when the feed already has one.
    pub fn submit_move(&self, id: ChangefeedId, origin: NodeId, dest: NodeId) -> bool {
        let mut operators = self.operators.lock();
        if operators.contains_key(&id) {
            return false;
        }
        self.registry.bind_node(&id, dest.clone());
        info!(changefeed = %id, origin = %origin, node = %dest, "move maintainer operator created");
        CoordinatorMetrics::increment_operators_created("move");
        operators.insert(
            id,
            OperatorEntry {
                op: Operator::r#move(id, origin, dest),
                last_sent: None,
                attempts: 0,
            },
        );
        true
    }

    /// Stop a changefeed: pause when `remove` is false, drop it from the
    /// registry when true. An in-flight Add/Move for the feed is
    /// cancelled and replaced; a pending removal is left alone.
    pub fn stop_changefeed(&self, id: ChangefeedId, remove: bool) -> bool {
        let reason = if remove {
            RemoveReason::Remove
        } else {
            RemoveReason::Pause
        };
        let mut operators = self.operators.lock();
        if let Some(entry) = operators.get(&id) {
            if entry.op.is_remove() {
                return false;
            }
            info!(changefeed = %id, kind = entry.op.kind(), "cancelling operator for stop");
            operators.remove(&id);
        }
        let Some(cf) = self.registry.get_by_id(&id) else {
            return false;
        };
        let Some(dest) = cf.node_id() else {
            // no maintainer anywhere: apply the effect directly
            if remove {
                self.registry.remove(&id);
            } else {
                self.registry.unbind(&id);
            }
            return true;
        };
        info!(changefeed = %id, node = %dest, remove, "remove maintainer operator created");
        CoordinatorMetrics::increment_operators_created("remove");
        operators.insert(
            id,
            OperatorEntry {
                op: Operator::remove(id, dest, reason),
                last_sent: None,
                attempts: 0,
            },
        );
        true
    }

    // ==================== Progress ====================

    /// Advance the feed's operator with one heartbeat status
    pub fn update_status(&self, from: &NodeId, status: &MaintainerStatus) {
        let mut operators = self.operators.lock();
        let id = status.changefeed_id;
        let Some(entry) = operators.get_mut(&id) else {
            return;
        };
        if entry.op.step(from, status) {
            // command target changed, send on the next poll
            entry.last_sent = None;
        }
        if entry.op.is_finished() {
            let entry = operators.remove(&id).expect("operator present");
            self.retire(entry);
        }
    }

    /// A node left the cluster: fail or fast-forward every operator that
    /// touches it, then detach the node's remaining feeds so the basic
    /// scheduler reassigns them.
    pub fn on_node_removed(&self, node: &NodeId) {
        let mut operators = self.operators.lock();
        let mut finished = Vec::new();
        for (id, entry) in operators.iter_mut() {
            if entry.op.on_node_removed(node) {
                entry.last_sent = None;
            }
            if entry.op.is_finished() {
                finished.push(*id);
            }
        }
        for id in finished {
            let entry = operators.remove(&id).expect("operator present");
            self.retire(entry);
        }
        for cf in self.registry.bound_to_node(node) {
            if !operators.contains_key(&cf.id()) {
                self.registry.unbind(&cf.id());
            }
        }
    }

    /// Periodic tick: send fresh or overdue commands in batches and
    /// refresh the operator gauge.
    pub fn poll(&self) {
        let now = Instant::now();
        let mut outbound = Vec::new();
        {
            let mut operators = self.operators.lock();
            let mut remaining = self.batch_size;
            for entry in operators.values_mut() {
                if remaining == 0 {
                    break;
                }
                let due = match entry.last_sent {
                    None => true,
                    Some(at) => now.duration_since(at) >= self.resend_interval,
                };
                if !due {
                    continue;
                }
                if let Some(message) = self.build_command(&entry.op) {
                    entry.last_sent = Some(now);
                    entry.attempts += 1;
                    remaining -= 1;
                    outbound.push(message);
                }
            }
            CoordinatorMetrics::set_operator_count(operators.len());
        }
        // sends happen outside the operator lock
        for message in outbound {
            let _ = self.sender.send(message);
        }
    }

    // ==================== Views ====================

    pub fn has_operator(&self, id: &ChangefeedId) -> bool {
        self.operators.lock().contains_key(id)
    }

    pub fn operator_count(&self) -> usize {
        self.operators.lock().len()
    }

    /// Attempt counter for one operator, for tests and introspection
    pub fn attempts(&self, id: &ChangefeedId) -> Option<u64> {
        self.operators.lock().get(id).map(|e| e.attempts)
    }

    // ==================== Internals ====================

    fn build_command(&self, op: &Operator) -> Option<OutboundMessage> {
        let id = op.changefeed_id();
        match op.command() {
            OperatorCommand::AddMaintainer { to } => {
                let cf = self.registry.get_by_id(&id)?;
                Some(OutboundMessage::new(
                    to,
                    CoordinatorMessage::AddMaintainerRequest {
                        changefeed_id: id,
                        info: cf.info(),
                        checkpoint_ts: cf.checkpoint_ts(),
                    },
                ))
            }
            OperatorCommand::RemoveMaintainer { to, remove_metadata } => {
                Some(OutboundMessage::new(
                    to,
                    CoordinatorMessage::RemoveMaintainerRequest {
                        changefeed_id: id,
                        cascade: true,
                        remove_metadata,
                    },
                ))
            }
        }
    }

    fn retire(&self, entry: OperatorEntry) {
        let id = entry.op.changefeed_id();
        info!(
            changefeed = %id,
            kind = entry.op.kind(),
            attempts = entry.attempts,
            "operator finished"
        );
        CoordinatorMetrics::increment_operators_finished(entry.op.kind());
        match entry.op.retire_action() {
            RetireAction::MarkReplicating => self.registry.mark_replicating(&id),
            RetireAction::Unbind => self.registry.unbind(&id),
            RetireAction::RemoveFromRegistry => {
                self.registry.remove(&id);
            }
        }
    }
}
