//! Scheduling operators
//!
//! An operator is one in-flight placement action on one changefeed. The
//! three kinds are tagged variants sharing a small common surface: the
//! feed they act on, the node the current command goes to, a step
//! function fed from heartbeats, and a finished flag. The operator
//! controller owns their lifecycle.

use crate::changefeed::ChangefeedId;
use crate::node::NodeId;
use crate::protocol::{ComponentState, MaintainerStatus};

/// Why a maintainer is being torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveReason {
    /// User pause: keep metadata, feed moves to Stopped
    Pause,
    /// User removal: drop the feed from the registry
    Remove,
}

/// Registry side effect applied when an operator retires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireAction {
    /// Promote Scheduling -> Replicating
    MarkReplicating,
    /// Detach from the node (back to Absent, or Stopped for terminal feeds)
    Unbind,
    /// Drop the feed from the registry entirely
    RemoveFromRegistry,
}

/// Move runs in two phases: tear down on the origin, then start on the
/// destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MovePhase {
    RemovingFromOrigin,
    AddingToDest,
}

#[derive(Debug)]
pub struct AddOperator {
    id: ChangefeedId,
    dest: NodeId,
    finished: bool,
    failed: bool,
}

#[derive(Debug)]
pub struct MoveOperator {
    id: ChangefeedId,
    origin: NodeId,
    dest: NodeId,
    phase: MovePhase,
    finished: bool,
    failed: bool,
}

#[derive(Debug)]
pub struct RemoveOperator {
    id: ChangefeedId,
    dest: NodeId,
    reason: RemoveReason,
    finished: bool,
}

/// One in-flight scheduling action
#[derive(Debug)]
pub enum Operator {
    Add(AddOperator),
    Move(MoveOperator),
    Remove(RemoveOperator),
}

/// What the current outbound command for an operator is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    AddMaintainer { to: NodeId },
    RemoveMaintainer { to: NodeId, remove_metadata: bool },
}

impl Operator {
    pub fn add(id: ChangefeedId, dest: NodeId) -> Self {
        Operator::Add(AddOperator {
            id,
            dest,
            finished: false,
            failed: false,
        })
    }

    pub fn r#move(id: ChangefeedId, origin: NodeId, dest: NodeId) -> Self {
        Operator::Move(MoveOperator {
            id,
            origin,
            dest,
            phase: MovePhase::RemovingFromOrigin,
            finished: false,
            failed: false,
        })
    }

    pub fn remove(id: ChangefeedId, dest: NodeId, reason: RemoveReason) -> Self {
        Operator::Remove(RemoveOperator {
            id,
            dest,
            reason,
            finished: false,
        })
    }

    /// The changefeed this operator acts on
    pub fn changefeed_id(&self) -> ChangefeedId {
        match self {
            Operator::Add(op) => op.id,
            Operator::Move(op) => op.id,
            Operator::Remove(op) => op.id,
        }
    }

    /// Short kind tag for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Operator::Add(_) => "add",
            Operator::Move(_) => "move",
            Operator::Remove(_) => "remove",
        }
    }

    pub fn is_finished(&self) -> bool {
        match self {
            Operator::Add(op) => op.finished,
            Operator::Move(op) => op.finished,
            Operator::Remove(op) => op.finished,
        }
    }

    /// Whether this operator is a removal (any reason)
    pub fn is_remove(&self) -> bool {
        matches!(self, Operator::Remove(_))
    }

    /// The command the controller should (re-)send for this operator
    pub fn command(&self) -> OperatorCommand {
        match self {
            Operator::Add(op) => OperatorCommand::AddMaintainer {
                to: op.dest.clone(),
            },
            Operator::Move(op) => match op.phase {
                MovePhase::RemovingFromOrigin => OperatorCommand::RemoveMaintainer {
                    to: op.origin.clone(),
                    remove_metadata: false,
                },
                MovePhase::AddingToDest => OperatorCommand::AddMaintainer {
                    to: op.dest.clone(),
                },
            },
            Operator::Remove(op) => OperatorCommand::RemoveMaintainer {
                to: op.dest.clone(),
                remove_metadata: op.reason == RemoveReason::Remove,
            },
        }
    }

    /// Step the state machine with one heartbeat status. Returns true
    /// when the outbound command changed and must be sent promptly.
    pub fn step(&mut self, from: &NodeId, status: &MaintainerStatus) -> bool {
        debug_assert_eq!(status.changefeed_id, self.changefeed_id());
        match self {
            Operator::Add(op) => {
                if from == &op.dest {
                    match status.state {
                        ComponentState::Working => op.finished = true,
                        ComponentState::Stopped | ComponentState::Absent => {
                            op.finished = true;
                            op.failed = true;
                        }
                        ComponentState::Prepared => {}
                    }
                }
                false
            }
            Operator::Move(op) => match op.phase {
                MovePhase::RemovingFromOrigin => {
                    if from == &op.origin
                        && matches!(
                            status.state,
                            ComponentState::Stopped | ComponentState::Absent
                        )
                    {
                        op.phase = MovePhase::AddingToDest;
                        return true;
                    }
                    false
                }
                MovePhase::AddingToDest => {
                    if from == &op.dest {
                        match status.state {
                            ComponentState::Working => op.finished = true,
                            ComponentState::Stopped | ComponentState::Absent => {
                                op.finished = true;
                                op.failed = true;
                            }
                            ComponentState::Prepared => {}
                        }
                    }
                    false
                }
            },
            Operator::Remove(op) => {
                if from == &op.dest
                    && matches!(
                        status.state,
                        ComponentState::Stopped | ComponentState::Absent
                    )
                {
                    op.finished = true;
                }
                false
            }
        }
    }

    /// React to a node leaving the cluster. Returns true when the
    /// outbound command changed and must be sent promptly.
    pub fn on_node_removed(&mut self, node: &NodeId) -> bool {
        match self {
            Operator::Add(op) => {
                if node == &op.dest {
                    op.finished = true;
                    op.failed = true;
                }
                false
            }
            Operator::Move(op) => {
                if node == &op.dest {
                    op.finished = true;
                    op.failed = true;
                    false
                } else if node == &op.origin && op.phase == MovePhase::RemovingFromOrigin {
                    // nothing left to tear down, go straight to the add
                    op.phase = MovePhase::AddingToDest;
                    true
                } else {
                    false
                }
            }
            Operator::Remove(op) => {
                // a dead node has no maintainer left to remove
                if node == &op.dest {
                    op.finished = true;
                }
                false
            }
        }
    }

    /// Registry side effect to apply when the operator retires
    pub fn retire_action(&self) -> RetireAction {
        match self {
            Operator::Add(op) => {
                if op.failed {
                    RetireAction::Unbind
                } else {
                    RetireAction::MarkReplicating
                }
            }
            Operator::Move(op) => {
                if op.failed {
                    RetireAction::Unbind
                } else {
                    RetireAction::MarkReplicating
                }
            }
            Operator::Remove(op) => match op.reason {
                RemoveReason::Pause => RetireAction::Unbind,
                RemoveReason::Remove => RetireAction::RemoveFromRegistry,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn status(id: ChangefeedId, state: ComponentState) -> MaintainerStatus {
        MaintainerStatus {
            changefeed_id: id,
            state,
            checkpoint_ts: 0,
            err: None,
        }
    }

    #[test]
    fn test_add_acks_on_working() {
        let id = Uuid::new_v4();
        let mut op = Operator::add(id, "n1".to_string());
        assert!(!op.is_finished());

        // status from another node is not an ack
        op.step(&"n2".to_string(), &status(id, ComponentState::Working));
        assert!(!op.is_finished());

        op.step(&"n1".to_string(), &status(id, ComponentState::Working));
        assert!(op.is_finished());
        assert_eq!(op.retire_action(), RetireAction::MarkReplicating);
    }

    #[test]
    fn test_add_fails_on_dead_dest() {
        let id = Uuid::new_v4();
        let mut op = Operator::add(id, "n1".to_string());
        op.on_node_removed(&"n1".to_string());
        assert!(op.is_finished());
        assert_eq!(op.retire_action(), RetireAction::Unbind);
    }

    #[test]
    fn test_move_two_phases() {
        let id = Uuid::new_v4();
        let mut op = Operator::r#move(id, "n1".to_string(), "n2".to_string());
        assert_eq!(
            op.command(),
            OperatorCommand::RemoveMaintainer {
                to: "n1".to_string(),
                remove_metadata: false
            }
        );

        let resend = op.step(&"n1".to_string(), &status(id, ComponentState::Stopped));
        assert!(resend);
        assert_eq!(
            op.command(),
            OperatorCommand::AddMaintainer {
                to: "n2".to_string()
            }
        );

        op.step(&"n2".to_string(), &status(id, ComponentState::Working));
        assert!(op.is_finished());
        assert_eq!(op.retire_action(), RetireAction::MarkReplicating);
    }

    #[test]
    fn test_move_origin_death_skips_teardown() {
        let id = Uuid::new_v4();
        let mut op = Operator::r#move(id, "n1".to_string(), "n2".to_string());
        let resend = op.on_node_removed(&"n1".to_string());
        assert!(resend);
        assert!(!op.is_finished());
        assert_eq!(
            op.command(),
            OperatorCommand::AddMaintainer {
                to: "n2".to_string()
            }
        );
    }

    #[test]
    fn test_remove_acks_on_stopped() {
        let id = Uuid::new_v4();
        let mut op = Operator::remove(id, "n1".to_string(), RemoveReason::Remove);
        assert_eq!(
            op.command(),
            OperatorCommand::RemoveMaintainer {
                to: "n1".to_string(),
                remove_metadata: true
            }
        );

        op.step(&"n1".to_string(), &status(id, ComponentState::Stopped));
        assert!(op.is_finished());
        assert_eq!(op.retire_action(), RetireAction::RemoveFromRegistry);
    }

    #[test]
    fn test_pause_keeps_metadata() {
        let id = Uuid::new_v4();
        let op = Operator::remove(id, "n1".to_string(), RemoveReason::Pause);
        assert_eq!(
            op.command(),
            OperatorCommand::RemoveMaintainer {
                to: "n1".to_string(),
                remove_metadata: false
            }
        );
        assert_eq!(op.retire_action(), RetireAction::Unbind);
    }
}
