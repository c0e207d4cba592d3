//! Row-change events from the storage layer's change stream

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Mutation kind of a row event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RowOpType {
    #[default]
    Put,
    Delete,
}

/// One row-level event from the two-phase transaction protocol.
///
/// A prewrite carries the value (and, for pipelined DMLs, a generation);
/// a commit carries the commit timestamp; a rollback cancels the
/// transaction for this key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RowEvent {
    pub op_type: RowOpType,
    pub start_ts: u64,
    pub commit_ts: u64,
    pub key: Bytes,
    pub value: Bytes,
    pub old_value: Bytes,
    /// Prewrite generation for pipelined DMLs; 0 for classic transactions
    pub generation: u64,
}

impl RowEvent {
    /// Whether this event carries no value (e.g. a fake prewrite emitted
    /// by a transaction heartbeat)
    pub fn has_empty_value(&self) -> bool {
        self.value.is_empty()
    }
}
