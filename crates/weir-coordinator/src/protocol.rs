//! Wire protocol between the coordinator and maintainer nodes

use crate::changefeed::{ChangefeedId, ChangefeedInfo};
use crate::error::{CoordinatorError, Result};
use serde::{Deserialize, Serialize};

/// Maximum message size (4 MB)
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Lifecycle state a maintainer reports for one changefeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    /// Not present on the node
    Absent,
    /// Created but not yet replicating
    Prepared,
    /// Actively replicating
    Working,
    /// Stopped and about to be torn down
    Stopped,
}

/// Error a maintainer attaches to a status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningError {
    /// Node the error originated on
    pub node: String,
    pub code: String,
    pub message: String,
}

/// Per-changefeed status carried in heartbeats and bootstrap responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintainerStatus {
    pub changefeed_id: ChangefeedId,
    pub state: ComponentState,
    pub checkpoint_ts: u64,
    pub err: Option<RunningError>,
}

/// Messages exchanged with maintainer nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorMessage {
    /// Startup handshake: ask a node which maintainers it runs
    BootstrapRequest { version: i64 },

    /// Node's answer: every maintainer it currently runs
    BootstrapResponse { statuses: Vec<MaintainerStatus> },

    /// Periodic status report from a node's maintainers
    Heartbeat { statuses: Vec<MaintainerStatus> },

    /// Command: start a maintainer for the given changefeed
    AddMaintainerRequest {
        changefeed_id: ChangefeedId,
        info: ChangefeedInfo,
        checkpoint_ts: u64,
    },

    /// Command: tear a maintainer down
    RemoveMaintainerRequest {
        changefeed_id: ChangefeedId,
        /// Also stop the feed's dispatchers on the node
        cascade: bool,
        /// Also drop node-local metadata for the feed
        remove_metadata: bool,
    },
}

impl CoordinatorMessage {
    /// Short type tag for logs
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorMessage::BootstrapRequest { .. } => "bootstrap-request",
            CoordinatorMessage::BootstrapResponse { .. } => "bootstrap-response",
            CoordinatorMessage::Heartbeat { .. } => "heartbeat",
            CoordinatorMessage::AddMaintainerRequest { .. } => "add-maintainer",
            CoordinatorMessage::RemoveMaintainerRequest { .. } => "remove-maintainer",
        }
    }
}

/// Encode a message to bytes
pub fn encode_message(message: &CoordinatorMessage) -> Result<Vec<u8>> {
    postcard::to_allocvec(message).map_err(|e| CoordinatorError::Serialization(e.to_string()))
}

/// Decode a message from bytes
pub fn decode_message(bytes: &[u8]) -> Result<CoordinatorMessage> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(CoordinatorError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    postcard::from_bytes(bytes).map_err(|e| CoordinatorError::Deserialization(e.to_string()))
}
