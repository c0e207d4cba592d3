//! Changefeed identity, metadata and per-feed runtime state

use crate::node::NodeId;
use crate::protocol::{ComponentState, MaintainerStatus, RunningError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable changefeed identifier
pub type ChangefeedId = Uuid;

/// User-facing changefeed name, unique per namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayName {
    pub namespace: String,
    pub name: String,
}

impl DisplayName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Declared state of a changefeed, persisted in its info
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedState {
    /// Running or eligible to run
    #[default]
    Normal,
    /// Paused by the user
    Stopped,
    /// Terminated with an unrecoverable error
    Failed,
    /// Reached its configured end timestamp
    Finished,
}

impl FeedState {
    /// Whether a feed in this state should be scheduled onto a node
    pub fn should_run(&self) -> bool {
        matches!(self, FeedState::Normal)
    }
}

/// Metadata lifecycle progress, persisted alongside the status so a
/// restarted coordinator can resume an interrupted stop/remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Progress {
    #[default]
    Normal,
    Stopping,
    Removing,
}

/// Immutable replication configuration of a changefeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangefeedInfo {
    pub id: ChangefeedId,
    pub display_name: DisplayName,
    /// Timestamp replication starts from
    pub start_ts: u64,
    /// Downstream sink URI
    pub sink_uri: String,
    /// Declared state
    pub state: FeedState,
}

impl ChangefeedInfo {
    pub fn new(display_name: DisplayName, start_ts: u64, sink_uri: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name,
            start_ts,
            sink_uri: sink_uri.into(),
            state: FeedState::Normal,
        }
    }
}

/// Mutable replication status of a changefeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChangefeedStatus {
    /// Latest resolved checkpoint
    pub checkpoint_ts: u64,
    /// Metadata lifecycle progress
    pub progress: Progress,
    /// Maintainer address, filled on reads that resolve the owner
    pub maintainer_addr: Option<String>,
}

impl ChangefeedStatus {
    pub fn new(checkpoint_ts: u64) -> Self {
        Self {
            checkpoint_ts,
            ..Default::default()
        }
    }
}

/// Persisted changefeed record as the metadata backend returns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangefeedMeta {
    pub info: ChangefeedInfo,
    pub status: ChangefeedStatus,
}

/// In-memory runtime state of one changefeed.
///
/// Shared as `Arc<Changefeed>` between the registry, operators and the
/// controller; interior locks keep each field consistent on its own while
/// the registry's bucket lock provides the cross-feed view.
pub struct Changefeed {
    id: ChangefeedId,
    info: RwLock<ChangefeedInfo>,
    checkpoint_ts: RwLock<u64>,
    node_id: RwLock<Option<NodeId>>,
    /// Last state/error pair surfaced to the state-change channel,
    /// used to suppress duplicate notifications.
    reported: RwLock<(FeedState, Option<RunningError>)>,
}

impl Changefeed {
    /// Construct from persisted metadata at the given checkpoint
    pub fn new(info: ChangefeedInfo, checkpoint_ts: u64) -> Self {
        let state = info.state;
        Self {
            id: info.id,
            info: RwLock::new(info),
            checkpoint_ts: RwLock::new(checkpoint_ts),
            node_id: RwLock::new(None),
            reported: RwLock::new((state, None)),
        }
    }

    pub fn id(&self) -> ChangefeedId {
        self.id
    }

    pub fn info(&self) -> ChangefeedInfo {
        self.info.read().clone()
    }

    pub fn set_info(&self, info: ChangefeedInfo) {
        *self.info.write() = info;
    }

    pub fn display_name(&self) -> DisplayName {
        self.info.read().display_name.clone()
    }

    pub fn checkpoint_ts(&self) -> u64 {
        *self.checkpoint_ts.read()
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.node_id.read().clone()
    }

    pub(crate) fn set_node_id(&self, node: Option<NodeId>) {
        *self.node_id.write() = node;
    }

    /// Whether this feed should be scheduled
    pub fn should_run(&self) -> bool {
        self.info.read().state.should_run()
    }

    /// Fold a heartbeat status into this feed.
    ///
    /// The checkpoint only moves forward; a regression in a heartbeat is
    /// stale input and is dropped. Returns the new `(state, error)` pair
    /// when the derived feed state changed since the last report.
    pub fn update_status(
        &self,
        status: &MaintainerStatus,
    ) -> Option<(FeedState, Option<RunningError>)> {
        {
            let mut ts = self.checkpoint_ts.write();
            if status.checkpoint_ts > *ts {
                *ts = status.checkpoint_ts;
            }
        }
        let derived = match (&status.err, status.state) {
            (Some(_), _) => FeedState::Failed,
            (None, ComponentState::Stopped) => self.info.read().state,
            (None, _) => FeedState::Normal,
        };
        let mut reported = self.reported.write();
        if reported.0 != derived {
            *reported = (derived, status.err.clone());
            return Some(reported.clone());
        }
        None
    }

    /// Overwrite the checkpoint unconditionally (resume with override)
    pub fn force_checkpoint(&self, checkpoint_ts: u64) {
        *self.checkpoint_ts.write() = checkpoint_ts;
    }
}

impl fmt::Debug for Changefeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Changefeed")
            .field("id", &self.id)
            .field("display_name", &self.display_name().to_string())
            .field("checkpoint_ts", &self.checkpoint_ts())
            .field("node_id", &self.node_id())
            .finish()
    }
}
