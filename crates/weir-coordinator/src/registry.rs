//! In-memory changefeed registry
//!
//! Every changefeed the coordinator knows about lives here, in exactly
//! one lifecycle bucket. The registry is the authoritative record of
//! which node owns which feed; operators and the controller mutate it,
//! schedulers read it.

use crate::changefeed::{Changefeed, ChangefeedId, DisplayName};
use crate::node::NodeId;
use crate::observability::CoordinatorMetrics;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Lifecycle bucket of a changefeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    /// Should run but has no maintainer yet
    Absent,
    /// A scheduling operator is moving it onto a node
    Scheduling,
    /// Running on its bound node
    Replicating,
    /// Paused or terminal, not schedulable
    Stopped,
}

/// Per-bucket size counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistrySizes {
    pub total: usize,
    pub absent: usize,
    pub scheduling: usize,
    pub replicating: usize,
    pub stopped: usize,
}

#[derive(Default)]
struct RegistryInner {
    changefeeds: HashMap<ChangefeedId, Arc<Changefeed>>,
    buckets: HashMap<ChangefeedId, Bucket>,
    display_names: HashMap<DisplayName, ChangefeedId>,
}

impl RegistryInner {
    fn insert(&mut self, cf: Arc<Changefeed>, bucket: Bucket) {
        self.display_names.insert(cf.display_name(), cf.id());
        self.buckets.insert(cf.id(), bucket);
        self.changefeeds.insert(cf.id(), cf);
    }
}

/// Four-bucket changefeed store with a display-name index.
///
/// All reads and writes are serialized by a single reader-writer lock;
/// no lock is ever held across a transport send or backend call.
#[derive(Default)]
pub struct ChangefeedRegistry {
    inner: RwLock<RegistryInner>,
}

impl ChangefeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Lookups ====================

    pub fn get_by_id(&self, id: &ChangefeedId) -> Option<Arc<Changefeed>> {
        self.inner.read().changefeeds.get(id).cloned()
    }

    pub fn get_by_display_name(&self, name: &DisplayName) -> Option<Arc<Changefeed>> {
        let inner = self.inner.read();
        let id = inner.display_names.get(name)?;
        inner.changefeeds.get(id).cloned()
    }

    pub fn get_all(&self) -> Vec<Arc<Changefeed>> {
        self.inner.read().changefeeds.values().cloned().collect()
    }

    pub fn bucket_of(&self, id: &ChangefeedId) -> Option<Bucket> {
        self.inner.read().buckets.get(id).copied()
    }

    // ==================== Bucket transitions ====================

    /// Add a feed that should run but has no maintainer
    pub fn add_absent(&self, cf: Arc<Changefeed>) {
        cf.set_node_id(None);
        self.inner.write().insert(cf, Bucket::Absent);
    }

    /// Add a paused or terminal feed
    pub fn add_stopped(&self, cf: Arc<Changefeed>) {
        cf.set_node_id(None);
        self.inner.write().insert(cf, Bucket::Stopped);
    }

    /// Add a feed already running on a remote node (bootstrap path)
    pub fn add_replicating(&self, cf: Arc<Changefeed>, node: NodeId) {
        cf.set_node_id(Some(node));
        self.inner.write().insert(cf, Bucket::Replicating);
    }

    /// Bind a feed to a node while a scheduling operator is in flight
    pub fn bind_node(&self, id: &ChangefeedId, node: NodeId) {
        let mut inner = self.inner.write();
        if let Some(cf) = inner.changefeeds.get(id) {
            cf.set_node_id(Some(node));
            inner.buckets.insert(*id, Bucket::Scheduling);
        }
    }

    /// Promote a scheduled feed to replicating once its maintainer is working
    pub fn mark_replicating(&self, id: &ChangefeedId) {
        let mut inner = self.inner.write();
        let Some(cf) = inner.changefeeds.get(id) else {
            return;
        };
        if cf.node_id().is_none() {
            warn!(changefeed = %id, "replicating without a bound node, keeping bucket");
            return;
        }
        inner.buckets.insert(*id, Bucket::Replicating);
    }

    /// Detach a feed from its node: back to Absent when it should still
    /// run, to Stopped otherwise.
    pub fn unbind(&self, id: &ChangefeedId) {
        let mut inner = self.inner.write();
        let Some(cf) = inner.changefeeds.get(id) else {
            return;
        };
        cf.set_node_id(None);
        let bucket = if cf.should_run() {
            Bucket::Absent
        } else {
            Bucket::Stopped
        };
        inner.buckets.insert(*id, bucket);
    }

    /// Move a stopped feed back to Absent so the next tick reschedules it
    pub fn resume(&self, id: &ChangefeedId) {
        let mut inner = self.inner.write();
        let Some(bucket) = inner.buckets.get(id).copied() else {
            return;
        };
        if bucket != Bucket::Stopped {
            warn!(changefeed = %id, ?bucket, "resume on a feed that is not stopped, ignoring");
            return;
        }
        inner.buckets.insert(*id, Bucket::Absent);
    }

    /// Swap the info of a stopped feed in place (update path)
    pub fn replace_stopped(&self, cf: &Arc<Changefeed>, new_info: crate::changefeed::ChangefeedInfo) {
        let mut inner = self.inner.write();
        if inner.buckets.get(&cf.id()) != Some(&Bucket::Stopped) {
            warn!(changefeed = %cf.id(), "replace on a feed that is not stopped, ignoring");
            return;
        }
        inner.display_names.remove(&cf.display_name());
        cf.set_info(new_info);
        inner.display_names.insert(cf.display_name(), cf.id());
    }

    /// Drop a feed entirely (metadata removal)
    pub fn remove(&self, id: &ChangefeedId) -> Option<Arc<Changefeed>> {
        let mut inner = self.inner.write();
        let cf = inner.changefeeds.remove(id)?;
        inner.buckets.remove(id);
        inner.display_names.remove(&cf.display_name());
        Some(cf)
    }

    // ==================== Scheduler views ====================

    /// Up to `limit` absent feeds that are eligible to run
    pub fn absent_runnable(&self, limit: usize) -> Vec<Arc<Changefeed>> {
        let inner = self.inner.read();
        let mut feeds: Vec<_> = inner
            .buckets
            .iter()
            .filter(|(_, b)| **b == Bucket::Absent)
            .filter_map(|(id, _)| inner.changefeeds.get(id))
            .filter(|cf| cf.should_run())
            .cloned()
            .collect();
        // deterministic pick order across ticks
        feeds.sort_by_key(|cf| cf.id());
        feeds.truncate(limit);
        feeds
    }

    /// Scheduled + replicating feed count per node
    pub fn node_changefeed_counts(&self) -> HashMap<NodeId, usize> {
        let inner = self.inner.read();
        let mut counts = HashMap::new();
        for (id, bucket) in &inner.buckets {
            if matches!(bucket, Bucket::Scheduling | Bucket::Replicating) {
                if let Some(node) = inner.changefeeds.get(id).and_then(|cf| cf.node_id()) {
                    *counts.entry(node).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    /// Feeds currently replicating on the given node
    pub fn replicating_on_node(&self, node: &NodeId) -> Vec<Arc<Changefeed>> {
        let inner = self.inner.read();
        inner
            .buckets
            .iter()
            .filter(|(_, b)| **b == Bucket::Replicating)
            .filter_map(|(id, _)| inner.changefeeds.get(id))
            .filter(|cf| cf.node_id().as_ref() == Some(node))
            .cloned()
            .collect()
    }

    /// Feeds bound to the given node, scheduled or replicating
    pub fn bound_to_node(&self, node: &NodeId) -> Vec<Arc<Changefeed>> {
        let inner = self.inner.read();
        inner
            .buckets
            .iter()
            .filter(|(_, b)| matches!(b, Bucket::Scheduling | Bucket::Replicating))
            .filter_map(|(id, _)| inner.changefeeds.get(id))
            .filter(|cf| cf.node_id().as_ref() == Some(node))
            .cloned()
            .collect()
    }

    // ==================== Metrics ====================

    pub fn sizes(&self) -> RegistrySizes {
        let inner = self.inner.read();
        let mut sizes = RegistrySizes {
            total: inner.changefeeds.len(),
            ..Default::default()
        };
        for bucket in inner.buckets.values() {
            match bucket {
                Bucket::Absent => sizes.absent += 1,
                Bucket::Scheduling => sizes.scheduling += 1,
                Bucket::Replicating => sizes.replicating += 1,
                Bucket::Stopped => sizes.stopped += 1,
            }
        }
        sizes
    }

    /// Push bucket sizes to the metrics facade
    pub fn record_metrics(&self) {
        let sizes = self.sizes();
        CoordinatorMetrics::set_changefeed_total(sizes.total);
        CoordinatorMetrics::set_changefeed_absent(sizes.absent);
        CoordinatorMetrics::set_changefeed_scheduling(sizes.scheduling);
        CoordinatorMetrics::set_changefeed_replicating(sizes.replicating);
        CoordinatorMetrics::set_changefeed_stopped(sizes.stopped);
    }
}
