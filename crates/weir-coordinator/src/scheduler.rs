//! Scheduling strategies
//!
//! Schedulers inspect the registry and file operators with the operator
//! controller. Two strategies ship: *basic* assigns absent feeds to live
//! nodes, *balance* periodically re-spreads feeds across the fleet. Both
//! are deliberately deterministic so two coordinators bootstrapping from
//! the same state make the same decisions.

use crate::node::{NodeId, NodeManager};
use crate::operator_controller::OperatorController;
use crate::registry::ChangefeedRegistry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A scheduling strategy run on its own interval
pub trait Scheduler: Send + Sync {
    fn name(&self) -> &'static str;

    /// How often this scheduler runs
    fn interval(&self) -> Duration;

    /// One pass; returns the number of operators filed
    fn execute(&self) -> usize;
}

/// Least-loaded node among `counts`, lexicographic node id as tie-break
fn least_loaded(counts: &HashMap<NodeId, usize>) -> Option<NodeId> {
    counts
        .iter()
        .min_by(|(a_id, a_count), (b_id, b_count)| a_count.cmp(b_count).then(a_id.cmp(b_id)))
        .map(|(id, _)| id.clone())
}

/// Heaviest node among `counts`, lexicographic node id as tie-break
fn most_loaded(counts: &HashMap<NodeId, usize>) -> Option<NodeId> {
    counts
        .iter()
        .max_by(|(a_id, a_count), (b_id, b_count)| a_count.cmp(b_count).then(b_id.cmp(a_id)))
        .map(|(id, _)| id.clone())
}

/// Per-node feed counts for every live node, zero-filled
fn live_node_counts(
    registry: &ChangefeedRegistry,
    node_manager: &NodeManager,
) -> HashMap<NodeId, usize> {
    let live = node_manager.get_alive_nodes();
    let counts = registry.node_changefeed_counts();
    live.into_keys()
        .map(|id| {
            let count = counts.get(&id).copied().unwrap_or(0);
            (id, count)
        })
        .collect()
}

/// Assigns absent feeds to live nodes, up to `batch_size` per pass
pub struct BasicScheduler {
    batch_size: usize,
    operator_controller: Arc<OperatorController>,
    registry: Arc<ChangefeedRegistry>,
    node_manager: Arc<NodeManager>,
}

impl BasicScheduler {
    pub fn new(
        batch_size: usize,
        operator_controller: Arc<OperatorController>,
        registry: Arc<ChangefeedRegistry>,
        node_manager: Arc<NodeManager>,
    ) -> Self {
        Self {
            batch_size,
            operator_controller,
            registry,
            node_manager,
        }
    }
}

impl Scheduler for BasicScheduler {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(500)
    }

    fn execute(&self) -> usize {
        let absent = self.registry.absent_runnable(self.batch_size);
        if absent.is_empty() {
            return 0;
        }
        let mut counts = live_node_counts(&self.registry, &self.node_manager);
        if counts.is_empty() {
            // no live node: try again next tick
            return 0;
        }

        let mut filed = 0;
        for cf in absent {
            let Some(node) = least_loaded(&counts) else {
                break;
            };
            if self.operator_controller.submit_add(cf.id(), node.clone()) {
                *counts.get_mut(&node).expect("live node present") += 1;
                filed += 1;
            }
        }
        if filed > 0 {
            debug!(filed, "basic scheduler assigned absent changefeeds");
        }
        filed
    }
}

/// Re-spreads feeds when the heaviest and lightest node differ by two or
/// more. Runs only when no operator is outstanding, so scheduling and
/// balancing never fight over the same feeds.
pub struct BalanceScheduler {
    batch_size: usize,
    balance_interval: Duration,
    operator_controller: Arc<OperatorController>,
    registry: Arc<ChangefeedRegistry>,
    node_manager: Arc<NodeManager>,
}

impl BalanceScheduler {
    pub fn new(
        batch_size: usize,
        balance_interval: Duration,
        operator_controller: Arc<OperatorController>,
        registry: Arc<ChangefeedRegistry>,
        node_manager: Arc<NodeManager>,
    ) -> Self {
        Self {
            batch_size,
            balance_interval,
            operator_controller,
            registry,
            node_manager,
        }
    }
}

impl Scheduler for BalanceScheduler {
    fn name(&self) -> &'static str {
        "balance"
    }

    fn interval(&self) -> Duration {
        self.balance_interval
    }

    fn execute(&self) -> usize {
        if self.operator_controller.operator_count() > 0 {
            return 0;
        }
        let mut counts = live_node_counts(&self.registry, &self.node_manager);
        if counts.len() < 2 {
            return 0;
        }

        let mut moved_feeds: HashSet<crate::changefeed::ChangefeedId> = HashSet::new();
        let mut filed = 0;
        while filed < self.batch_size {
            let (heavy, light) = match (most_loaded(&counts), least_loaded(&counts)) {
                (Some(h), Some(l)) => (h, l),
                _ => break,
            };
            if counts[&heavy].saturating_sub(counts[&light]) < 2 {
                break;
            }
            // pick a feed from the heavy node that has not moved this pass
            let mut candidates = self.registry.replicating_on_node(&heavy);
            candidates.sort_by_key(|cf| cf.id());
            let Some(cf) = candidates
                .into_iter()
                .find(|cf| !moved_feeds.contains(&cf.id()))
            else {
                break;
            };
            let id = cf.id();
            if !self
                .operator_controller
                .submit_move(id, heavy.clone(), light.clone())
            {
                break;
            }
            moved_feeds.insert(id);
            *counts.get_mut(&heavy).expect("node present") -= 1;
            *counts.get_mut(&light).expect("node present") += 1;
            filed += 1;
        }
        if filed > 0 {
            debug!(filed, "balance scheduler moved changefeeds");
        }
        filed
    }
}
