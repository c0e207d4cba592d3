//! Per-region transaction matcher
//!
//! Reconstructs committed rows by pairing prewrite events with later
//! commit or rollback events. Events may arrive out of order before the
//! region stream is initialized (has caught up past the snapshot point),
//! so commits and rollbacks seen early are cached and resolved at the
//! init boundary. Pipelined DMLs send several prewrites for the same
//! `(start_ts, key)` distinguished by generation; the highest generation
//! wins regardless of arrival order.

use crate::event::RowEvent;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::info;

/// Idle age after which an empty pending-value map is dropped
const UNMATCHED_VALUE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MatchKey {
    start_ts: u64,
    key: Bytes,
}

impl MatchKey {
    fn of(row: &RowEvent) -> Self {
        Self {
            start_ts: row.start_ts,
            key: row.key.clone(),
        }
    }
}

/// Pairs prewrites with commits and rollbacks for one region stream
pub struct Matcher {
    /// Prewrites whose commit or rollback has not arrived yet. Dropped
    /// to `None` by [`Matcher::try_clean_unmatched_value`] when idle and
    /// lazily reallocated on the next prewrite.
    unmatched_value: Option<HashMap<MatchKey, RowEvent>>,
    /// Commits received before the region stream initialized
    cached_commit: Vec<RowEvent>,
    /// Rollbacks received before the region stream initialized
    cached_rollback: Vec<RowEvent>,
    /// When the latest prewrite was accepted
    last_prewrite_time: Instant,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher {
    pub fn new() -> Self {
        Self {
            unmatched_value: Some(HashMap::new()),
            cached_commit: Vec::new(),
            cached_rollback: Vec::new(),
            last_prewrite_time: Instant::now(),
        }
    }

    /// Record a prewrite. The most recent prewrite wins per
    /// `(start_ts, key)`, except that a higher generation is never
    /// displaced and a fake prewrite (empty value, generation 0) never
    /// displaces a real one.
    pub fn put_prewrite_row(&mut self, row: RowEvent) {
        let key = MatchKey::of(&row);
        let pending = self.unmatched_value.get_or_insert_with(HashMap::new);
        if let Some(existing) = pending.get(&key) {
            if existing.generation > row.generation {
                return;
            }
            // a transaction heartbeat may emit a prewrite without the
            // value after the real one; keep the value we have
            if row.has_empty_value() && row.generation == 0 && !existing.has_empty_value() {
                return;
            }
        }
        pending.insert(key, row);
        self.last_prewrite_time = Instant::now();
    }

    /// Try to complete a commit row from its pending prewrite. On a hit
    /// the prewrite's value and old value are copied into `commit_row`
    /// and the entry is removed; on a miss `commit_row` is untouched.
    ///
    /// Before initialization only classic (generation 0) prewrites with
    /// a real value may match: a pipelined prewrite may still be
    /// superseded by a higher generation, and a fake prewrite carries no
    /// value to hand out.
    pub fn match_row(&mut self, commit_row: &mut RowEvent, initialized: bool) -> bool {
        let key = MatchKey::of(commit_row);
        let Some(pending) = self.unmatched_value.as_mut() else {
            return false;
        };
        if let Some(value) = pending.get(&key) {
            if initialized || (!value.has_empty_value() && value.generation == 0) {
                commit_row.value = value.value.clone();
                commit_row.old_value = value.old_value.clone();
                pending.remove(&key);
                return true;
            }
        }
        false
    }

    /// Buffer a commit seen before the region stream initialized
    pub fn cache_commit_row(&mut self, row: RowEvent) {
        self.cached_commit.push(row);
    }

    /// Buffer a rollback seen before the region stream initialized
    pub fn cache_rollback_row(&mut self, row: RowEvent) {
        self.cached_rollback.push(row);
    }

    /// Resolve the cached commits against pending prewrites and return
    /// the completed rows. The cache is drained whether or not entries
    /// match; a cached commit without a prewrite belongs to a
    /// transaction resolved before the snapshot point and is dropped.
    pub fn match_cached_row(&mut self, initialized: bool) -> Vec<RowEvent> {
        if !initialized {
            return Vec::new();
        }
        let cached = std::mem::take(&mut self.cached_commit);
        cached
            .into_iter()
            .filter_map(|mut row| {
                if self.match_row(&mut row, initialized) {
                    Some(row)
                } else {
                    info!(
                        start_ts = row.start_ts,
                        commit_ts = row.commit_ts,
                        "ignore commit event without matching prewrite"
                    );
                    None
                }
            })
            .collect()
    }

    /// Apply the cached rollbacks, purging any prewrites they cancel.
    /// The cache is drained.
    pub fn match_cached_rollback_row(&mut self, initialized: bool) {
        if !initialized {
            return;
        }
        let cached = std::mem::take(&mut self.cached_rollback);
        for row in cached {
            self.rollback_row(&row);
        }
    }

    /// Cancel the pending prewrite for this `(start_ts, key)`, if any
    pub fn rollback_row(&mut self, row: &RowEvent) {
        if let Some(pending) = self.unmatched_value.as_mut() {
            pending.remove(&MatchKey::of(row));
        }
    }

    /// Drop the pending-value map once it has been empty for
    /// [`UNMATCHED_VALUE_TTL`]; it is reallocated by the next prewrite.
    /// A dropped map stays dropped until then.
    pub fn try_clean_unmatched_value(&mut self) {
        let Some(pending) = self.unmatched_value.as_ref() else {
            return;
        };
        if pending.is_empty() && self.last_prewrite_time.elapsed() >= UNMATCHED_VALUE_TTL {
            self.unmatched_value = None;
        }
    }

    /// Number of pending prewrites
    pub fn unmatched_len(&self) -> usize {
        self.unmatched_value.as_ref().map_or(0, |m| m.len())
    }
}
