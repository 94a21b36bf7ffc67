//! Pending-write buffer.
//!
//! Holds at most one intent per key; a later intent overwrites an earlier
//! one. Per-key atomicity comes from `DashMap` itself. The flush lock in
//! the cache only serialises drain-and-writeback.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use cairn_core::RequeuePolicy;
use dashmap::{DashMap, DashSet};

/// A buffered persistence intent for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWrite<V> {
    /// Persist this value.
    Write(V),
    /// Remove the key from the backing store.
    Delete,
}

/// Intents drained for one flush pass.
#[derive(Debug)]
pub(crate) struct Drained<K, V> {
    pub(crate) batch: Vec<(K, PendingWrite<V>)>,
    epoch: u64,
}

pub(crate) struct PendingBuffer<K, V> {
    entries: DashMap<K, PendingWrite<V>>,
    /// Keys invalidated since the last flush pass. A failed batch must not
    /// bring them back.
    cancelled: DashSet<K>,
    /// Bumped by `purge_all`; a batch drained under an older epoch is not re-queued.
    epoch: AtomicU64,
    /// Depth as of the last mutation. Readable without key bounds.
    depth: AtomicUsize,
}

impl<K, V> PendingBuffer<K, V>
where
    K: Hash + Eq + Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
            cancelled: DashSet::new(),
            epoch: AtomicU64::new(0),
            depth: AtomicUsize::new(0),
        }
    }

    /// Buffer `intent`, replacing any earlier one for `key`. Returns the new depth.
    pub(crate) fn enqueue(&self, key: K, intent: PendingWrite<V>) -> usize {
        self.cancelled.remove(&key);
        self.entries.insert(key, intent);
        self.track_depth()
    }

    /// Remove up to `max` intents.
    pub(crate) fn drain(&self, max: usize) -> Drained<K, V> {
        let keys: Vec<K> = self
            .entries
            .iter()
            .take(max)
            .map(|entry| entry.key().clone())
            .collect();

        let batch = keys
            .into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .collect();
        self.track_depth();

        Drained {
            batch,
            epoch: self.epoch.load(Ordering::Acquire),
        }
    }

    /// Put back intents from a failed batch. Returns how many went back.
    pub(crate) fn requeue(
        &self,
        failed: impl IntoIterator<Item = (K, PendingWrite<V>)>,
        policy: RequeuePolicy,
        drained_epoch: u64,
    ) -> usize {
        if self.epoch.load(Ordering::Acquire) != drained_epoch {
            return 0;
        }

        let mut requeued = 0;
        for (key, intent) in failed {
            if self.cancelled.contains(&key) {
                continue;
            }
            match policy {
                RequeuePolicy::PreserveNewer => {
                    let mut inserted = false;
                    self.entries.entry(key).or_insert_with(|| {
                        inserted = true;
                        intent
                    });
                    if inserted {
                        requeued += 1;
                    }
                }
                RequeuePolicy::RestoreFailed => {
                    self.entries.insert(key, intent);
                    requeued += 1;
                }
            }
        }
        self.track_depth();
        requeued
    }

    /// Drop the intent for `key` and keep a failed batch from restoring it.
    pub(crate) fn purge(&self, key: &K) {
        self.cancelled.insert(key.clone());
        self.entries.remove(key);
        self.track_depth();
    }

    /// Drop every intent, including any currently in flight should it fail.
    pub(crate) fn purge_all(&self) -> usize {
        let purged = self.entries.len();
        self.entries.clear();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.track_depth();
        purged
    }

    /// Forget cancellations once a pass has finished with its batch.
    pub(crate) fn end_pass(&self) {
        self.cancelled.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn track_depth(&self) -> usize {
        let depth = self.entries.len();
        self.depth.store(depth, Ordering::Release);
        depth
    }
}

impl<K, V> PendingBuffer<K, V> {
    /// Depth recorded by the most recent mutation.
    pub(crate) fn last_depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }
}

impl<K, V> Drained<K, V> {
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> PendingBuffer<&'static str, u32> {
        PendingBuffer::new()
    }

    #[test]
    fn test_enqueue_coalesces_per_key() {
        let buf = buffer();
        buf.enqueue("a", PendingWrite::Write(1));
        let depth = buf.enqueue("a", PendingWrite::Write(2));
        assert_eq!(depth, 1);

        let drained = buf.drain(10);
        assert_eq!(drained.batch, vec![("a", PendingWrite::Write(2))]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_drain_respects_batch_size() {
        let buf = buffer();
        for (i, key) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
            buf.enqueue(key, PendingWrite::Write(i as u32));
        }

        let drained = buf.drain(2);
        assert_eq!(drained.batch.len(), 2);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_requeue_preserve_newer_keeps_fresh_value() {
        let buf = buffer();
        buf.enqueue("a", PendingWrite::Write(1));
        let drained = buf.drain(10);

        buf.enqueue("a", PendingWrite::Write(2));
        let requeued = buf.requeue(drained.batch, RequeuePolicy::PreserveNewer, drained.epoch);

        assert_eq!(requeued, 0);
        assert_eq!(buf.drain(10).batch, vec![("a", PendingWrite::Write(2))]);
    }

    #[test]
    fn test_requeue_restore_failed_overwrites_fresh_value() {
        let buf = buffer();
        buf.enqueue("a", PendingWrite::Write(1));
        let drained = buf.drain(10);

        buf.enqueue("a", PendingWrite::Write(2));
        let requeued = buf.requeue(drained.batch, RequeuePolicy::RestoreFailed, drained.epoch);

        assert_eq!(requeued, 1);
        assert_eq!(buf.drain(10).batch, vec![("a", PendingWrite::Write(1))]);
    }

    #[test]
    fn test_purged_key_not_requeued() {
        let buf = buffer();
        buf.enqueue("a", PendingWrite::Write(1));
        buf.enqueue("b", PendingWrite::Delete);
        let drained = buf.drain(10);

        buf.purge(&"a");
        let requeued = buf.requeue(drained.batch, RequeuePolicy::PreserveNewer, drained.epoch);

        assert_eq!(requeued, 1);
        assert_eq!(buf.drain(10).batch, vec![("b", PendingWrite::Delete)]);
    }

    #[test]
    fn test_enqueue_after_purge_clears_cancellation() {
        let buf = buffer();
        buf.purge(&"a");
        buf.enqueue("a", PendingWrite::Write(3));
        let drained = buf.drain(10);

        let requeued = buf.requeue(drained.batch, RequeuePolicy::PreserveNewer, drained.epoch);
        assert_eq!(requeued, 1);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_last_depth_follows_mutations() {
        let buf = buffer();
        buf.enqueue("a", PendingWrite::Write(1));
        buf.enqueue("b", PendingWrite::Write(2));
        assert_eq!(buf.last_depth(), 2);

        let drained = buf.drain(1);
        assert_eq!(buf.last_depth(), 1);

        buf.requeue(drained.batch, RequeuePolicy::PreserveNewer, drained.epoch);
        assert_eq!(buf.last_depth(), 2);

        buf.purge(&"a");
        assert_eq!(buf.last_depth(), 1);
        buf.purge_all();
        assert_eq!(buf.last_depth(), 0);
    }

    #[test]
    fn test_purge_all_blocks_requeue_of_in_flight_batch() {
        let buf = buffer();
        buf.enqueue("a", PendingWrite::Write(1));
        let drained = buf.drain(10);

        assert_eq!(buf.purge_all(), 0);
        let requeued = buf.requeue(drained.batch, RequeuePolicy::RestoreFailed, drained.epoch);

        assert_eq!(requeued, 0);
        assert!(buf.is_empty());
    }
}
