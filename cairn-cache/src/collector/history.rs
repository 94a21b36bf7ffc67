//! Bounded per-cache snapshot history.

use std::collections::VecDeque;

use cairn_core::{CacheStats, StatsSnapshot};

/// FIFO of snapshots holding at most `capacity` entries; the oldest is
/// dropped to make room.
#[derive(Debug, Clone)]
pub struct StatsHistory {
    capacity: usize,
    snapshots: VecDeque<StatsSnapshot>,
}

impl StatsHistory {
    /// `capacity` is clamped to at least one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            snapshots: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, snapshot: StatsSnapshot) {
        while self.snapshots.len() >= self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn latest(&self) -> Option<&StatsSnapshot> {
        self.snapshots.back()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &StatsSnapshot> {
        self.snapshots.iter()
    }

    /// Oldest first.
    pub fn to_vec(&self) -> Vec<StatsSnapshot> {
        self.snapshots.iter().cloned().collect()
    }

    /// Activity between the two most recent snapshots.
    pub fn latest_delta(&self) -> Option<CacheStats> {
        let mut recent = self.snapshots.iter().rev();
        let newest = recent.next()?;
        let previous = recent.next()?;
        Some(newest.delta(previous))
    }
}
