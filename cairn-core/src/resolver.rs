//! Conflict resolution strategies for concurrent writes.
//!
//! A [`ConflictResolver`] is consulted on every write to a cache that has
//! one configured. It sees the currently stored value (if any) and the
//! incoming one, and decides what ends up stored. The cache runs it inside
//! an atomic per-key compute, so two resolutions on the same key never
//! interleave.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::ConflictError;

type TimestampFn<V> = Arc<dyn Fn(&V) -> DateTime<Utc> + Send + Sync>;
type VersionFn<V> = Arc<dyn Fn(&V) -> u64 + Send + Sync>;
type MergeFn<V> = Arc<dyn Fn(&V, V) -> V + Send + Sync>;

/// Strategy for merging an incoming write with the stored value.
pub enum ConflictResolver<V> {
    /// The incoming value always replaces the stored one.
    LastWriteWins,
    /// The stored value is kept; the incoming value only lands on an empty key.
    FirstWriteWins,
    /// Writing over a stored value is an error.
    ThrowOnConflict,
    /// The value with the later embedded timestamp is kept. Ties keep the incoming value.
    ByTimestamp(TimestampFn<V>),
    /// The value with the higher embedded version is kept. Ties keep the incoming value.
    ByVersion(VersionFn<V>),
    /// A caller-supplied merge of `(stored, incoming)`, used when a value is stored.
    Merge(MergeFn<V>),
}

/// Outcome of [`ConflictResolver::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<V> {
    /// Leave the stored value untouched.
    KeepExisting,
    /// Store this value.
    Store(V),
}

impl<V> Resolution<V> {
    fn newer_wins(incoming_is_newer: bool, incoming: V) -> Self {
        if incoming_is_newer {
            Resolution::Store(incoming)
        } else {
            Resolution::KeepExisting
        }
    }

    pub fn keeps_existing(&self) -> bool {
        matches!(self, Resolution::KeepExisting)
    }
}

impl<V> ConflictResolver<V> {
    pub fn by_timestamp<F>(extract: F) -> Self
    where
        F: Fn(&V) -> DateTime<Utc> + Send + Sync + 'static,
    {
        ConflictResolver::ByTimestamp(Arc::new(extract))
    }

    pub fn by_version<F>(extract: F) -> Self
    where
        F: Fn(&V) -> u64 + Send + Sync + 'static,
    {
        ConflictResolver::ByVersion(Arc::new(extract))
    }

    pub fn merge<F>(merge: F) -> Self
    where
        F: Fn(&V, V) -> V + Send + Sync + 'static,
    {
        ConflictResolver::Merge(Arc::new(merge))
    }

    /// Decide what a write against `existing` should do.
    ///
    /// An empty key always stores the incoming value. Only
    /// [`ThrowOnConflict`](Self::ThrowOnConflict) can fail. A merge always
    /// stores its result, even when it equals the stored value.
    pub fn decide(
        &self,
        existing: Option<&V>,
        incoming: V,
    ) -> Result<Resolution<V>, ConflictError> {
        let Some(existing) = existing else {
            return Ok(Resolution::Store(incoming));
        };

        match self {
            ConflictResolver::LastWriteWins => Ok(Resolution::Store(incoming)),
            ConflictResolver::FirstWriteWins => Ok(Resolution::KeepExisting),
            ConflictResolver::ThrowOnConflict => Err(ConflictError::ExistingValue),
            ConflictResolver::ByTimestamp(timestamp) => {
                Ok(Resolution::newer_wins(timestamp(&incoming) >= timestamp(existing), incoming))
            }
            ConflictResolver::ByVersion(version) => {
                Ok(Resolution::newer_wins(version(&incoming) >= version(existing), incoming))
            }
            ConflictResolver::Merge(merge) => Ok(Resolution::Store(merge(existing, incoming))),
        }
    }

    /// The value a write against `existing` leaves stored.
    pub fn resolve(&self, existing: Option<&V>, incoming: V) -> Result<V, ConflictError>
    where
        V: Clone,
    {
        let Some(current) = existing else {
            return Ok(incoming);
        };
        match self.decide(Some(current), incoming)? {
            Resolution::Store(value) => Ok(value),
            Resolution::KeepExisting => Ok(current.clone()),
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ConflictResolver::LastWriteWins => "last-write-wins",
            ConflictResolver::FirstWriteWins => "first-write-wins",
            ConflictResolver::ThrowOnConflict => "throw-on-conflict",
            ConflictResolver::ByTimestamp(_) => "by-timestamp",
            ConflictResolver::ByVersion(_) => "by-version",
            ConflictResolver::Merge(_) => "merge",
        }
    }
}

impl<V> Clone for ConflictResolver<V> {
    fn clone(&self) -> Self {
        match self {
            ConflictResolver::LastWriteWins => ConflictResolver::LastWriteWins,
            ConflictResolver::FirstWriteWins => ConflictResolver::FirstWriteWins,
            ConflictResolver::ThrowOnConflict => ConflictResolver::ThrowOnConflict,
            ConflictResolver::ByTimestamp(f) => ConflictResolver::ByTimestamp(Arc::clone(f)),
            ConflictResolver::ByVersion(f) => ConflictResolver::ByVersion(Arc::clone(f)),
            ConflictResolver::Merge(f) => ConflictResolver::Merge(Arc::clone(f)),
        }
    }
}

impl<V> fmt::Debug for ConflictResolver<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConflictResolver").field(&self.kind()).finish()
    }
}
