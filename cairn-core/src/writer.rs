//! Backing-store writer contract.
//!
//! A [`CacheWriter`] is supplied by the integrator and persists what a
//! write-behind cache buffers. The cache guarantees at most one in-flight
//! `write_all` per cache instance. A writer shared across several caches
//! must tolerate concurrent calls from different caches.

use std::collections::HashMap;
use std::hash::Hash;

use async_trait::async_trait;

use crate::error::WriteResult;

/// Persists cache entries and deletions to a backing store.
///
/// Only [`write`](Self::write) and [`delete`](Self::delete) are required.
/// The batch forms default to sequential single calls and should be
/// overridden when the store supports real batching. The async variants
/// default to running the synchronous ones.
#[async_trait]
pub trait CacheWriter<K, V>: Send + Sync
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Persist one entry.
    fn write(&self, key: &K, value: &V) -> WriteResult<()>;

    /// Persist a batch. Entries carry no ordering guarantee.
    fn write_all(&self, entries: &HashMap<K, V>) -> WriteResult<()> {
        for (key, value) in entries {
            self.write(key, value)?;
        }
        Ok(())
    }

    /// Remove one entry from the backing store.
    fn delete(&self, key: &K) -> WriteResult<()>;

    /// Remove a batch of entries.
    fn delete_all(&self, keys: &[K]) -> WriteResult<()> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }

    async fn write_async(&self, key: &K, value: &V) -> WriteResult<()> {
        self.write(key, value)
    }

    async fn write_all_async(&self, entries: &HashMap<K, V>) -> WriteResult<()> {
        self.write_all(entries)
    }

    async fn delete_async(&self, key: &K) -> WriteResult<()> {
        self.delete(key)
    }

    async fn delete_all_async(&self, keys: &[K]) -> WriteResult<()> {
        self.delete_all(keys)
    }
}
