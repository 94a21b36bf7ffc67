//! Named cache registry with lifecycle management.
//!
//! [`CacheService`] owns a set of caches by name, registers each with a
//! shared [`CacheStatsCollector`], and shuts them all down together.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use cairn_core::{CacheConfig, CacheError, CacheResult, ConfigError, StateError, StatsSource};

use crate::collector::CacheStatsCollector;
use crate::local::LocalCache;
use crate::write_behind::WriteBehindCache;

/// Lifecycle operations the service needs from every cache it owns.
#[async_trait]
pub trait ManagedCache: Send + Sync {
    fn name(&self) -> &str;

    fn invalidate_all(&self);

    /// Release background resources, persisting what the cache buffers.
    async fn shutdown(&self) -> CacheResult<()>;
}

#[async_trait]
impl<K, V> ManagedCache for LocalCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        LocalCache::name(self)
    }

    fn invalidate_all(&self) {
        LocalCache::invalidate_all(self);
    }

    async fn shutdown(&self) -> CacheResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<K, V> ManagedCache for WriteBehindCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        WriteBehindCache::name(self)
    }

    fn invalidate_all(&self) {
        WriteBehindCache::invalidate_all(self);
    }

    async fn shutdown(&self) -> CacheResult<()> {
        WriteBehindCache::shutdown(self).await
    }
}

struct Entry {
    typed: Arc<dyn Any + Send + Sync>,
    managed: Arc<dyn ManagedCache>,
}

/// Registry of named caches.
///
/// # Example
///
/// ```ignore
/// let service = CacheService::new(CacheStatsCollector::new(StatsCollectorConfig::default())?);
/// let sessions = service.create_local::<String, Session>(session_config)?;
///
/// let same = service.local_cache::<String, Session>("sessions");
/// assert!(same.is_some());
///
/// service.shutdown().await?;
/// ```
pub struct CacheService {
    caches: RwLock<HashMap<String, Entry>>,
    collector: Arc<CacheStatsCollector>,
    shut_down: AtomicBool,
}

impl CacheService {
    pub fn new(collector: CacheStatsCollector) -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            collector: Arc::new(collector),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn collector(&self) -> &Arc<CacheStatsCollector> {
        &self.collector
    }

    /// Build a [`LocalCache`] from `config` and register it.
    pub fn create_local<K, V>(&self, config: CacheConfig) -> CacheResult<Arc<LocalCache<K, V>>>
    where
        K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        self.register_local(LocalCache::new(config)?)
    }

    pub fn register_local<K, V>(
        &self,
        cache: LocalCache<K, V>,
    ) -> CacheResult<Arc<LocalCache<K, V>>>
    where
        K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let cache = Arc::new(cache);
        self.insert(cache.clone(), cache.clone(), cache.clone())?;
        Ok(cache)
    }

    pub fn register_write_behind<K, V>(
        &self,
        cache: WriteBehindCache<K, V>,
    ) -> CacheResult<Arc<WriteBehindCache<K, V>>>
    where
        K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let cache = Arc::new(cache);
        self.insert(cache.clone(), cache.clone(), cache.clone())?;
        Ok(cache)
    }

    /// The local cache named `name`, if one exists with these key and value types.
    pub fn local_cache<K, V>(&self, name: &str) -> Option<Arc<LocalCache<K, V>>>
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        self.typed(name)
    }

    /// The write-behind cache named `name`, if one exists with these key and
    /// value types.
    pub fn write_behind_cache<K, V>(&self, name: &str) -> Option<Arc<WriteBehindCache<K, V>>>
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        self.typed(name)
    }

    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Invalidate every cache. Buffered writes are discarded too.
    pub fn invalidate_all(&self) {
        let managed: Vec<Arc<dyn ManagedCache>> =
            self.read().values().map(|e| Arc::clone(&e.managed)).collect();
        for cache in managed {
            cache.invalidate_all();
        }
    }

    /// Shut down and forget the cache named `name`. Returns `Ok(false)` when
    /// there was no such cache.
    pub async fn remove(&self, name: &str) -> CacheResult<bool> {
        let entry = self.write().remove(name);
        let Some(entry) = entry else {
            return Ok(false);
        };

        self.collector.unregister(name);
        entry.managed.shutdown().await?;
        tracing::info!(cache = %name, "Removed cache");
        Ok(true)
    }

    /// Shut down every cache, then the collector. Runs once; later calls
    /// return `Ok(())`.
    ///
    /// Every cache gets a shutdown attempt even if an earlier one fails. The
    /// first error is returned.
    pub async fn shutdown(&self) -> CacheResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let entries: Vec<(String, Entry)> = self.write().drain().collect();
        tracing::info!(caches = entries.len(), "Cache service shutting down");

        let mut first_error: Option<CacheError> = None;
        for (name, entry) in entries {
            self.collector.unregister(&name);
            if let Err(e) = entry.managed.shutdown().await {
                tracing::error!(cache = %name, error = %e, "Cache shutdown failed");
                first_error.get_or_insert(e);
            }
        }

        self.collector.shutdown().await;
        tracing::info!("Cache service shut down");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn insert(
        &self,
        typed: Arc<dyn Any + Send + Sync>,
        managed: Arc<dyn ManagedCache>,
        stats: Arc<dyn StatsSource>,
    ) -> CacheResult<()> {
        let name = managed.name().to_string();
        if self.shut_down.load(Ordering::Acquire) {
            return Err(StateError::ShutDown { cache: name }.into());
        }

        {
            let mut caches = self.write();
            if caches.contains_key(&name) {
                return Err(ConfigError::DuplicateCache { name }.into());
            }
            caches.insert(name.clone(), Entry { typed, managed });
        }

        self.collector.register(name.clone(), stats);
        tracing::info!(cache = %name, "Registered cache");
        Ok(())
    }

    fn typed<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        let typed = self.read().get(name).map(|e| Arc::clone(&e.typed))?;
        typed.downcast::<T>().ok()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.caches.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.caches.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CacheService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheService")
            .field("caches", &self.cache_names())
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
