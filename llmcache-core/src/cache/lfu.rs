//! LFU (Least Frequently Used) eviction layer over the persistent store

use super::frequency::FrequencyIndex;
use crate::core::error::{CacheError, Result};
use crate::core::types::{CacheEntry, NewEntry, StoreStats};
use crate::store::PersistentStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Configuration for the LFU layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LfuConfig {
    /// Maximum number of actively tracked keys
    pub capacity: usize,
}

impl Default for LfuConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

impl LfuConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "lfu capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Store statistics plus frequency-index figures
#[derive(Debug, Clone, Serialize)]
pub struct LfuStats {
    #[serde(flatten)]
    pub store: StoreStats,
    pub tracked_entries: usize,
    pub min_frequency: u64,
    pub capacity: usize,
    pub frequency_distribution: BTreeMap<u64, usize>,
    pub lfu_evictions: u64,
}

/// Persistent store with a bounded LFU policy on top.
///
/// Evicting a key from the frequency index also deletes it from the store.
#[derive(Clone)]
pub struct LfuCache {
    store: PersistentStore,
    /// Single lock over the whole index; never held across an await
    index: Arc<Mutex<FrequencyIndex>>,
    evictions: Arc<AtomicU64>,
}

impl LfuCache {
    pub fn new(store: PersistentStore, config: LfuConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            index: Arc::new(Mutex::new(FrequencyIndex::new(config.capacity))),
            evictions: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    /// Get from the store; a hit counts as one access
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let entry = self.store.get(key).await?;
        if entry.is_some() {
            let evicted = self.index.lock().touch(key);
            self.evict_from_store(evicted).await;
        }
        Ok(entry)
    }

    /// Write through to the store; the write counts as one access
    pub async fn set(&self, entry: NewEntry) -> Result<()> {
        let key = entry.cache_key.clone();
        self.store.set(entry).await?;
        let evicted = self.index.lock().touch(&key);
        self.evict_from_store(evicted).await;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.index.lock().remove(key);
        self.store.delete(key).await
    }

    pub async fn clear(&self) -> Result<u64> {
        self.index.lock().clear();
        self.store.clear().await
    }

    pub async fn get_stats(&self) -> Result<LfuStats> {
        let store = self.store.get_stats().await?;
        let index = self.index.lock();
        Ok(LfuStats {
            store,
            tracked_entries: index.len(),
            min_frequency: index.min_frequency(),
            capacity: index.capacity(),
            frequency_distribution: index.distribution(),
            lfu_evictions: self.evictions.load(Ordering::Relaxed),
        })
    }

    pub fn frequency(&self, key: &str) -> Option<u64> {
        self.index.lock().frequency(key)
    }

    /// Tracked keys, next eviction victim first
    pub fn tracked_keys(&self) -> Vec<String> {
        self.index.lock().keys_by_eviction_order()
    }

    /// Drop the victim's row unless a concurrent write tracked it again.
    /// The caller's own operation already succeeded, so a failed delete is
    /// only logged.
    async fn evict_from_store(&self, evicted: Option<String>) {
        let Some(victim) = evicted else {
            return;
        };
        debug!("LFU EVICT: {}", victim);
        self.evictions.fetch_add(1, Ordering::Relaxed);

        if self.index.lock().contains(&victim) {
            debug!("LFU victim {} was re-tracked, keeping its row", victim);
            return;
        }
        if let Err(e) = self.store.delete(&victim).await {
            warn!("Failed to delete LFU victim {}: {}", victim, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StoreConfig;

    fn lfu(capacity: usize) -> LfuCache {
        let store = PersistentStore::in_memory().unwrap();
        LfuCache::new(store, LfuConfig { capacity }).unwrap()
    }

    async fn put(cache: &LfuCache, key: &str) {
        cache
            .set(NewEntry::with_key(key, "m", format!("value-{key}")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_lfu_evicts_least_frequent_from_store() {
        let cache = lfu(3);
        put(&cache, "k1").await;
        put(&cache, "k2").await;
        put(&cache, "k3").await;

        for _ in 0..3 {
            assert!(cache.get("k1").await.unwrap().is_some());
            assert!(cache.get("k2").await.unwrap().is_some());
        }
        assert!(cache.get("k3").await.unwrap().is_some());

        put(&cache, "k4").await;

        assert!(cache.get("k3").await.unwrap().is_none());
        assert!(!cache.store().exists("k3").await.unwrap());
        for key in ["k1", "k2", "k4"] {
            assert!(cache.get(key).await.unwrap().is_some(), "{key} should remain");
        }
    }

    #[tokio::test]
    async fn test_set_existing_key_increments() {
        let cache = lfu(2);
        put(&cache, "a").await;
        put(&cache, "a").await;
        assert_eq!(cache.frequency("a"), Some(2));
    }

    #[tokio::test]
    async fn test_get_miss_not_tracked() {
        let cache = lfu(2);
        assert!(cache.get("missing").await.unwrap().is_none());
        assert_eq!(cache.frequency("missing"), None);
    }

    #[tokio::test]
    async fn test_get_of_untracked_store_entry_starts_tracking() {
        let cache = lfu(1);
        cache
            .store()
            .set(NewEntry::with_key("direct", "m", "v"))
            .await
            .unwrap();
        put(&cache, "tracked").await;

        // Reading "direct" through the layer evicts "tracked"
        assert!(cache.get("direct").await.unwrap().is_some());
        assert_eq!(cache.frequency("direct"), Some(1));
        assert!(!cache.store().exists("tracked").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let cache = lfu(3);
        put(&cache, "a").await;
        put(&cache, "b").await;

        assert!(cache.delete("a").await.unwrap());
        assert_eq!(cache.frequency("a"), None);

        cache.clear().await.unwrap();
        let stats = cache.get_stats().await.unwrap();
        assert_eq!(stats.tracked_entries, 0);
        assert_eq!(stats.store.total_entries, 0);
        assert!(cache.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_include_distribution() {
        let cache = lfu(3);
        put(&cache, "a").await;
        put(&cache, "b").await;
        cache.get("a").await.unwrap();

        let stats = cache.get_stats().await.unwrap();
        assert_eq!(stats.capacity, 3);
        assert_eq!(stats.tracked_entries, 2);
        assert_eq!(stats.min_frequency, 1);
        assert_eq!(stats.frequency_distribution.get(&1), Some(&1));
        assert_eq!(stats.frequency_distribution.get(&2), Some(&1));
        assert_eq!(stats.lfu_evictions, 0);
    }

    #[tokio::test]
    async fn test_failed_victim_delete_keeps_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lfu.db");
        let store = PersistentStore::open(StoreConfig::at_path(&path)).unwrap();
        let cache = LfuCache::new(store, LfuConfig { capacity: 1 }).unwrap();
        put(&cache, "old").await;

        let raw = rusqlite::Connection::open(&path).unwrap();
        raw.execute_batch(
            "CREATE TRIGGER block_delete BEFORE DELETE ON llm_cache
             BEGIN SELECT RAISE(ABORT, 'delete blocked'); END;",
        )
        .unwrap();

        put(&cache, "new").await;
        assert_eq!(cache.tracked_keys(), vec!["new"]);
        assert!(cache.store().exists("new").await.unwrap());
        assert!(cache.store().exists("old").await.unwrap());
        assert_eq!(cache.get_stats().await.unwrap().lfu_evictions, 1);
    }

    #[tokio::test]
    async fn test_retracked_victim_row_survives() {
        let cache = lfu(2);
        put(&cache, "k").await;

        cache.evict_from_store(Some("k".to_string())).await;
        assert!(cache.store().exists("k").await.unwrap());
        assert_eq!(cache.frequency("k"), Some(1));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let store = PersistentStore::in_memory().unwrap();
        assert!(LfuCache::new(store, LfuConfig { capacity: 0 }).is_err());
    }
}
