use super::types::{MODEL_TAG_PREFIX, PromptCacheConfig, PromptCacheEntry, PromptCategory};
use crate::core::error::Result;
use crate::core::key::hash_parts;
use crate::core::types::{Expiry, NewEntry, expiry_after};
use crate::store::PersistentStore;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Key of `content` within `category`
pub fn prompt_key(category: PromptCategory, content: &str) -> String {
    hash_parts(&[category.as_str(), content])
}

struct MemoryEntry {
    category: PromptCategory,
    value: Vec<u8>,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    hits: AtomicU64,
}

impl MemoryEntry {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct PromptCounters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    memory_evictions: AtomicU64,
}

/// Prompt cache statistics (memory tier plus lookup counters)
#[derive(Debug, Clone, Serialize)]
pub struct PromptCacheStats {
    pub entries: usize,
    pub entries_by_category: BTreeMap<PromptCategory, usize>,
    pub hits: u64,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    /// Entries dropped to keep the memory tier within `max_memory_entries`
    pub memory_evictions: u64,
}

/// Two-tier typed cache: in-process map first, persistent store second.
///
/// Disk hits are backfilled into memory. Values are stored as JSON.
///
/// The memory tier holds at most `max_memory_entries`; when full, expired
/// entries go first, then the least-hit one. A memory entry can outlive its
/// disk row when the store evicts for size, until it expires or is pushed
/// out.
#[derive(Clone)]
pub struct PromptCache {
    store: PersistentStore,
    config: Arc<PromptCacheConfig>,
    memory: Arc<RwLock<HashMap<String, MemoryEntry>>>,
    counters: Arc<PromptCounters>,
}

impl PromptCache {
    pub fn new(store: PersistentStore, config: PromptCacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config: Arc::new(config),
            memory: Arc::new(RwLock::new(HashMap::new())),
            counters: Arc::new(PromptCounters::default()),
        })
    }

    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    pub fn config(&self) -> &PromptCacheConfig {
        &self.config
    }

    /// Look up `content` in `category`.
    ///
    /// A payload that does not deserialize as `T` is a miss.
    pub async fn get<T: DeserializeOwned>(
        &self,
        category: PromptCategory,
        content: &str,
    ) -> Result<Option<T>> {
        let key = prompt_key(category, content);
        let now = Utc::now();

        let mut expired = false;
        let cached = {
            let memory = self.memory.read();
            match memory.get(&key) {
                Some(entry) if entry.is_expired_at(now) => {
                    expired = true;
                    None
                }
                Some(entry) => {
                    entry.hits.fetch_add(1, Ordering::Relaxed);
                    Some(serde_json::from_slice::<T>(&entry.value))
                }
                None => None,
            }
        };

        if expired {
            let mut memory = self.memory.write();
            if memory.get(&key).is_some_and(|entry| entry.is_expired_at(now)) {
                memory.remove(&key);
            }
        }

        match cached {
            Some(Ok(value)) => {
                debug!("PROMPT CACHE memory hit: {}", category);
                self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(value));
            }
            Some(Err(e)) => {
                warn!("Undecodable {} value in memory tier, treating as miss: {}", category, e);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            None => {}
        }

        let Some(entry) = self.store.get(&key).await? else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        match serde_json::from_slice::<T>(&entry.response) {
            Ok(value) => {
                debug!("PROMPT CACHE disk hit: {}", category);
                self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                self.remember(
                    key,
                    MemoryEntry {
                        category,
                        value: entry.response,
                        created_at: entry.created_at,
                        expires_at: entry.expires_at,
                        hits: AtomicU64::new(1),
                    },
                );
                Ok(Some(value))
            }
            Err(e) => {
                warn!("Undecodable {} value on disk, treating as miss: {}", category, e);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Serialize `value` and write it to both tiers with the category's TTL
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        category: PromptCategory,
        content: &str,
        value: &T,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.insert_raw(category, content, bytes, None).await
    }

    /// Write an already serialized value. `ttl` overrides the category TTL;
    /// `None` or a zero duration uses it.
    pub async fn insert_raw(
        &self,
        category: PromptCategory,
        content: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let key = prompt_key(category, content);
        let now = Utc::now();
        let ttl = ttl
            .filter(|ttl| !ttl.is_zero())
            .or_else(|| self.config.ttls.ttl(category));
        let expires_at = ttl.map(|ttl| expiry_after(now, ttl)).transpose()?;

        let debug_prefix: String = content.chars().take(self.config.debug_prefix_len).collect();
        let entry = NewEntry::with_key(key.clone(), category.model_tag(), value.clone())
            .prompt_hash(debug_prefix)
            .expiry(expires_at.map_or(Expiry::Never, Expiry::At));
        self.store.set(entry).await?;

        debug!("PROMPT CACHE set: {} (expires_at={:?})", category, expires_at);
        self.remember(
            key,
            MemoryEntry {
                category,
                value,
                created_at: now,
                expires_at,
                hits: AtomicU64::new(0),
            },
        );
        Ok(())
    }

    /// Insert into the memory tier, making room first if it is full
    fn remember(&self, key: String, entry: MemoryEntry) {
        let limit = self.config.max_memory_entries;
        let mut memory = self.memory.write();
        if !memory.contains_key(&key) && memory.len() >= limit {
            let now = Utc::now();
            memory.retain(|_, entry| !entry.is_expired_at(now));

            if memory.len() >= limit {
                let victim = memory
                    .iter()
                    .min_by_key(|(_, entry)| (entry.hits.load(Ordering::Relaxed), entry.created_at))
                    .map(|(key, _)| key.clone());
                if let Some(victim) = victim {
                    debug!(
                        "Prompt cache memory tier full, dropping {}",
                        victim.get(..12).unwrap_or(&victim)
                    );
                    memory.remove(&victim);
                    self.counters.memory_evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        memory.insert(key, entry);
    }

    /// Remove from both tiers. Returns whether either tier held the entry.
    pub async fn delete(&self, category: PromptCategory, content: &str) -> Result<bool> {
        let key = prompt_key(category, content);
        let in_memory = self.memory.write().remove(&key).is_some();
        let on_disk = self.store.delete(&key).await?;
        Ok(in_memory || on_disk)
    }

    /// Empty the memory tier and delete every disk row the prompt cache owns.
    /// Returns the number of disk rows removed.
    pub async fn clear(&self) -> Result<u64> {
        self.memory.write().clear();
        let removed = self.store.delete_by_model_prefix(MODEL_TAG_PREFIX).await?;
        info!("Cleared prompt cache ({} disk entries)", removed);
        Ok(removed)
    }

    /// Drop expired entries from the memory tier; disk rows are left to the
    /// store's own sweep. Returns the number of entries removed.
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        let mut memory = self.memory.write();
        let before = memory.len();
        memory.retain(|_, entry| !entry.is_expired_at(now));
        let removed = before - memory.len();
        if removed > 0 {
            debug!("Prompt cache cleanup removed {} expired entries", removed);
        }
        removed
    }

    /// Snapshot of the memory-tier entry for `content`, without counting a hit
    pub fn peek(&self, category: PromptCategory, content: &str) -> Option<PromptCacheEntry> {
        let key = prompt_key(category, content);
        let memory = self.memory.read();
        memory.get(&key).map(|entry| PromptCacheEntry {
            key: key.clone(),
            category: entry.category,
            value: entry.value.clone(),
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            hit_count: entry.hits.load(Ordering::Relaxed),
        })
    }

    pub fn stats(&self) -> PromptCacheStats {
        let mut entries_by_category: BTreeMap<PromptCategory, usize> = BTreeMap::new();
        let entries = {
            let memory = self.memory.read();
            for entry in memory.values() {
                *entries_by_category.entry(entry.category).or_default() += 1;
            }
            memory.len()
        };

        let memory_hits = self.counters.memory_hits.load(Ordering::Relaxed);
        let disk_hits = self.counters.disk_hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let hits = memory_hits + disk_hits;
        let total = hits + misses;

        PromptCacheStats {
            entries,
            entries_by_category,
            hits,
            memory_hits,
            disk_hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            memory_evictions: self.counters.memory_evictions.load(Ordering::Relaxed),
        }
    }

    /// Spawn the periodic memory-tier sweep (`cleanup_interval_secs`)
    pub fn start_cleanup(&self) -> CleanupHandle {
        let cache = self.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = self.config.cleanup_interval();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        cache.cleanup();
                    }
                }
            }
            debug!("Prompt cache cleanup task stopped");
        });

        info!("Started prompt cache cleanup (every {:?})", period);
        CleanupHandle { cancel, task: Some(task) }
    }
}

/// Owns the prompt cache's periodic cleanup task
pub struct CleanupHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CleanupHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Prompt cache cleanup task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
