//! Persistent Store
//!
//! Durable response store on a single-file SQLite database:
//! - TTL expiry resolved at write time, enforced on every read
//! - Optional payload compression (kept only when strictly smaller)
//! - Background sweep of expired rows and approximate-LRU batch eviction
//!   when the total payload size exceeds the configured bound

pub mod maintenance;
pub mod schema;

pub use maintenance::MaintenanceHandle;

use crate::compression::{CompressionCodec, Compressor};
use crate::core::error::{CacheError, Result};
use crate::core::key::generate_cache_key;
use crate::core::types::{
    CacheEntry, HitCountPolicy, NewEntry, RequestCounters, StoreConfig, StoreStats,
};
use crate::health::{HealthReport, HealthThresholds, classify_health};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Hits buffered under `HitCountPolicy::Deferred`
#[derive(Debug, Clone, Copy)]
struct PendingHit {
    count: i64,
    last_accessed_at: DateTime<Utc>,
}

/// Row as read from disk, payload possibly still compressed
struct StoredRow {
    entry: CacheEntry,
    codec: Option<String>,
}

/// Disk-backed response cache
#[derive(Clone)]
pub struct PersistentStore {
    conn: Arc<Mutex<Connection>>,
    config: Arc<StoreConfig>,
    compressor: Arc<Compressor>,
    /// Request counters; separate from the connection lock so stats
    /// collection never waits on the data path
    counters: Arc<RwLock<RequestCounters>>,
    pending_hits: Arc<Mutex<HashMap<String, PendingHit>>>,
    /// Size-check queue, present while maintenance is running
    size_check: Arc<Mutex<Option<mpsc::Sender<()>>>>,
}

impl PersistentStore {
    /// Open (or create) the store described by `config`
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        let conn = match &config.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(path)
            }
            None => Connection::open_in_memory(),
        }
        .map_err(|e| CacheError::database("open", e))?;

        schema::apply(&conn, config.path.is_some())
            .map_err(|e| CacheError::database("schema", e))?;

        info!(
            "Opened LLM cache store at {} (ttl={:?}, max_size={:?} bytes, compression={})",
            config
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string()),
            config.default_ttl(),
            config.max_size_bytes,
            if config.compression.enabled {
                config.compression.codec.as_str()
            } else {
                "off"
            }
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            compressor: Arc::new(Compressor::new(config.compression.clone())),
            config: Arc::new(config),
            counters: Arc::new(RwLock::new(RequestCounters::default())),
            pending_hits: Arc::new(Mutex::new(HashMap::new())),
            size_check: Arc::new(Mutex::new(None)),
        })
    }

    /// Open a private in-memory store
    pub fn in_memory() -> Result<Self> {
        Self::open(StoreConfig::default())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await?
    }

    /// Get a live entry by key.
    ///
    /// Expired rows are never returned, even before the sweep removes them.
    /// A hit bumps `hit_count` and `last_accessed_at` according to the
    /// configured `HitCountPolicy`.
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        debug!("GET key={}", short_key(key));

        let now = Utc::now();
        let policy = self.config.hit_count_policy;
        let lookup_key = key.to_string();
        let pending_hits = Arc::clone(&self.pending_hits);

        let row = self
            .with_conn(move |conn| {
                let row = conn
                    .prepare_cached(schema::SELECT_LIVE_BY_KEY)
                    .and_then(|mut stmt| {
                        stmt.query_row(params![lookup_key, now], row_to_stored)
                            .optional()
                    })
                    .map_err(|e| CacheError::database("get", e))?;

                let Some(mut row) = row else {
                    return Ok(None);
                };

                match policy {
                    HitCountPolicy::Synchronous => {
                        conn.execute(
                            "UPDATE llm_cache SET hit_count = hit_count + 1, last_accessed_at = ?2 WHERE id = ?1",
                            params![row.entry.id, now],
                        )
                        .map_err(|e| CacheError::database("get", e))?;
                        row.entry.hit_count += 1;
                    }
                    // Buffered under the connection lock, so a flush is
                    // never observed half-applied
                    HitCountPolicy::Deferred => {
                        row.entry.hit_count +=
                            record_deferred_hit(&pending_hits, &row.entry.cache_key, now);
                    }
                }
                row.entry.last_accessed_at = now;

                Ok(Some(row))
            })
            .await?;

        let Some(row) = row else {
            self.counters.write().record_miss();
            return Ok(None);
        };

        let entry = match self.decode(row) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Corrupt payload for key {}, treating as miss: {}", short_key(key), e);
                self.counters.write().record_miss();
                return Ok(None);
            }
        };

        self.counters.write().record_hit();
        Ok(Some(entry))
    }

    /// Get the entry for a `(model, prompt)` pair
    pub async fn get_by_prompt(&self, model: &str, prompt: &str) -> Result<Option<CacheEntry>> {
        self.get(&generate_cache_key(model, prompt)).await
    }

    /// Check whether a live entry exists, without counting a hit
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let now = Utc::now();
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT 1 FROM llm_cache WHERE cache_key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, now],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(|e| CacheError::database("exists", e))
        })
        .await
    }

    /// Insert or update an entry.
    ///
    /// On conflict the payload, token/cost figures, metadata and expiry are
    /// replaced; `created_at` and `hit_count` are preserved.
    pub async fn set(&self, entry: NewEntry) -> Result<()> {
        let now = Utc::now();
        let NewEntry {
            cache_key,
            model,
            prompt_hash,
            prompt,
            response,
            tokens_used,
            cost_usd,
            metadata,
            expiry,
        } = entry;

        let expires_at = expiry.resolve(now, self.config.default_ttl())?;
        let original_size = response.len();
        let (payload, codec) = match self.compressor.maybe_compress(&response)? {
            Some(compressed) => (compressed, Some(self.compressor.codec().as_str())),
            None => (response, None),
        };

        debug!(
            "SET key={}, size={} → {} bytes, expires_at={:?}",
            short_key(&cache_key),
            original_size,
            payload.len(),
            expires_at
        );

        let compressed = codec.is_some();
        self.with_conn(move |conn| {
            conn.prepare_cached(schema::UPSERT)
                .and_then(|mut stmt| {
                    stmt.execute(params![
                        cache_key,
                        model,
                        prompt_hash,
                        prompt,
                        payload,
                        tokens_used,
                        cost_usd,
                        now,
                        expires_at,
                        compressed,
                        codec,
                        metadata,
                    ])
                })
                .map_err(|e| CacheError::database("set", e))?;
            Ok(())
        })
        .await?;

        if self.config.max_size_bytes.is_some() && !self.queue_size_check() {
            // No worker to hand off to; check inline but never fail the write
            if let Err(e) = self.enforce_size_limit().await {
                warn!("Post-write size check failed: {}", e);
            }
        }
        Ok(())
    }

    /// Delete an entry. Returns whether a row was removed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        debug!("DELETE key={}", short_key(key));

        let key = key.to_string();
        let pending_hits = Arc::clone(&self.pending_hits);
        let removed = self
            .with_conn(move |conn| {
                let removed = conn
                    .execute("DELETE FROM llm_cache WHERE cache_key = ?1", params![key])
                    .map_err(|e| CacheError::database("delete", e))?;
                pending_hits.lock().remove(&key);
                Ok(removed)
            })
            .await?;
        Ok(removed > 0)
    }

    /// Delete every entry whose `model` starts with `prefix`
    pub async fn delete_by_model_prefix(&self, prefix: &str) -> Result<u64> {
        let prefix = prefix.to_string();
        let removed = self
            .with_conn(move |conn| {
                conn.execute(
                    "DELETE FROM llm_cache WHERE substr(model, 1, length(?1)) = ?1",
                    params![prefix],
                )
                .map_err(|e| CacheError::database("delete", e))
            })
            .await?;
        Ok(removed as u64)
    }

    /// Remove all entries. Returns the number of rows removed.
    pub async fn clear(&self) -> Result<u64> {
        let pending_hits = Arc::clone(&self.pending_hits);
        let removed = self
            .with_conn(move |conn| {
                let removed = conn
                    .execute("DELETE FROM llm_cache", [])
                    .map_err(|e| CacheError::database("clear", e))?;
                pending_hits.lock().clear();
                compact(conn).map_err(|e| CacheError::database("compact", e))?;
                Ok(removed as u64)
            })
            .await?;

        info!("Cleared LLM cache ({} entries)", removed);
        Ok(removed)
    }

    /// Aggregate statistics: on-disk figures plus running request counters
    pub async fn get_stats(&self) -> Result<StoreStats> {
        if self.config.hit_count_policy == HitCountPolicy::Deferred {
            self.flush_hits().await?;
        }

        let now = Utc::now();
        let (total, total_hits, size_bytes, compressed, expired) = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*),
                            COALESCE(SUM(hit_count), 0),
                            COALESCE(SUM(LENGTH(response)), 0),
                            COALESCE(SUM(compressed), 0),
                            COALESCE(SUM(CASE WHEN expires_at IS NOT NULL AND expires_at <= ?1 THEN 1 ELSE 0 END), 0)
                     FROM llm_cache",
                    params![now],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)? as u64,
                            row.get::<_, i64>(1)? as u64,
                            row.get::<_, i64>(2)? as u64,
                            row.get::<_, i64>(3)? as u64,
                            row.get::<_, i64>(4)? as u64,
                        ))
                    },
                )
                .map_err(|e| CacheError::database("stats", e))
            })
            .await?;

        let counters = *self.counters.read();
        let ratio = |part: u64| {
            if total == 0 {
                0.0
            } else {
                part as f64 / total as f64
            }
        };

        Ok(StoreStats {
            total_entries: total,
            expired_entries: expired,
            total_hits,
            avg_hit_count: ratio(total_hits),
            size_bytes,
            max_size_bytes: self.config.max_size_bytes,
            compressed_entries: compressed,
            compression_ratio: ratio(compressed),
            requests: counters.requests,
            hits: counters.hits,
            misses: counters.misses,
            hit_rate: counters.hit_rate(),
            evictions: counters.evictions,
            expired_purged: counters.expired_purged,
        })
    }

    /// Classify store health; a failing stats query means unhealthy
    pub async fn health(&self, thresholds: &HealthThresholds) -> HealthReport {
        match self.get_stats().await {
            Ok(stats) => classify_health(&stats, thresholds),
            Err(e) => {
                warn!("Cache health check failed: {}", e);
                HealthReport::unhealthy(e.to_string())
            }
        }
    }

    /// Delete expired rows and compact the database file.
    /// Returns the number of rows removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let removed = self
            .with_conn(move |conn| {
                let removed = conn
                    .execute(
                        "DELETE FROM llm_cache WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                        params![now],
                    )
                    .map_err(|e| CacheError::database("sweep", e))?;
                if removed > 0 {
                    compact(conn).map_err(|e| CacheError::database("compact", e))?;
                }
                Ok(removed as u64)
            })
            .await?;

        if removed > 0 {
            self.counters.write().expired_purged += removed;
            info!("Purged {} expired cache entries", removed);
        }
        Ok(removed)
    }

    /// If total payload size exceeds `max_size_bytes`, evict the
    /// least recently accessed `eviction_fraction` of entries.
    /// Returns the number of rows evicted.
    pub async fn enforce_size_limit(&self) -> Result<u64> {
        let Some(max_size) = self.config.max_size_bytes else {
            return Ok(0);
        };
        let (size, _) = self.with_conn(size_and_count).await?;
        if size <= max_size {
            return Ok(0);
        }
        // Buffered hits move last_accessed_at, so land them before ranking
        if self.config.hit_count_policy == HitCountPolicy::Deferred {
            self.flush_hits().await?;
        }

        let fraction = self.config.eviction_fraction;
        let evicted = self
            .with_conn(move |conn| {
                let (size, count) = size_and_count(conn)?;
                if size <= max_size || count == 0 {
                    return Ok(0);
                }

                let batch = ((count as f64 * fraction).ceil() as u64).max(1);
                debug!(
                    "Cache size {} exceeds {} bytes, evicting {} of {} entries",
                    size, max_size, batch, count
                );
                let removed = conn
                    .execute(
                        "DELETE FROM llm_cache WHERE id IN (
                             SELECT id FROM llm_cache ORDER BY last_accessed_at ASC, id ASC LIMIT ?1
                         )",
                        params![batch as i64],
                    )
                    .map_err(|e| CacheError::database("evict", e))?;
                Ok(removed as u64)
            })
            .await?;

        if evicted > 0 {
            self.counters.write().evictions += evicted;
            info!("Size limit exceeded: evicted {} least recently accessed entries", evicted);
        }
        Ok(evicted)
    }

    /// Write buffered hit counts to disk in one transaction.
    /// Returns the number of keys flushed.
    ///
    /// Flushed counts leave the buffer only once the transaction commits,
    /// while the connection is still held, so reads never see a key's
    /// count go backwards.
    pub async fn flush_hits(&self) -> Result<usize> {
        let snapshot: Vec<(String, PendingHit)> = self
            .pending_hits
            .lock()
            .iter()
            .map(|(key, hit)| (key.clone(), *hit))
            .collect();
        if snapshot.is_empty() {
            return Ok(0);
        }

        let flushed = snapshot.len();
        let pending_hits = Arc::clone(&self.pending_hits);
        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| CacheError::database("flush_hits", e))?;
            {
                let mut stmt = tx
                    .prepare_cached(
                        "UPDATE llm_cache SET hit_count = hit_count + ?2, last_accessed_at = ?3 WHERE cache_key = ?1",
                    )
                    .map_err(|e| CacheError::database("flush_hits", e))?;
                for (key, hit) in &snapshot {
                    stmt.execute(params![key, hit.count, hit.last_accessed_at])
                        .map_err(|e| CacheError::database("flush_hits", e))?;
                }
            }
            tx.commit()
                .map_err(|e| CacheError::database("flush_hits", e))?;

            let mut pending = pending_hits.lock();
            for (key, written) in snapshot {
                if let Some(hit) = pending.get_mut(&key) {
                    hit.count -= written.count;
                    if hit.count <= 0 {
                        pending.remove(&key);
                    }
                }
            }
            Ok(())
        })
        .await?;

        debug!("Flushed deferred hit counts for {} keys", flushed);
        Ok(flushed)
    }

    /// Hand a size check to the maintenance worker. A full queue means one
    /// is already pending. Returns false when no worker is listening.
    fn queue_size_check(&self) -> bool {
        match self.size_check.lock().as_ref() {
            Some(tx) => !matches!(tx.try_send(()), Err(TrySendError::Closed(_))),
            None => false,
        }
    }

    fn decode(&self, row: StoredRow) -> Result<CacheEntry> {
        let StoredRow { mut entry, codec } = row;
        if entry.compressed {
            let codec: CompressionCodec = codec.as_deref().unwrap_or("gzip").parse()?;
            entry.response = self.compressor.decompress(&entry.response, codec)?;
        }
        Ok(entry)
    }
}

fn row_to_stored(row: &Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow {
        entry: CacheEntry {
            id: row.get(0)?,
            cache_key: row.get(1)?,
            model: row.get(2)?,
            prompt_hash: row.get(3)?,
            prompt: row.get(4)?,
            response: row.get(5)?,
            tokens_used: row.get(6)?,
            cost_usd: row.get(7)?,
            hit_count: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            last_accessed_at: row.get(11)?,
            expires_at: row.get(12)?,
            compressed: row.get(13)?,
            metadata: row.get(15)?,
        },
        codec: row.get(14)?,
    })
}

/// Buffer one hit; returns the pending count for the key
fn record_deferred_hit(
    pending_hits: &Mutex<HashMap<String, PendingHit>>,
    key: &str,
    now: DateTime<Utc>,
) -> i64 {
    let mut pending = pending_hits.lock();
    let hit = pending.entry(key.to_string()).or_insert(PendingHit {
        count: 0,
        last_accessed_at: now,
    });
    hit.count += 1;
    hit.last_accessed_at = now;
    hit.count
}

/// Total payload bytes and row count
fn size_and_count(conn: &mut Connection) -> Result<(u64, u64)> {
    conn.query_row(
        "SELECT COALESCE(SUM(LENGTH(response)), 0), COUNT(*) FROM llm_cache",
        [],
        |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
    )
    .map_err(|e| CacheError::database("evict", e))
}

/// Return freed pages to the filesystem
fn compact(conn: &Connection) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare("PRAGMA incremental_vacuum")?;
    let mut rows = stmt.query([])?;
    while rows.next()?.is_some() {}
    Ok(())
}

fn short_key(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}
