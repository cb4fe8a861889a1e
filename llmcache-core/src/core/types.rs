use super::error::{CacheError, Result};
use super::key::{generate_cache_key, prompt_hash};
use crate::compression::CompressionConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::PathBuf;
use std::time::Duration;

/// One persisted model response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub id: i64,
    pub cache_key: String,
    pub model: String,
    pub prompt_hash: String,
    pub prompt: Option<String>,
    /// Response payload, always decompressed when returned from a lookup
    pub response: Vec<u8>,
    pub tokens_used: i64,
    pub cost_usd: f64,
    pub hit_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// `None` means the entry never expires
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the payload is stored compressed on disk
    pub compressed: bool,
    pub metadata: Option<serde_json::Value>,
}

impl CacheEntry {
    /// Check if the entry has expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }

    /// Check if the entry is live right now
    pub fn is_live(&self) -> bool {
        !self.is_expired_at(Utc::now())
    }

    /// Response payload as text (lossy for non UTF-8 payloads)
    pub fn response_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.response)
    }
}

/// Expiry requested by the writer of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// Use the store's configured default TTL, resolved at write time
    #[default]
    Default,
    /// Never expire, regardless of the store default
    Never,
    /// Expire after the given duration from the write
    After(Duration),
    /// Expire at an absolute point in time
    At(DateTime<Utc>),
}

impl Expiry {
    /// Resolve to an absolute expiry timestamp at write time
    pub fn resolve(
        self,
        now: DateTime<Utc>,
        default_ttl: Option<Duration>,
    ) -> Result<Option<DateTime<Utc>>> {
        match self {
            Expiry::Default => default_ttl.map(|ttl| expiry_after(now, ttl)).transpose(),
            Expiry::Never => Ok(None),
            Expiry::After(ttl) => expiry_after(now, ttl).map(Some),
            Expiry::At(at) => Ok(Some(at)),
        }
    }
}

/// `now + ttl`, rejecting durations that do not fit a timestamp
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| CacheError::InvalidConfig(format!("TTL out of range: {:?}", ttl)))
}

/// Entry to be written with `PersistentStore::set`
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub cache_key: String,
    pub model: String,
    pub prompt_hash: String,
    pub prompt: Option<String>,
    pub response: Vec<u8>,
    pub tokens_used: i64,
    pub cost_usd: f64,
    pub metadata: Option<serde_json::Value>,
    pub expiry: Expiry,
}

impl NewEntry {
    /// Build an entry keyed by `generate_cache_key(model, prompt)`
    pub fn new(model: &str, prompt: &str, response: impl Into<Vec<u8>>) -> Self {
        Self {
            cache_key: generate_cache_key(model, prompt),
            model: model.to_string(),
            prompt_hash: prompt_hash(prompt),
            prompt: Some(prompt.to_string()),
            response: response.into(),
            tokens_used: 0,
            cost_usd: 0.0,
            metadata: None,
            expiry: Expiry::Default,
        }
    }

    /// Build an entry under a caller-computed key
    pub fn with_key(
        cache_key: impl Into<String>,
        model: impl Into<String>,
        response: impl Into<Vec<u8>>,
    ) -> Self {
        let cache_key = cache_key.into();
        Self {
            prompt_hash: cache_key.clone(),
            cache_key,
            model: model.into(),
            prompt: None,
            response: response.into(),
            tokens_used: 0,
            cost_usd: 0.0,
            metadata: None,
            expiry: Expiry::Default,
        }
    }

    pub fn tokens(mut self, tokens_used: i64) -> Self {
        self.tokens_used = tokens_used;
        self
    }

    pub fn cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn prompt_hash(mut self, prompt_hash: impl Into<String>) -> Self {
        self.prompt_hash = prompt_hash.into();
        self
    }

    /// Do not persist the raw prompt text
    pub fn without_prompt(mut self) -> Self {
        self.prompt = None;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.expiry = Expiry::After(ttl);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expiry = Expiry::At(at);
        self
    }

    pub fn expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = expiry;
        self
    }
}

/// How hit counts are written back on a cache hit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HitCountPolicy {
    /// Update `hit_count`/`last_accessed_at` in the same call as the read
    #[default]
    Synchronous,
    /// Buffer hits in memory and flush them in batches
    Deferred,
}

/// Configuration for the persistent store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file; `None` opens a private in-memory database
    pub path: Option<PathBuf>,
    /// Default entry lifetime applied at write time; `None`/0 = no TTL
    pub ttl_secs: Option<u64>,
    /// Total payload size bound; `None` disables size eviction
    pub max_size_bytes: Option<u64>,
    pub compression: CompressionConfig,
    /// Expired-entry sweep interval
    pub sweep_interval_secs: u64,
    /// Share of entries removed by one size-check eviction
    pub eviction_fraction: f64,
    pub hit_count_policy: HitCountPolicy,
    /// Flush interval for deferred hit counts
    pub hit_flush_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            ttl_secs: None,
            max_size_bytes: None,
            compression: CompressionConfig::default(),
            sweep_interval_secs: 3600,
            eviction_fraction: 0.10,
            hit_count_policy: HitCountPolicy::Synchronous,
            hit_flush_interval_secs: 5,
        }
    }
}

impl StoreConfig {
    /// Store backed by a database file at `path`
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.ttl_secs.filter(|secs| *secs > 0).map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn hit_flush_interval(&self) -> Duration {
        Duration::from_secs(self.hit_flush_interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.eviction_fraction > 0.0 && self.eviction_fraction <= 1.0) {
            return Err(CacheError::InvalidConfig(format!(
                "eviction_fraction must be in (0, 1], got {}",
                self.eviction_fraction
            )));
        }
        if self.max_size_bytes == Some(0) {
            return Err(CacheError::InvalidConfig(
                "max_size_bytes must be greater than zero".to_string(),
            ));
        }
        self.compression.validate()
    }
}

/// Running request counters, kept apart from the data path
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestCounters {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_purged: u64,
}

impl RequestCounters {
    pub fn record_hit(&mut self) {
        self.requests += 1;
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.requests += 1;
        self.misses += 1;
    }

    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.requests as f64
        }
    }
}

/// Statistics for the persistent store
#[derive(Debug, Default, Clone, Serialize)]
pub struct StoreStats {
    /// Rows on disk, including expired rows awaiting the sweep
    pub total_entries: u64,
    pub expired_entries: u64,
    /// Sum of `hit_count` over all rows
    pub total_hits: u64,
    pub avg_hit_count: f64,
    /// Stored payload bytes (after compression)
    pub size_bytes: u64,
    pub max_size_bytes: Option<u64>,
    pub compressed_entries: u64,
    /// Compressed entries / total entries
    pub compression_ratio: f64,
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expired_purged: u64,
}
