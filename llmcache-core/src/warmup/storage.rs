use crate::cache::LfuCache;
use crate::core::error::Result;
use crate::core::types::{Expiry, NewEntry};
use crate::prompt::{PromptCache, PromptCategory};
use crate::store::PersistentStore;
use async_trait::async_trait;
use std::time::Duration;

/// `model` column value for rows written by the warmer
pub const WARMUP_MODEL: &str = "warmup";

/// Write target of the cache warmer
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store `value` under `key`. `None` (or zero) `ttl` means the target's
    /// default retention.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;
}

fn warmup_entry(key: &str, value: Vec<u8>, ttl: Option<Duration>) -> NewEntry {
    let expiry = ttl
        .filter(|ttl| !ttl.is_zero())
        .map_or(Expiry::Default, Expiry::After);
    NewEntry::with_key(key, WARMUP_MODEL, value).expiry(expiry)
}

#[async_trait]
impl Storage for PersistentStore {
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        PersistentStore::set(self, warmup_entry(key, value, ttl)).await
    }
}

#[async_trait]
impl Storage for LfuCache {
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        LfuCache::set(self, warmup_entry(key, value, ttl)).await
    }
}

/// Writes into the workflow-step category; `key` is the content key
#[async_trait]
impl Storage for PromptCache {
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.insert_raw(PromptCategory::WorkflowStep, key, value, ttl)
            .await
    }
}
