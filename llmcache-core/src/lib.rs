pub mod cache;
pub mod compression;
pub mod config;
pub mod core;
pub mod health;
pub mod prompt;
pub mod store;
pub mod warmup;

// Re-export commonly used types
pub use cache::{FrequencyIndex, LfuCache, LfuConfig, LfuStats};
pub use compression::{CompressionCodec, CompressionConfig, Compressor};
pub use config::{LlmCacheConfig, LoggingConfig};
pub use core::{
    CacheEntry, CacheError, Expiry, HitCountPolicy, NewEntry, Result, StoreConfig, StoreStats,
    generate_cache_key,
};
pub use health::{HealthReport, HealthStatus, HealthThresholds, classify_health};
pub use prompt::{
    CategoryTtls, CleanupHandle, PromptCache, PromptCacheConfig, PromptCacheStats, PromptCategory,
};
pub use store::{MaintenanceHandle, PersistentStore};
pub use warmup::{CacheWarmer, Storage, WarmupConfig, WarmupItem, WarmupResult, WarmupSummary};
