//! Cache Warmer
//!
//! Runs registered loaders with bounded concurrency, a per-item timeout
//! and fixed-delay retries, writing results through the `Storage` trait.

pub mod storage;
pub mod warmer;

pub use storage::{Storage, WARMUP_MODEL};
pub use warmer::{
    CacheWarmer, Loader, LoaderError, WarmupConfig, WarmupItem, WarmupResult, WarmupSummary,
};
