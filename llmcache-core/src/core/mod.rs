pub mod error;
pub mod key;
pub mod types;

pub use error::{CacheError, Result};
pub use key::{generate_cache_key, hash_parts, normalize_prompt, prompt_hash};
pub use types::{
    CacheEntry, Expiry, HitCountPolicy, NewEntry, RequestCounters, StoreConfig, StoreStats,
};
