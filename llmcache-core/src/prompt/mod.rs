//! Typed Prompt Cache
//!
//! Category-keyed cache over two tiers: an in-process map and the
//! persistent store. Each category carries its own retention policy, e.g.
//! embeddings are permanent while RAG results expire after 30 minutes.

pub mod cache;
pub mod typed;
pub mod types;

pub use cache::{CleanupHandle, PromptCache, PromptCacheStats, prompt_key};
pub use types::{
    CategoryTtls, MODEL_TAG_PREFIX, PromptCacheConfig, PromptCacheEntry, PromptCategory,
};
