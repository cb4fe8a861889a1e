//! Cache Module
//!
//! Frequency-based eviction on top of the persistent store:
//! - Frequency index: O(1) LFU bookkeeping over a bounded key set
//! - LFU layer: evicted keys are removed from the store as well

pub mod frequency;
pub mod lfu;

pub use frequency::{FrequencyIndex, TrackedKey};
pub use lfu::{LfuCache, LfuConfig, LfuStats};
