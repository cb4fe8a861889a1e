use crate::core::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const DAY_SECS: u64 = 24 * 60 * 60;

/// Logical category of a prompt-cache value; each has its own TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptCategory {
    Embedding,
    SystemPrompt,
    TemplatePrompt,
    WorkflowStep,
    RagResult,
}

impl PromptCategory {
    pub const ALL: [PromptCategory; 5] = [
        PromptCategory::Embedding,
        PromptCategory::SystemPrompt,
        PromptCategory::TemplatePrompt,
        PromptCategory::WorkflowStep,
        PromptCategory::RagResult,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptCategory::Embedding => "embedding",
            PromptCategory::SystemPrompt => "system_prompt",
            PromptCategory::TemplatePrompt => "template_prompt",
            PromptCategory::WorkflowStep => "workflow_step",
            PromptCategory::RagResult => "rag_result",
        }
    }

    /// Value of the `model` column for disk rows of this category
    pub fn model_tag(&self) -> String {
        format!("{}{}", MODEL_TAG_PREFIX, self.as_str())
    }
}

impl fmt::Display for PromptCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prefix of the `model` column on every disk row owned by the prompt cache
pub const MODEL_TAG_PREFIX: &str = "prompt-cache:";

/// Per-category TTLs in seconds; `None` or `0` means permanent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryTtls {
    pub embedding_secs: Option<u64>,
    pub system_prompt_secs: Option<u64>,
    pub template_prompt_secs: Option<u64>,
    pub workflow_step_secs: Option<u64>,
    pub rag_result_secs: Option<u64>,
}

impl Default for CategoryTtls {
    fn default() -> Self {
        Self {
            embedding_secs: None,
            system_prompt_secs: Some(7 * DAY_SECS),
            template_prompt_secs: Some(3 * DAY_SECS),
            workflow_step_secs: Some(60 * 60),
            rag_result_secs: Some(30 * 60),
        }
    }
}

impl CategoryTtls {
    pub fn ttl(&self, category: PromptCategory) -> Option<Duration> {
        let secs = match category {
            PromptCategory::Embedding => self.embedding_secs,
            PromptCategory::SystemPrompt => self.system_prompt_secs,
            PromptCategory::TemplatePrompt => self.template_prompt_secs,
            PromptCategory::WorkflowStep => self.workflow_step_secs,
            PromptCategory::RagResult => self.rag_result_secs,
        };
        secs.filter(|secs| *secs > 0).map(Duration::from_secs)
    }
}

/// Configuration for the typed prompt cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptCacheConfig {
    pub ttls: CategoryTtls,
    /// Memory-tier sweep interval for `start_cleanup`
    pub cleanup_interval_secs: u64,
    /// Characters of content kept in the disk row's `prompt_hash` column
    pub debug_prefix_len: usize,
    /// Upper bound on memory-tier entries
    pub max_memory_entries: usize,
}

impl Default for PromptCacheConfig {
    fn default() -> Self {
        Self {
            ttls: CategoryTtls::default(),
            cleanup_interval_secs: 300,
            debug_prefix_len: 100,
            max_memory_entries: 10_000,
        }
    }
}

impl PromptCacheConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cleanup_interval_secs == 0 {
            return Err(CacheError::InvalidConfig(
                "prompt cache cleanup_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.max_memory_entries == 0 {
            return Err(CacheError::InvalidConfig(
                "prompt cache max_memory_entries must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Snapshot of a memory-tier entry
#[derive(Debug, Clone, Serialize)]
pub struct PromptCacheEntry {
    pub key: String,
    pub category: PromptCategory,
    /// Serialized value
    pub value: Vec<u8>,
    pub created_at: DateTime<Utc>,
    /// `None` for permanent categories
    pub expires_at: Option<DateTime<Utc>>,
    pub hit_count: u64,
}

impl PromptCacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
