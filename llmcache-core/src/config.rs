use crate::cache::LfuConfig;
use crate::core::error::{CacheError, Result};
use crate::core::types::StoreConfig;
use crate::health::HealthThresholds;
use crate::prompt::PromptCacheConfig;
use crate::warmup::WarmupConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Root configuration for all cache components
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmCacheConfig {
    pub store: StoreConfig,
    pub lfu: LfuConfig,
    pub prompt: PromptCacheConfig,
    pub warmup: WarmupConfig,
    pub health: HealthThresholds,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `text` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl LlmCacheConfig {
    /// Load and validate a YAML configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: LlmCacheConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.lfu.validate()?;
        self.prompt.validate()?;
        self.warmup.validate()?;
        match self.logging.format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(CacheError::InvalidConfig(format!(
                "unknown logging format: {}",
                other
            ))),
        }
    }
}
