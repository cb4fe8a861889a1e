use thiserror::Error;

/// Main error type for cache operations
///
/// A cache miss is never an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database error during {op}: {source}")]
    Database {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Maintenance tasks are already running for this store")]
    MaintenanceRunning,

    #[error("Background task failed: {0}")]
    TaskJoin(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Wrap a storage engine error with the operation that produced it
    pub fn database(op: &'static str, source: rusqlite::Error) -> Self {
        Self::Database { op, source }
    }

    /// Whether this error means the underlying storage is unavailable
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Self::Database { .. } | Self::Io(_) | Self::TaskJoin(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for CacheError {
    fn from(e: serde_yaml::Error) -> Self {
        CacheError::InvalidConfig(e.to_string())
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(e: tokio::task::JoinError) -> Self {
        CacheError::TaskJoin(e.to_string())
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
