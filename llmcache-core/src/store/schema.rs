//! SQLite schema for the response cache.

use rusqlite::Connection;

/// Cache table. Point lookups on `cache_key` use the index backing the
/// UNIQUE constraint.
const CREATE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS llm_cache (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cache_key TEXT UNIQUE NOT NULL,
    model TEXT NOT NULL,
    prompt_hash TEXT NOT NULL,
    prompt TEXT,
    response BLOB NOT NULL,
    tokens_used INTEGER NOT NULL DEFAULT 0,
    cost_usd REAL NOT NULL DEFAULT 0,
    hit_count INTEGER NOT NULL DEFAULT 0,
    created_at DATETIME NOT NULL,
    updated_at DATETIME NOT NULL,
    last_accessed_at DATETIME NOT NULL,
    expires_at DATETIME,
    compressed BOOLEAN NOT NULL DEFAULT 0,
    codec TEXT,
    metadata JSON
);
CREATE INDEX IF NOT EXISTS idx_llm_cache_model_prompt ON llm_cache(model, prompt_hash);
CREATE INDEX IF NOT EXISTS idx_llm_cache_expires_at ON llm_cache(expires_at);
CREATE INDEX IF NOT EXISTS idx_llm_cache_last_accessed ON llm_cache(last_accessed_at);
";

/// Live row by key; column order matches `row_to_stored`
pub(crate) const SELECT_LIVE_BY_KEY: &str = "
SELECT id, cache_key, model, prompt_hash, prompt, response, tokens_used, cost_usd, hit_count,
       created_at, updated_at, last_accessed_at, expires_at, compressed, codec, metadata
FROM llm_cache
WHERE cache_key = ?1 AND (expires_at IS NULL OR expires_at > ?2)
";

pub(crate) const UPSERT: &str = "
INSERT INTO llm_cache (
    cache_key, model, prompt_hash, prompt, response, tokens_used, cost_usd, hit_count,
    created_at, updated_at, last_accessed_at, expires_at, compressed, codec, metadata
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8, ?8, ?9, ?10, ?11, ?12)
ON CONFLICT(cache_key) DO UPDATE SET
    model = excluded.model,
    prompt_hash = excluded.prompt_hash,
    prompt = excluded.prompt,
    response = excluded.response,
    tokens_used = excluded.tokens_used,
    cost_usd = excluded.cost_usd,
    metadata = excluded.metadata,
    compressed = excluded.compressed,
    codec = excluded.codec,
    expires_at = excluded.expires_at,
    updated_at = excluded.updated_at,
    last_accessed_at = excluded.last_accessed_at
";

/// Apply pragmas and create the schema. Idempotent.
pub fn apply(conn: &Connection, file_backed: bool) -> rusqlite::Result<()> {
    // Must precede table creation to take effect on a fresh database
    conn.pragma_update(None, "auto_vacuum", "INCREMENTAL")?;
    if file_backed {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!("SQLite journal mode: {}", mode);
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.execute_batch(CREATE_TABLE)
}
