//! llmcache administrative tool
//!
//! Inspects and maintains an LLM response cache database directly.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use llmcache_core::{HealthStatus, LlmCacheConfig, PersistentStore};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "llmcache-cli")]
#[command(about = "Administrative tool for llmcache databases", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Cache database file (overrides `store.path` from the config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format (defaults to `logging.format` from the config)
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Print cache statistics as JSON
    Stats,

    /// Classify cache health
    Health,

    /// Print the response stored under a cache key
    Get {
        /// Cache key
        key: String,
    },

    /// Delete one entry
    Delete {
        /// Cache key
        key: String,
    },

    /// Remove every entry
    Clear {
        /// Required confirmation
        #[arg(long)]
        force: bool,
    },

    /// Purge expired entries now
    Sweep,

    /// Run the size check now, evicting least recently accessed entries
    Evict,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => LlmCacheConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => LlmCacheConfig::default(),
    };

    init_logging(&cli, &config);

    if let Some(db) = &cli.db {
        config.store.path = Some(db.clone());
    }
    let Some(path) = config.store.path.clone() else {
        bail!("No database given: pass --db or set store.path in the config");
    };
    if !path.exists() {
        bail!("Database {} does not exist", path.display());
    }

    let store = PersistentStore::open(config.store.clone())
        .with_context(|| format!("Failed to open cache database {}", path.display()))?;

    match cli.command {
        Commands::Stats => {
            let stats = store.get_stats().await.context("Failed to read statistics")?;
            print_json(&stats)?;
        }

        Commands::Health => {
            let report = store.health(&config.health).await;
            print_json(&report)?;
            if report.status == HealthStatus::Unhealthy {
                bail!("Cache is unhealthy");
            }
        }

        Commands::Get { key } => {
            let Some(entry) = store.get(&key).await.context("Lookup failed")? else {
                bail!("No live entry for key {}", key);
            };
            info!(
                "model={}, hits={}, compressed={}, expires_at={:?}",
                entry.model, entry.hit_count, entry.compressed, entry.expires_at
            );
            println!("{}", entry.response_text());
        }

        Commands::Delete { key } => {
            if store.delete(&key).await.context("Delete failed")? {
                info!("Deleted {}", key);
            } else {
                info!("No entry for {}", key);
            }
        }

        Commands::Clear { force } => {
            if !force {
                bail!("Refusing to clear the cache without --force");
            }
            let removed = store.clear().await.context("Clear failed")?;
            info!("Removed {} entries", removed);
        }

        Commands::Sweep => {
            let removed = store
                .purge_expired()
                .await
                .context("Expired-entry sweep failed")?;
            info!("Purged {} expired entries", removed);
        }

        Commands::Evict => {
            if config.store.max_size_bytes.is_none() {
                info!("No max_size_bytes configured, nothing to evict");
            }
            let evicted = store
                .enforce_size_limit()
                .await
                .context("Size-check eviction failed")?;
            info!("Evicted {} entries", evicted);
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `--verbose` selects debug, else the config level
fn init_logging(cli: &Cli, config: &LlmCacheConfig) {
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let format = cli.log_format.unwrap_or(if config.logging.format == "json" {
        LogFormat::Json
    } else {
        LogFormat::Text
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to encode JSON")?
    );
    Ok(())
}
