use super::storage::Storage;
use crate::core::error::{CacheError, Result};
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Error returned by a warmup loader
pub type LoaderError = Box<dyn std::error::Error + Send + Sync>;

/// Produces the value for one item. The token is cancelled when the item
/// times out or the whole run is cancelled.
pub type Loader = Arc<
    dyn Fn(CancellationToken) -> BoxFuture<'static, std::result::Result<Vec<u8>, LoaderError>>
        + Send
        + Sync,
>;

/// Warmer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    pub enabled: bool,
    /// Maximum loaders running at once
    pub concurrency: usize,
    /// Per-item budget covering every attempt
    pub timeout_ms: u64,
    /// Retries after the first failed attempt
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: 5,
            timeout_ms: 30_000,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
        }
    }
}

impl WarmupConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(CacheError::InvalidConfig(
                "warmup concurrency must be greater than zero".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(CacheError::InvalidConfig(
                "warmup timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// One registered warmup job
#[derive(Clone)]
pub struct WarmupItem {
    pub key: String,
    pub loader: Loader,
    pub ttl: Option<Duration>,
    /// Higher runs first
    pub priority: i32,
}

impl WarmupItem {
    pub fn new<F, Fut, E>(key: impl Into<String>, loader: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Vec<u8>, E>> + Send + 'static,
        E: Into<LoaderError> + 'static,
    {
        let loader: Loader = Arc::new(move |token: CancellationToken| {
            loader(token)
                .map(|result| result.map_err(|e| -> LoaderError { e.into() }))
                .boxed()
        });
        Self {
            key: key.into(),
            loader,
            ttl: None,
            priority: 0,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl fmt::Debug for WarmupItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmupItem")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Outcome of one item
#[derive(Debug, Clone, Serialize)]
pub struct WarmupResult {
    pub key: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration: Duration,
    /// Attempts beyond the first
    pub retries: u32,
}

/// Aggregate of one warmup run
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmupSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_retries: u64,
    /// Sum of per-item durations
    pub total_duration: Duration,
}

impl WarmupSummary {
    pub fn from_results(results: &[WarmupResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            total_retries: results.iter().map(|r| u64::from(r.retries)).sum(),
            total_duration: results.iter().map(|r| r.duration).sum(),
        }
    }
}

/// Pre-populates a cache from registered loaders
pub struct CacheWarmer {
    storage: Arc<dyn Storage>,
    config: WarmupConfig,
    items: Mutex<Vec<WarmupItem>>,
}

impl CacheWarmer {
    pub fn new(storage: Arc<dyn Storage>, config: WarmupConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            config,
            items: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &WarmupConfig {
        &self.config
    }

    pub fn register(&self, item: WarmupItem) {
        debug!("Registered warmup item {} (priority {})", item.key, item.priority);
        self.items.lock().push(item);
    }

    pub fn register_batch(&self, items: impl IntoIterator<Item = WarmupItem>) {
        self.items.lock().extend(items);
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    pub fn items(&self) -> Vec<WarmupItem> {
        self.items.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Run every registered item and return one result per item, highest
    /// priority first.
    ///
    /// Returns an empty list when disabled. Item failures never abort the
    /// run; cancelling `cancel` fails the items still in flight or queued.
    pub async fn warmup(&self, cancel: &CancellationToken) -> Vec<WarmupResult> {
        if !self.config.enabled {
            debug!("Cache warmup disabled, skipping");
            return Vec::new();
        }

        let mut items = self.items();
        if items.is_empty() {
            return Vec::new();
        }
        // Stable sort keeps registration order within a priority
        items.sort_by(|a, b| b.priority.cmp(&a.priority));

        info!(
            "Starting cache warmup: {} items, concurrency {}",
            items.len(),
            self.config.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = Vec::with_capacity(items.len());

        for item in items {
            // Semaphore is never closed, so a permit is always granted
            let permit = Arc::clone(&semaphore).acquire_owned().await.ok();
            let key = item.key.clone();
            let storage = Arc::clone(&self.storage);
            let config = self.config.clone();
            let parent = cancel.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                run_item(item, storage, &config, parent).await
            });
            tasks.push(async move {
                match handle.await {
                    Ok(result) => result,
                    Err(e) => WarmupResult {
                        key,
                        success: false,
                        error: Some(format!("warmup task failed: {e}")),
                        duration: Duration::ZERO,
                        retries: 0,
                    },
                }
            });
        }

        let results = join_all(tasks).await;
        let summary = WarmupSummary::from_results(&results);
        info!(
            "Cache warmup finished: {}/{} succeeded, {} failed, {} retries",
            summary.succeeded, summary.total, summary.failed, summary.total_retries
        );
        results
    }
}

async fn run_item(
    item: WarmupItem,
    storage: Arc<dyn Storage>,
    config: &WarmupConfig,
    parent: CancellationToken,
) -> WarmupResult {
    let started = Instant::now();
    let token = parent.child_token();
    let timeout = config.timeout();
    let mut retries = 0u32;

    // Only the loader attempts race the budget; the write below is never
    // dropped half-way, so a reported failure leaves no row behind.
    let loaded: std::result::Result<Vec<u8>, String> = {
        let attempts = async {
            let mut attempt = 0u32;
            loop {
                if token.is_cancelled() {
                    return Err("warmup cancelled".to_string());
                }
                let error = match (item.loader)(token.clone()).await {
                    Ok(value) => return Ok(value),
                    Err(e) => e.to_string(),
                };

                if attempt >= config.retry_attempts {
                    return Err(error);
                }
                attempt += 1;
                retries = attempt;
                debug!(
                    "Warmup loader for {} failed (attempt {}): {}",
                    item.key, attempt, error
                );
                tokio::time::sleep(config.retry_delay()).await;
            }
        };

        tokio::select! {
            biased;
            _ = parent.cancelled() => Err("warmup cancelled".to_string()),
            result = tokio::time::timeout(timeout, attempts) => match result {
                Ok(result) => result,
                Err(_) => Err(format!("timed out after {:?}", timeout)),
            },
        }
    };
    // Signal any work the loader left running
    token.cancel();

    let outcome = match loaded {
        Ok(_) if parent.is_cancelled() => Err("warmup cancelled".to_string()),
        Ok(value) => storage
            .set(&item.key, value, item.ttl)
            .await
            .map_err(|e| format!("storage write failed: {e}")),
        Err(e) => Err(e),
    };

    if let Err(e) = &outcome {
        warn!("Warmup of {} failed after {} retries: {}", item.key, retries, e);
    }

    WarmupResult {
        key: item.key,
        success: outcome.is_ok(),
        error: outcome.err(),
        duration: started.elapsed(),
        retries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

    #[derive(Default)]
    struct MemoryStorage {
        values: Mutex<HashMap<String, (Vec<u8>, Option<Duration>)>>,
    }

    #[async_trait]
    impl Storage for MemoryStorage {
        async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
            self.values.lock().insert(key.to_string(), (value, ttl));
            Ok(())
        }
    }

    fn fast_config() -> WarmupConfig {
        WarmupConfig {
            timeout_ms: 2_000,
            retry_delay_ms: 10,
            ..Default::default()
        }
    }

    fn warmer(config: WarmupConfig) -> (CacheWarmer, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::default());
        let warmer = CacheWarmer::new(storage.clone(), config).unwrap();
        (warmer, storage)
    }

    fn ok_item(key: &str) -> WarmupItem {
        let value = key.as_bytes().to_vec();
        WarmupItem::new(key, move |_| {
            let value = value.clone();
            async move { Ok::<_, LoaderError>(value) }
        })
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let (warmer, storage) = warmer(WarmupConfig {
            concurrency: 3,
            ..fast_config()
        });
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..10 {
            let running = running.clone();
            let peak = peak.clone();
            warmer.register(WarmupItem::new(format!("k{i}"), move |_| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, LoaderError>(b"v".to_vec())
                }
            }));
        }

        let started = Instant::now();
        let results = warmer.warmup(&CancellationToken::new()).await;
        let elapsed = started.elapsed();

        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r.success));
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(elapsed >= Duration::from_millis(400));
        assert!(elapsed < Duration::from_millis(900), "took {elapsed:?}");
        assert_eq!(storage.values.lock().len(), 10);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let (warmer, storage) = warmer(fast_config());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        warmer.register(WarmupItem::new("flaky", move |_| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("upstream unavailable")
                } else {
                    Ok(b"ready".to_vec())
                }
            }
        }));

        let results = warmer.warmup(&CancellationToken::new()).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(results[0].retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(storage.values.lock()["flaky"].0, b"ready");
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let (warmer, storage) = warmer(WarmupConfig {
            retry_attempts: 2,
            ..fast_config()
        });
        warmer.register(ok_item("a"));
        warmer.register(WarmupItem::new("broken", |_| async {
            Err::<Vec<u8>, _>("always fails")
        }));
        warmer.register(ok_item("b"));

        let results = warmer.warmup(&CancellationToken::new()).await;
        assert_eq!(results.len(), 3);

        let broken = results.iter().find(|r| r.key == "broken").unwrap();
        assert!(!broken.success);
        assert_eq!(broken.error.as_deref(), Some("always fails"));
        assert_eq!(broken.retries, 2);

        assert_eq!(results.iter().filter(|r| r.success).count(), 2);
        assert!(storage.values.lock().contains_key("a"));
        assert!(storage.values.lock().contains_key("b"));

        let summary = WarmupSummary::from_results(&results);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_retries, 2);
    }

    #[tokio::test]
    async fn test_timeout_abandons_loader_and_cancels_token() {
        let (warmer, _storage) = warmer(WarmupConfig {
            timeout_ms: 50,
            ..fast_config()
        });
        let observed = Arc::new(AtomicBool::new(false));
        let flag = observed.clone();

        warmer.register(WarmupItem::new("slow", move |token: CancellationToken| {
            let flag = flag.clone();
            async move {
                tokio::spawn(async move {
                    token.cancelled().await;
                    flag.store(true, Ordering::SeqCst);
                });
                // Ignores cancellation
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, LoaderError>(Vec::new())
            }
        }));

        let results = warmer.warmup(&CancellationToken::new()).await;
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
        assert!(results[0].duration < Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_parent_cancellation_fails_items() {
        let (warmer, storage) = warmer(fast_config());
        warmer.register(WarmupItem::new("pending", |token: CancellationToken| async move {
            token.cancelled().await;
            Err::<Vec<u8>, _>("cancelled by caller")
        }));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = warmer.warmup(&cancel).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(storage.values.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_never_loads_or_writes() {
        let (warmer, storage) = warmer(WarmupConfig {
            concurrency: 16,
            ..fast_config()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        for i in 0..200 {
            let calls = calls.clone();
            warmer.register(WarmupItem::new(format!("ready-{i}"), move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, LoaderError>(b"v".to_vec()) }
            }));
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = warmer.warmup(&cancel).await;

        assert_eq!(results.len(), 200);
        assert!(results.iter().all(|r| !r.success));
        assert!(
            results
                .iter()
                .all(|r| r.error.as_deref() == Some("warmup cancelled"))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(storage.values.lock().is_empty());
    }

    #[tokio::test]
    async fn test_slow_write_outlives_loader_budget() {
        struct SlowStorage(Mutex<Vec<String>>);

        #[async_trait]
        impl Storage for SlowStorage {
            async fn set(&self, key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
                tokio::time::sleep(Duration::from_millis(100)).await;
                self.0.lock().push(key.to_string());
                Ok(())
            }
        }

        let storage = Arc::new(SlowStorage(Mutex::new(Vec::new())));
        let warmer = CacheWarmer::new(
            storage.clone(),
            WarmupConfig {
                timeout_ms: 20,
                ..fast_config()
            },
        )
        .unwrap();
        warmer.register(ok_item("written"));

        let results = warmer.warmup(&CancellationToken::new()).await;
        assert!(results[0].success);
        assert_eq!(*storage.0.lock(), vec!["written".to_string()]);
    }

    #[tokio::test]
    async fn test_priority_order() {
        let (warmer, _storage) = warmer(WarmupConfig {
            concurrency: 1,
            ..fast_config()
        });
        let order = Arc::new(Mutex::new(Vec::new()));

        for (key, priority) in [("low", 1), ("high", 5), ("mid", 3)] {
            let order = order.clone();
            warmer.register(
                WarmupItem::new(key, move |_| {
                    let order = order.clone();
                    async move {
                        order.lock().push(key);
                        Ok::<_, LoaderError>(Vec::new())
                    }
                })
                .with_priority(priority),
            );
        }

        let results = warmer.warmup(&CancellationToken::new()).await;
        assert_eq!(*order.lock(), vec!["high", "mid", "low"]);
        let keys: Vec<_> = results.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let (warmer, storage) = warmer(WarmupConfig {
            enabled: false,
            ..fast_config()
        });
        warmer.register(ok_item("a"));

        assert!(warmer.warmup(&CancellationToken::new()).await.is_empty());
        assert!(storage.values.lock().is_empty());
        assert_eq!(warmer.len(), 1);
    }

    #[tokio::test]
    async fn test_registration_accessors() {
        let (warmer, storage) = warmer(fast_config());
        assert!(warmer.is_empty());
        warmer.register_batch(vec![
            ok_item("a").with_ttl(Duration::from_secs(60)),
            ok_item("b"),
        ]);
        assert_eq!(warmer.len(), 2);
        assert_eq!(warmer.items()[0].key, "a");

        warmer.warmup(&CancellationToken::new()).await;
        assert_eq!(
            storage.values.lock()["a"].1,
            Some(Duration::from_secs(60))
        );

        warmer.clear();
        assert!(warmer.is_empty());
    }

    #[test]
    fn test_config_validation() {
        assert!(WarmupConfig::default().validate().is_ok());
        let zero = WarmupConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(CacheError::InvalidConfig(_))));
    }
}
