use chrono::Utc;
use llmcache_core::{
    CompressionConfig, HealthStatus, HealthThresholds, NewEntry, PersistentStore, StoreConfig,
    generate_cache_key,
};
use std::time::Duration;

fn file_store(dir: &tempfile::TempDir) -> PersistentStore {
    PersistentStore::open(StoreConfig::at_path(dir.path().join("llm_cache.db"))).unwrap()
}

#[tokio::test]
async fn test_small_and_large_payloads_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);

    let small = "short answer".to_string();
    let large = "Rust ownership makes aliasing explicit. ".repeat(64);
    assert!(large.len() >= CompressionConfig::default().threshold_bytes);

    store
        .set(NewEntry::new("gpt-4", "small", small.clone()))
        .await
        .unwrap();
    store
        .set(NewEntry::new("gpt-4", "large", large.clone()))
        .await
        .unwrap();

    let got_small = store.get_by_prompt("gpt-4", "small").await.unwrap().unwrap();
    assert!(!got_small.compressed);
    assert_eq!(got_small.response_text(), small);

    let got_large = store.get_by_prompt("gpt-4", "large").await.unwrap().unwrap();
    assert!(got_large.compressed);
    assert_eq!(got_large.response, large.as_bytes());
}

#[tokio::test]
async fn test_incompressible_payload_stored_raw() {
    let store = PersistentStore::in_memory().unwrap();
    // xorshift noise does not shrink under deflate
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    let noise: Vec<u8> = (0..4096)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect();

    store
        .set(NewEntry::with_key("noise", "m", noise.clone()))
        .await
        .unwrap();
    let got = store.get("noise").await.unwrap().unwrap();
    assert!(!got.compressed);
    assert_eq!(got.response, noise);
}

#[tokio::test]
async fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = file_store(&dir);
        store
            .set(NewEntry::new("gpt-4", "persist me", "still here").tokens(42).cost(0.01))
            .await
            .unwrap();
    }

    let store = file_store(&dir);
    let entry = store
        .get(&generate_cache_key("gpt-4", "persist me"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.response_text(), "still here");
    assert_eq!(entry.tokens_used, 42);
    assert_eq!(entry.prompt.as_deref(), Some("persist me"));
}

#[tokio::test]
async fn test_permanent_entry_outlives_short_ttl_entries() {
    let store = PersistentStore::open(StoreConfig {
        ttl_secs: Some(3600),
        ..Default::default()
    })
    .unwrap();

    store
        .set(NewEntry::with_key("short", "m", "v").ttl(Duration::from_millis(30)))
        .await
        .unwrap();
    store
        .set(NewEntry::with_key("permanent", "m", "v").expiry(llmcache_core::Expiry::Never))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert!(store.get("short").await.unwrap().is_none());
    assert!(store.get("permanent").await.unwrap().is_some());
    assert_eq!(store.purge_expired().await.unwrap(), 1);
}

#[tokio::test]
async fn test_ttl_change_does_not_expire_existing_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("llm_cache.db");
    {
        let store = PersistentStore::open(StoreConfig::at_path(&path)).unwrap();
        store.set(NewEntry::with_key("k", "m", "v")).await.unwrap();
    }

    let store = PersistentStore::open(StoreConfig {
        path: Some(path),
        ttl_secs: Some(1),
        ..Default::default()
    })
    .unwrap();
    let entry = store.get("k").await.unwrap().unwrap();
    assert!(entry.expires_at.is_none());
}

#[tokio::test]
async fn test_background_size_eviction_keeps_recent_entries() {
    let store = PersistentStore::open(StoreConfig {
        max_size_bytes: Some(2_000),
        ..Default::default()
    })
    .unwrap();
    let maintenance = store.start_maintenance().unwrap();

    for i in 0..20 {
        store
            .set(NewEntry::with_key(format!("k{i:02}"), "m", vec![b'a' + (i % 26) as u8; 120]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let mut stats = store.get_stats().await.unwrap();
    for _ in 0..50 {
        if stats.size_bytes <= 2_000 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        stats = store.get_stats().await.unwrap();
    }
    assert!(stats.evictions > 0);
    assert!(stats.total_entries < 20);
    assert!(store.exists("k19").await.unwrap());
    assert!(!store.exists("k00").await.unwrap());

    maintenance.shutdown().await;
}

#[tokio::test]
async fn test_clear_is_idempotent() {
    let store = PersistentStore::in_memory().unwrap();
    for i in 0..3 {
        store
            .set(NewEntry::new("m", &format!("prompt {i}"), "v"))
            .await
            .unwrap();
    }

    store.clear().await.unwrap();
    store.clear().await.unwrap();
    assert_eq!(store.get_stats().await.unwrap().total_entries, 0);
    for i in 0..3 {
        assert!(
            store
                .get_by_prompt("m", &format!("prompt {i}"))
                .await
                .unwrap()
                .is_none()
        );
    }
}

#[tokio::test]
async fn test_health_reports_low_hit_rate_as_degraded() {
    let store = PersistentStore::in_memory().unwrap();
    store.set(NewEntry::with_key("k", "m", "v")).await.unwrap();
    store.get("k").await.unwrap();
    for i in 0..9 {
        store.get(&format!("missing-{i}")).await.unwrap();
    }

    let thresholds = HealthThresholds {
        min_requests: 10,
        ..Default::default()
    };
    let report = store.health(&thresholds).await;
    assert_eq!(report.status, HealthStatus::Degraded);
    assert!((report.hit_rate - 0.1).abs() < 1e-9);
}

#[tokio::test]
async fn test_expired_rows_counted_until_swept() {
    let store = PersistentStore::in_memory().unwrap();
    let past = Utc::now() - chrono::Duration::minutes(5);
    for i in 0..3 {
        store
            .set(NewEntry::with_key(format!("old{i}"), "m", "v").expires_at(past))
            .await
            .unwrap();
    }

    let stats = store.get_stats().await.unwrap();
    assert_eq!(stats.expired_entries, 3);
    assert_eq!(store.purge_expired().await.unwrap(), 3);

    let stats = store.get_stats().await.unwrap();
    assert_eq!(stats.total_entries, 0);
    assert_eq!(stats.expired_purged, 3);
}
