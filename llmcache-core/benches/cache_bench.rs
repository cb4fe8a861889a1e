//! Cache Benchmarks
//!
//! LFU index operations and payload compression on typical LLM responses

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use llmcache_core::cache::FrequencyIndex;
use llmcache_core::compression::{CompressionCodec, CompressionConfig, Compressor};
use std::hint::black_box;

/// Chat-completion style JSON payload of roughly `size` bytes
fn response_payload(size: usize) -> Vec<u8> {
    let chunk = serde_json::to_string(&serde_json::json!({
        "role": "assistant",
        "content": "Ownership in Rust means every value has a single owner at a time.",
        "finish_reason": "stop",
        "usage": {"prompt_tokens": 41, "completion_tokens": 17}
    }))
    .unwrap();
    chunk.as_bytes().repeat(size / chunk.len() + 1)[..size].to_vec()
}

fn bench_lfu_touch(c: &mut Criterion) {
    let mut group = c.benchmark_group("lfu_touch");

    for capacity in [100, 1_000, 10_000] {
        let keys: Vec<String> = (0..capacity * 2).map(|i| format!("key-{i}")).collect();
        group.throughput(Throughput::Elements(keys.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &cap| {
            b.iter(|| {
                let mut index = FrequencyIndex::new(cap);
                for (i, key) in keys.iter().enumerate() {
                    // Skewed access: low keys are touched far more often
                    let hot = &keys[i % 16];
                    black_box(index.touch(hot));
                    black_box(index.touch(key));
                }
            });
        });
    }

    group.finish();
}

fn bench_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("compress_response");

    for codec in [CompressionCodec::Gzip, CompressionCodec::Zstd, CompressionCodec::Lz4] {
        let level = if codec == CompressionCodec::Zstd { 3 } else { 6 };
        let compressor = Compressor::new(CompressionConfig {
            codec,
            level,
            ..Default::default()
        });
        for size in [1024, 16 * 1024] {
            let data = response_payload(size);
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(
                BenchmarkId::new(codec.as_str(), size),
                &data,
                |b, data| b.iter(|| black_box(compressor.maybe_compress(data).unwrap())),
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_lfu_touch, bench_compression);
criterion_main!(benches);
