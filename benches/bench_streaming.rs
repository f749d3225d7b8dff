use archetype_stream::assets::{AssetCategory, AssetRecord, AssetStatus, CategoryCache};
use archetype_stream::chunk::{ChunkBlueprint, ChunkId, StaticCatalog};
use archetype_stream::compression::Quality;
use archetype_stream::media::MediaMetadata;
use archetype_stream::prelude::*;
use archetype_stream::scheduler::{LoadRequest, PendingRequest, RequestQueue};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use smallvec::SmallVec;

fn record(id: usize, bytes: usize, now: u64) -> AssetRecord {
    AssetRecord {
        id: format!("tex/{id}"),
        category: AssetCategory::Texture,
        source_key: format!("tex/{id}"),
        declared_size: bytes,
        quality: Quality::High,
        status: AssetStatus::Loaded,
        last_accessed: now,
        access_count: 1,
        memory_usage: bytes,
        dependencies: SmallVec::new(),
        tags: SmallVec::new(),
        metadata: MediaMetadata::default(),
        compression: None,
        load_time_ms: 0,
    }
}

fn bench_scheduler_ordering(c: &mut Criterion) {
    let priorities = [Priority::Low, Priority::Normal, Priority::High, Priority::Critical];

    c.bench_function("scheduler_push_pop_1k", |b| {
        b.iter_batched(
            RequestQueue::new,
            |mut queue| {
                for i in 0..1_000u64 {
                    let priority = priorities[(i % 4) as usize];
                    queue.push(PendingRequest::Load(LoadRequest::new(
                        format!("w_{i}_0"),
                        priority,
                        "bench",
                        i,
                    )));
                }
                while let Some(request) = queue.pop() {
                    black_box(request);
                }
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_cache_eviction(c: &mut Criterion) {
    c.bench_function("category_cache_insert_with_eviction", |b| {
        // room for ten records; every insert past that trims to eight
        let mut cache = CategoryCache::new(AssetCategory::Texture, 1_000, 0.8);
        let mut id = 0;

        b.iter(|| {
            let evicted = cache.insert(black_box(record(id, 100, id as u64)));
            black_box(evicted);
            id += 1;
        });
    });
}

fn bench_chunk_churn(c: &mut Criterion) {
    let mut catalog = StaticCatalog::new();
    let source = MemorySource::new();
    for x in 0..32 {
        let id = ChunkId::new("w", x, 0).to_string();
        let key = format!("{id}/layout");
        source.insert(key.clone(), vec![7u8; 1024]);
        catalog.insert(
            id,
            ChunkBlueprint::new("plains").with_asset(AssetDescriptor::new(
                key.clone(),
                AssetCategory::Data,
                key,
            )),
        );
    }

    let mut engine = StreamingEngine::builder()
        .with_catalog(catalog)
        .with_source(source)
        .with_clock(ManualClock::new())
        .build()
        .unwrap();

    c.bench_function("chunk_load_unload_churn_32", |b| {
        b.iter(|| {
            for x in 0..32 {
                let id = format!("w_{x}_0");
                engine.request_chunk(&id, Priority::Critical, "bench").unwrap();
            }
            for x in 0..32 {
                let id = format!("w_{x}_0");
                engine.unload_chunk(&id, UnloadReason::Distance).unwrap();
            }
            black_box(engine.cleanup());
        });
    });
}

criterion_group!(
    benches,
    bench_scheduler_ordering,
    bench_cache_eviction,
    bench_chunk_churn
);
criterion_main!(benches);
