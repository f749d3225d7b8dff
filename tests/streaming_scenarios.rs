mod common;

use archetype_stream::prelude::*;
use archetype_stream::scheduler::ResourceKind;
use common::World;

fn chunk_loaded(events: &[StreamEvent], target: &str) -> Vec<bool> {
    events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::ChunkLoaded { id, from_cache, .. } if id == target => Some(*from_cache),
            _ => None,
        })
        .collect()
}

#[test]
fn test_critical_load_activates_fresh_chunk() {
    let mut harness = World::new().full_chunk("w_0_0").build(StreamConfig::default());
    let engine = &mut harness.engine;
    assert_eq!(engine.chunk_status("w_0_0"), ChunkStatus::Unloaded);

    let record = engine
        .request_chunk("w_0_0", Priority::Critical, "test")
        .unwrap();
    assert_eq!(record.status, ChunkStatus::Active);
    assert!(record.memory_usage > 0);
    assert_eq!(engine.chunk_status("w_0_0"), ChunkStatus::Active);
    assert_eq!(chunk_loaded(&harness.log.events(), "w_0_0"), vec![false]);
    assert_eq!(harness.log.count("chunk_loaded"), 1);
}

#[test]
fn test_normal_load_passes_through_loading() {
    let mut harness = World::new().data_chunk("w_1_0", 32).build(StreamConfig::default());
    let engine = &mut harness.engine;

    let placeholder = engine.request_chunk("w_1_0", Priority::Normal, "test").unwrap();
    assert_eq!(placeholder.status, ChunkStatus::Loading);
    assert_eq!(placeholder.memory_usage, 0);
    assert_eq!(harness.log.count("chunk_loaded"), 0);

    engine.tick();
    assert_eq!(engine.chunk_status("w_1_0"), ChunkStatus::Active);
    assert_eq!(engine.chunk("w_1_0").unwrap().memory_usage, 32);
}

#[test]
fn test_over_budget_requests_wait_for_cleanup() {
    let mut world = World::new().data_chunk("w_9_9", 9_000);
    for x in 0..5 {
        world = world.data_chunk(&format!("w_{x}_0"), 100);
    }
    let mut harness = world.build(StreamConfig::default().with_hard_budget(10_000));

    harness
        .engine
        .request_chunk("w_9_9", Priority::Critical, "test")
        .unwrap();
    assert!(harness.engine.budget().is_over_soft());

    let requests = [
        ("w_0_0", Priority::Normal),
        ("w_1_0", Priority::High),
        ("w_2_0", Priority::Normal),
        ("w_3_0", Priority::Low),
        ("w_4_0", Priority::High),
    ];
    for (id, priority) in requests {
        harness.clock.advance(1);
        let record = harness.engine.request_chunk(id, priority, "test").unwrap();
        assert_eq!(record.status, ChunkStatus::Loading);
    }

    let report = harness.engine.tick();
    assert!(report.executed.is_empty());
    assert_eq!(report.deferred, 5);
    assert_eq!(harness.engine.scheduler().pending(ResourceKind::Chunk), 5);

    harness
        .engine
        .unload_chunk("w_9_9", UnloadReason::Memory)
        .unwrap();
    let cleanup = harness.engine.cleanup();
    assert_eq!(cleanup.evicted, vec!["w_9_9".to_string()]);
    assert_eq!(cleanup.released_bytes, 9_000);
    assert!(!harness.engine.budget().is_over_soft());

    let report = harness.engine.tick();
    assert_eq!(
        report.executed,
        vec!["w_1_0", "w_4_0", "w_0_0", "w_2_0", "w_3_0"]
    );
    assert_eq!(harness.engine.active_chunks().len(), 5);
    assert_eq!(harness.engine.memory_used(), 500);
}

#[test]
fn test_decode_failure_degrades_chunk() {
    let mut harness = World::new().full_chunk("w_0_0").build(StreamConfig::default());
    harness.source.insert("w_0_0/terrain", vec![1u8, 2, 3]);

    let record = harness
        .engine
        .request_chunk("w_0_0", Priority::Critical, "test")
        .unwrap();
    assert_eq!(record.status, ChunkStatus::Active);
    assert!(record.metadata.tags.iter().any(|t| t == "degraded"));
    assert_eq!(record.metadata.failed_assets, vec!["w_0_0/terrain".to_string()]);
    assert_eq!(harness.log.count("asset_load_failed"), 1);
    // 100 mono samples decode to f32, plus the 50 byte layout
    assert_eq!(record.memory_usage, 450);
    assert_eq!(harness.engine.chunk_stats().degraded, 1);
}

#[test]
fn test_unload_then_request_restores_from_cache() {
    let mut harness = World::new().full_chunk("w_0_0").build(StreamConfig::default());
    let loaded = harness
        .engine
        .request_chunk("w_0_0", Priority::Critical, "test")
        .unwrap();
    let fetches = harness.source.fetch_count();
    let used = harness.engine.memory_used();
    assert_eq!(fetches, 3);

    harness
        .engine
        .unload_chunk("w_0_0", UnloadReason::Manual)
        .unwrap();
    assert_eq!(harness.engine.chunk_status("w_0_0"), ChunkStatus::Cached);
    assert!(harness.log.events().iter().any(|event| matches!(
        event,
        StreamEvent::ChunkUnloaded { id, reason: UnloadReason::Manual } if id == "w_0_0"
    )));
    assert!(harness.engine.assets().get("w_0_0/terrain").is_none());

    let restored = harness
        .engine
        .request_chunk("w_0_0", Priority::Normal, "test")
        .unwrap();
    assert_eq!(restored.status, ChunkStatus::Active);
    assert_eq!(restored.memory_usage, loaded.memory_usage);
    assert_eq!(harness.source.fetch_count(), fetches);
    assert_eq!(harness.engine.memory_used(), used);
    assert_eq!(harness.engine.asset_stats().cache_hits, 3);
    assert_eq!(chunk_loaded(&harness.log.events(), "w_0_0"), vec![false, true]);
}

#[test]
fn test_unloading_inactive_chunk_is_an_error() {
    let mut harness = World::new().data_chunk("w_0_0", 10).build(StreamConfig::default());
    assert!(matches!(
        harness.engine.unload_chunk("w_0_0", UnloadReason::Manual),
        Err(StreamError::ChunkNotFound(_))
    ));
    assert!(matches!(
        harness.engine.request_chunk("not-a-chunk", Priority::Normal, "test"),
        Err(StreamError::InvalidChunkId(_))
    ));
}

#[test]
fn test_cleanup_never_evicts_active_chunks() {
    let mut world = World::new();
    for x in 0..6 {
        world = world.data_chunk(&format!("w_{x}_0"), 200);
    }
    let mut harness = world.build(StreamConfig::default().with_cleanup_fraction(0.5));

    for x in 0..6 {
        harness.clock.advance(5);
        harness
            .engine
            .request_chunk(&format!("w_{x}_0"), Priority::Critical, "test")
            .unwrap();
    }
    for x in 0..4 {
        harness
            .engine
            .unload_chunk(&format!("w_{x}_0"), UnloadReason::Distance)
            .unwrap();
    }

    let first = harness.engine.cleanup();
    assert_eq!(first.evicted, vec!["w_0_0".to_string(), "w_1_0".to_string()]);
    for _ in 0..3 {
        harness.engine.cleanup();
        assert_eq!(harness.engine.active_chunks().len(), 2);
    }
    let stats = harness.engine.chunk_stats();
    assert_eq!(stats.cached, 0);
    assert_eq!(stats.active, 2);
    assert_eq!(stats.evictions, 4);
    assert_eq!(harness.engine.memory_used(), 400);
}

#[test]
fn test_duplicate_requests_share_one_load() {
    let mut harness = World::new().data_chunk("w_3_3", 64).build(StreamConfig::default());
    let first = harness
        .engine
        .request_chunk_handle("w_3_3", Priority::Low, "a");
    let second = harness
        .engine
        .request_chunk_handle("w_3_3", Priority::High, "b");
    assert!(first.same_as(&second));
    assert_eq!(
        harness
            .engine
            .scheduler()
            .queue(ResourceKind::Chunk)
            .priority_of("w_3_3"),
        Some(Priority::High)
    );

    harness.engine.tick();
    let a = first.poll().unwrap().unwrap();
    let b = second.poll().unwrap().unwrap();
    assert_eq!(a, b);
    assert_eq!(harness.engine.chunk_stats().loads, 1);
    assert_eq!(harness.source.fetch_count(), 1);
}

#[test]
fn test_subscribers_receive_lifecycle_events() {
    let mut harness = World::new().data_chunk("w_0_0", 16).build(StreamConfig::default());
    let events = harness.engine.subscribe();

    harness
        .engine
        .request_chunk("w_0_0", Priority::Critical, "test")
        .unwrap();
    harness
        .engine
        .unload_chunk("w_0_0", UnloadReason::Manual)
        .unwrap();

    let names: Vec<&str> = events.try_iter().map(|event| event.name()).collect();
    assert_eq!(
        names,
        vec![
            "compression_completed",
            "asset_loaded",
            "chunk_loaded",
            "asset_unloaded",
            "chunk_unloaded"
        ]
    );
}

#[test]
fn test_observer_return_withdraws_distance_unload() {
    let mut world = World::new();
    for x in -6..=6 {
        for y in -6..=6 {
            world = world.data_chunk(&format!("w_{x}_{y}"), 8);
        }
    }
    let mut harness = world.build(StreamConfig::default().with_distances(1.0, 2.0));
    let engine = &mut harness.engine;

    engine.update_observer(Vec3::ZERO);
    engine.tick();
    assert_eq!(engine.chunk_status("w_0_0"), ChunkStatus::Active);

    // chunk_size 64: four cells east, past the unload distance
    engine.update_observer(Vec3::new(256.0, 0.0, 0.0));
    assert!(engine.scheduler().is_pending(ResourceKind::Chunk, "w_0_0"));

    engine.update_observer(Vec3::ZERO);
    assert!(!engine.scheduler().is_pending(ResourceKind::Chunk, "w_0_0"));
    engine.tick();
    engine.update_observer(Vec3::ZERO);
    engine.tick();

    assert!(engine.spatial().is_visible("w_0_0"));
    assert_eq!(engine.chunk_status("w_0_0"), ChunkStatus::Active);
    assert_eq!(engine.chunk_stats().cached, 0);
}

#[test]
fn test_loads_crossing_soft_limit_evict_within_one_tick() {
    let mut world = World::new();
    for id in ["w_5_5", "w_6_6", "w_7_7"] {
        world = world.data_chunk(id, 250);
    }
    for x in 0..4 {
        world = world.data_chunk(&format!("w_{x}_0"), 200);
    }
    let mut harness = world.build(StreamConfig::default().with_hard_budget(1_000));

    for id in ["w_5_5", "w_6_6", "w_7_7"] {
        harness.clock.advance(1);
        harness
            .engine
            .request_chunk(id, Priority::Critical, "test")
            .unwrap();
        harness
            .engine
            .unload_chunk(id, UnloadReason::Distance)
            .unwrap();
    }
    assert_eq!(harness.engine.memory_used(), 750);
    assert!(!harness.engine.budget().is_over_soft());

    for x in 0..4 {
        harness.clock.advance(1);
        harness
            .engine
            .request_chunk(&format!("w_{x}_0"), Priority::Normal, "test")
            .unwrap();
    }

    let report = harness.engine.tick();
    assert_eq!(report.executed.len(), 4);
    assert_eq!(report.deferred, 0);
    assert_eq!(report.evictions, 3);
    assert!(harness.engine.memory_used() <= 1_000);
    assert_eq!(harness.engine.memory_used(), 800);
    assert_eq!(harness.engine.chunk_stats().cached, 0);
}
