// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Streaming engine: wires the spatial index, chunk manager, asset registry,
//! scheduler and compression pipeline around one memory budget.
//!
//! `StreamingEngine` is single-threaded and `&mut self` driven. Hosts that
//! stream from several threads share it through [`SharedEngine`], which
//! serializes every mutation behind one lock so budget checks and evictions
//! cannot interleave.

use std::sync::Arc;

use crossbeam::channel::Receiver;
use glam::Vec3;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::assets::{
    AssetCategory, AssetDescriptor, AssetRecord, AssetRegistry, AssetStats, AtlasLayout,
    RegistryServices,
};
use crate::chunk::{
    ChunkId, ChunkManager, ChunkRecord, ChunkStats, ChunkStatus, CleanupReport, GridCatalog,
    WorldCatalog,
};
use crate::clock::{Clock, SystemClock};
use crate::compression::{
    Codec, CodecRegistry, CompressionPipeline, CompressionResult, CompressionStats,
    ProgressiveTiers, Quality,
};
use crate::config::StreamConfig;
use crate::error::Result;
use crate::event::{EventHub, StreamEvent, StreamObserver};
use crate::media::{MediaDecoder, RawMediaDecoder};
use crate::memory::{MemoryBudget, MemoryPressure};
use crate::scheduler::{
    LoadHandle, PendingRequest, Priority, ResourceKind, Scheduler, SchedulerStats, TickReport,
    UnloadReason, UnloadRequest,
};
use crate::source::{AssetSource, MemorySource};
use crate::spatial::{ChunkDistance, LodLevel, SpatialIndex, VisibilityChanges};

const OBSERVER_REQUESTER: &str = "observer";

/// Builder for [`StreamingEngine`]; unset collaborators get defaults
pub struct EngineBuilder {
    config: StreamConfig,
    catalog: Option<Arc<dyn WorldCatalog>>,
    source: Option<Arc<dyn AssetSource>>,
    clock: Option<Arc<dyn Clock>>,
    decoder: Option<Arc<dyn MediaDecoder>>,
    codecs: CodecRegistry,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: StreamConfig::default(),
            catalog: None,
            source: None,
            clock: None,
            decoder: None,
            codecs: CodecRegistry::with_builtin(),
        }
    }

    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_catalog(mut self, catalog: impl WorldCatalog + 'static) -> Self {
        self.catalog = Some(Arc::new(catalog));
        self
    }

    pub fn with_source(mut self, source: impl AssetSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn with_decoder(mut self, decoder: impl MediaDecoder + 'static) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// Register an extra codec; replaces a built-in one for the same format
    pub fn with_codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codecs.register(Arc::new(codec));
        self
    }

    /// Validate the configuration and assemble the engine
    pub fn build(self) -> Result<StreamingEngine> {
        let config = self.config;
        config.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));
        let decoder = self
            .decoder
            .unwrap_or_else(|| Arc::new(RawMediaDecoder));
        let source = self
            .source
            .unwrap_or_else(|| Arc::new(MemorySource::new()));
        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(GridCatalog::default()));

        let budget = Arc::new(MemoryBudget::new(&config.budget));
        let events = EventHub::new();
        let pipeline = Arc::new(CompressionPipeline::new(
            config.compression.clone(),
            self.codecs,
            decoder.clone(),
        ));

        let assets = AssetRegistry::new(
            &config.assets,
            RegistryServices {
                pipeline: pipeline.clone(),
                decoder,
                source,
                budget: budget.clone(),
                clock: clock.clone(),
                events: events.clone(),
            },
        );
        let spatial = SpatialIndex::new(&config.chunks, config.lod.clone());
        let chunks = ChunkManager::new(
            &config.chunks,
            catalog,
            assets,
            spatial,
            budget.clone(),
            clock.clone(),
            events.clone(),
        );

        debug!(
            world = %config.chunks.world_id,
            hard_budget = config.budget.hard_budget,
            "streaming engine ready"
        );

        Ok(StreamingEngine {
            config,
            chunks,
            scheduler: Scheduler::new(),
            pipeline,
            budget,
            clock,
            events,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StreamingEngine {
    config: StreamConfig,
    chunks: ChunkManager,
    scheduler: Scheduler,
    pipeline: Arc<CompressionPipeline>,
    budget: Arc<MemoryBudget>,
    clock: Arc<dyn Clock>,
    events: EventHub,
}

impl StreamingEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Engine with default collaborators
    pub fn new(config: StreamConfig) -> Result<Self> {
        EngineBuilder::new().with_config(config).build()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn chunks(&self) -> &ChunkManager {
        &self.chunks
    }

    pub fn assets(&self) -> &AssetRegistry {
        self.chunks.assets()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn spatial(&self) -> &SpatialIndex {
        self.chunks.spatial()
    }

    // ========== Observer ==========

    /// Move the observer.
    ///
    /// Grid cells within the unload distance are tracked; visibility changes
    /// are published, and visible chunks that are not resident are requested
    /// at `Normal`. Active chunks past the unload distance get a `Low`
    /// distance unload, which is withdrawn if the chunk comes back in range
    /// before it runs.
    pub fn update_observer(&mut self, position: Vec3) -> VisibilityChanges {
        let chunk_config = self.config.chunks.clone();
        let unload_distance = chunk_config.unload_distance;

        let mut changes = self.chunks.spatial_mut().update_observer(position);
        let cells = self.chunks.spatial().cells_within(unload_distance);
        for coord in cells {
            let id = ChunkId::from_coord(&chunk_config.world_id, coord, chunk_config.layered).to_string();
            if !self.chunks.spatial().is_tracked(&id) {
                self.chunks.spatial_mut().track(id, coord);
            }
        }
        let settled = self.chunks.spatial_mut().update_observer(position);
        changes.became_visible.extend(settled.became_visible);
        changes.became_hidden.extend(settled.became_hidden);
        changes.became_visible.sort();
        changes.became_hidden.sort();

        for id in &changes.became_visible {
            self.events
                .publish(StreamEvent::ChunkBecameVisible { id: id.clone() });
        }
        for id in &changes.became_hidden {
            self.events
                .publish(StreamEvent::ChunkBecameHidden { id: id.clone() });
        }

        let nearby = self.chunks.spatial().chunks_in_radius(unload_distance);
        for chunk in &nearby {
            let pending_distance_unload = matches!(
                self.scheduler.queue(ResourceKind::Chunk).get(&chunk.id),
                Some(PendingRequest::Unload(request)) if request.reason == UnloadReason::Distance
            );
            if pending_distance_unload {
                self.scheduler.cancel_unload(ResourceKind::Chunk, &chunk.id);
                debug!(chunk = %chunk.id, "distance unload withdrawn");
            }
        }

        let mut visible: Vec<&str> = nearby
            .iter()
            .map(|chunk| chunk.id.as_str())
            .filter(|id| self.chunks.spatial().is_visible(id))
            .collect();
        visible.sort_unstable();
        for id in visible {
            match self.chunks.status(id) {
                ChunkStatus::Unloaded | ChunkStatus::Cached => {
                    if let Err(err) =
                        self.chunks
                            .request_load(id, Priority::Normal, OBSERVER_REQUESTER, &mut self.scheduler)
                    {
                        warn!(chunk = %id, error = %err, "observer load request failed");
                    }
                }
                ChunkStatus::Loading | ChunkStatus::Active => {}
            }
        }

        let now = self.clock.now_ms();
        let beyond: Vec<ChunkDistance> = self
            .chunks
            .spatial()
            .chunks_in_radius(f32::INFINITY)
            .into_iter()
            .filter(|chunk| chunk.distance > unload_distance)
            .collect();
        for chunk in beyond {
            match self.chunks.status(&chunk.id) {
                ChunkStatus::Active => {
                    self.scheduler.submit_unload(
                        ResourceKind::Chunk,
                        UnloadRequest::new(chunk.id, Priority::Low, UnloadReason::Distance, now),
                    );
                }
                ChunkStatus::Loading => {
                    if self.chunks.cancel_pending(&chunk.id, &mut self.scheduler) {
                        self.chunks.spatial_mut().untrack(&chunk.id);
                    }
                }
                ChunkStatus::Unloaded => {
                    self.chunks.spatial_mut().untrack(&chunk.id);
                }
                ChunkStatus::Cached => {}
            }
        }

        changes
    }

    // ========== Chunks ==========

    pub fn request_chunk(&mut self, id: &str, priority: Priority, requester: &str) -> Result<ChunkRecord> {
        self.chunks
            .request_load(id, priority, requester, &mut self.scheduler)
    }

    pub fn request_chunk_handle(
        &mut self,
        id: &str,
        priority: Priority,
        requester: &str,
    ) -> LoadHandle<ChunkRecord> {
        self.chunks
            .request_load_handle(id, priority, requester, &mut self.scheduler)
    }

    pub fn unload_chunk(&mut self, id: &str, reason: UnloadReason) -> Result<()> {
        self.scheduler.cancel(ResourceKind::Chunk, id);
        self.chunks.request_unload(id, reason)
    }

    /// Drop a queued chunk load that has not started
    pub fn cancel_chunk(&mut self, id: &str) -> bool {
        self.chunks.cancel_pending(id, &mut self.scheduler)
    }

    pub fn cleanup(&mut self) -> CleanupReport {
        self.chunks.cleanup()
    }

    /// Periodic work: a cleanup pass when above the soft threshold, then the
    /// chunk queue, then the asset queue.
    pub fn tick(&mut self) -> TickReport {
        #[cfg(feature = "profiling")]
        let span = info_span!("engine.tick", used = self.budget.used());
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        if self.budget.is_over_soft() {
            self.chunks.cleanup();
        }
        let mut report = self.scheduler.tick(ResourceKind::Chunk, &mut self.chunks);
        report.merge(self.scheduler.tick(ResourceKind::Asset, &mut self.chunks));
        for (target, err) in &report.failed {
            debug!(target = %target, error = %err, "queued request failed");
        }
        report
    }

    pub fn chunk(&self, id: &str) -> Option<&ChunkRecord> {
        self.chunks.get(id)
    }

    pub fn chunk_status(&self, id: &str) -> ChunkStatus {
        self.chunks.status(id)
    }

    pub fn active_chunks(&self) -> Vec<&ChunkRecord> {
        self.chunks.active_chunks()
    }

    pub fn chunks_in_range(&self, radius: f32) -> Vec<ChunkDistance> {
        self.chunks.spatial().chunks_in_radius(radius)
    }

    pub fn lod_for(&self, id: &str) -> Result<&LodLevel> {
        self.chunks.lod_for(id)
    }

    // ========== Assets ==========

    pub fn declare_asset(&mut self, descriptor: AssetDescriptor) {
        self.chunks.assets_mut().declare(descriptor);
    }

    pub fn load_asset(
        &mut self,
        id: &str,
        priority: Priority,
        requester: &str,
        quality: Quality,
    ) -> Result<AssetRecord> {
        let record = self
            .chunks
            .assets_mut()
            .load_asset(id, priority, requester, quality)?;
        self.chunks.refresh_memory(id);
        Ok(record)
    }

    /// Asset request through the scheduler; `Critical` loads immediately
    pub fn request_asset(
        &mut self,
        id: &str,
        priority: Priority,
        requester: &str,
        quality: Quality,
    ) -> LoadHandle<AssetRecord> {
        let handle = self
            .chunks
            .assets_mut()
            .request(id, priority, requester, quality, &mut self.scheduler);
        if priority.is_critical() {
            self.chunks.refresh_memory(id);
        }
        handle
    }

    pub fn unload_asset(&mut self, id: &str, reason: UnloadReason) -> Result<()> {
        self.chunks.assets_mut().unload_asset(id, reason)?;
        self.chunks.refresh_memory(id);
        Ok(())
    }

    pub fn asset(&self, id: &str) -> Option<&AssetRecord> {
        self.chunks.assets().get(id)
    }

    pub fn assets_by_type(&self, category: AssetCategory) -> Vec<&AssetRecord> {
        self.chunks.assets().get_by_type(category)
    }

    pub fn assets_by_tag(&self, tag: &str) -> Vec<&AssetRecord> {
        self.chunks.assets().get_by_tag(tag)
    }

    pub fn build_atlas<I, S>(&mut self, atlas_id: &str, sprite_ids: I, surface: (u32, u32)) -> Result<AtlasLayout>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sprite_ids: Vec<String> = sprite_ids
            .into_iter()
            .map(|id| id.as_ref().to_string())
            .collect();
        let layout = self
            .chunks
            .assets_mut()
            .build_atlas(atlas_id, &sprite_ids, surface)?;
        for id in &sprite_ids {
            self.chunks.refresh_memory(id);
        }
        Ok(layout)
    }

    // ========== Compression ==========

    pub fn compress(&self, data: &[u8], quality: Quality, category: AssetCategory) -> Result<CompressionResult> {
        self.pipeline.compress(data, quality, category)
    }

    pub fn create_progressive_tiers(&self, data: &[u8], category: AssetCategory) -> ProgressiveTiers {
        self.pipeline.create_progressive_tiers(data, category)
    }

    // ========== Stats / events ==========

    pub fn chunk_stats(&self) -> ChunkStats {
        let mut stats = self.chunks.stats();
        stats.pending_loads = stats
            .pending_loads
            .max(self.scheduler.stats().pending_chunk_loads);
        stats
    }

    pub fn asset_stats(&self) -> AssetStats {
        let mut stats = self.chunks.assets().stats();
        stats.pending_requests = self.scheduler.pending(ResourceKind::Asset);
        stats
    }

    pub fn compression_stats(&self) -> CompressionStats {
        self.pipeline.stats()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    pub fn memory_used(&self) -> usize {
        self.budget.used()
    }

    pub fn pressure(&self) -> MemoryPressure {
        self.budget.pressure()
    }

    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    pub fn subscribe(&self) -> Receiver<StreamEvent> {
        self.events.subscribe()
    }

    pub fn add_observer(&self, observer: impl StreamObserver + 'static) {
        self.events.add_observer(Arc::new(observer));
    }
}

/// Thread-safe handle to a [`StreamingEngine`].
///
/// Every call takes the engine lock; handles returned by the request methods
/// are waited on without holding it.
#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<StreamingEngine>>,
}

impl SharedEngine {
    pub fn new(engine: StreamingEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, StreamingEngine> {
        self.inner.lock()
    }

    /// Run `f` with exclusive access to the engine
    pub fn with<R>(&self, f: impl FnOnce(&mut StreamingEngine) -> R) -> R {
        let mut engine = self.inner.lock();
        f(&mut engine)
    }

    pub fn update_observer(&self, position: Vec3) -> VisibilityChanges {
        self.inner.lock().update_observer(position)
    }

    pub fn request_chunk(&self, id: &str, priority: Priority, requester: &str) -> LoadHandle<ChunkRecord> {
        self.inner.lock().request_chunk_handle(id, priority, requester)
    }

    pub fn request_asset(
        &self,
        id: &str,
        priority: Priority,
        requester: &str,
        quality: Quality,
    ) -> LoadHandle<AssetRecord> {
        self.inner
            .lock()
            .request_asset(id, priority, requester, quality)
    }

    pub fn tick(&self) -> TickReport {
        self.inner.lock().tick()
    }

    pub fn chunk_stats(&self) -> ChunkStats {
        self.inner.lock().chunk_stats()
    }

    pub fn asset_stats(&self) -> AssetStats {
        self.inner.lock().asset_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkBlueprint, StaticCatalog};
    use crate::clock::ManualClock;
    use crate::event::EventLog;
    use crate::spatial::LodTable;
    use std::thread;
    use std::time::Duration;

    fn flat_world(radius: i32) -> (StaticCatalog, MemorySource) {
        let mut catalog = StaticCatalog::new();
        let source = MemorySource::new();
        for x in -radius..=radius {
            for y in -radius..=radius {
                let id = ChunkId::new("w", x, y).to_string();
                let key = format!("{id}/layout");
                source.insert(key.clone(), vec![1u8; 64]);
                catalog.insert(
                    id,
                    ChunkBlueprint::new("plains").with_asset(AssetDescriptor::new(
                        key.clone(),
                        AssetCategory::Data,
                        key,
                    )),
                );
            }
        }
        (catalog, source)
    }

    fn engine(radius: i32, config: StreamConfig) -> StreamingEngine {
        let (catalog, source) = flat_world(radius);
        StreamingEngine::builder()
            .with_config(config)
            .with_catalog(catalog)
            .with_source(source)
            .with_clock(ManualClock::new())
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let config = StreamConfig::default().with_distances(4.0, 2.0);
        assert!(StreamingEngine::new(config).is_err());
    }

    #[test]
    fn test_observer_queues_visible_chunks() {
        let config = StreamConfig::default().with_distances(1.0, 2.0);
        let mut engine = engine(4, config);
        let log = EventLog::new();
        engine.add_observer(log.clone());

        let changes = engine.update_observer(Vec3::ZERO);
        // origin plus its 4 edge neighbours
        assert_eq!(changes.became_visible.len(), 5);
        assert_eq!(log.count("chunk_became_visible"), 5);
        assert_eq!(engine.scheduler().pending(ResourceKind::Chunk), 5);
        assert_eq!(engine.chunk_status("w_0_0"), ChunkStatus::Loading);

        let report = engine.tick();
        assert_eq!(report.executed.len(), 5);
        assert_eq!(engine.active_chunks().len(), 5);
        assert_eq!(engine.chunks_in_range(0.0)[0].id, "w_0_0");
    }

    #[test]
    fn test_observer_unloads_past_unload_distance() {
        let config = StreamConfig::default().with_distances(1.0, 2.0);
        let mut engine = engine(6, config);
        engine.update_observer(Vec3::ZERO);
        engine.tick();
        assert_eq!(engine.chunk_status("w_0_0"), ChunkStatus::Active);

        // chunk_size 64: four cells east
        let changes = engine.update_observer(Vec3::new(256.0, 0.0, 0.0));
        assert!(changes.became_hidden.contains(&"w_0_0".to_string()));
        engine.tick();
        assert_eq!(engine.chunk_status("w_0_0"), ChunkStatus::Cached);
        assert_eq!(engine.chunk_status("w_4_0"), ChunkStatus::Active);
    }

    #[test]
    fn test_lod_follows_distance() {
        let config = StreamConfig::default()
            .with_distances(3.0, 5.0)
            .with_lod(LodTable::default());
        let mut engine = engine(3, config);
        engine.update_observer(Vec3::ZERO);
        assert_eq!(engine.lod_for("w_0_0").unwrap().level, 0);
        assert_eq!(engine.lod_for("w_3_0").unwrap().level, 1);
        assert!(engine.lod_for("w_40_0").is_err());
    }

    #[test]
    fn test_shared_engine_coalesces_across_threads() {
        let shared = SharedEngine::new(engine(1, StreamConfig::default()));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let shared = shared.clone();
                thread::spawn(move || shared.request_chunk("w_1_1", Priority::Normal, &format!("t{i}")))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect();

        assert_eq!(shared.lock().scheduler().pending(ResourceKind::Chunk), 1);
        shared.tick();
        for handle in &handles {
            assert!(handle.same_as(&handles[0]));
            let record = handle
                .wait_timeout(Duration::from_secs(1))
                .unwrap()
                .unwrap();
            assert_eq!(record.status, ChunkStatus::Active);
        }
        assert_eq!(shared.chunk_stats().loads, 1);
    }
}
