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

//! Chunk lifecycle manager.
//!
//! ```text
//! Unloaded -> Loading -> Active -> Cached -> Active (restore)
//!                  \                  \
//!                   -> Unloaded        -> discarded (cleanup)
//! ```
//!
//! A chunk's memory is the sum of its loaded assets. Unloading moves the
//! assets no other active chunk uses into their category caches so a restore
//! is a cache hit; cleanup discards them for good.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use tracing::{debug, info, warn};

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::assets::{AssetCategory, AssetRegistry};
use crate::chunk::{ChunkId, ChunkRecord, ChunkStats, ChunkStatus, WorldCatalog};
use crate::clock::Clock;
use crate::compression::Quality;
use crate::config::ChunkConfig;
use crate::error::{Result, StreamError};
use crate::event::{EventHub, StreamEvent};
use crate::memory::MemoryBudget;
use crate::scheduler::{
    AdmissionState, LoadHandle, LoadRequest, PendingRequest, Priority, ResourceKind, Scheduler,
    TickDriver, UnloadReason,
};
use crate::spatial::{LodLevel, SpatialIndex};

/// What one cleanup pass removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub evicted: Vec<String>,
    pub released_bytes: usize,
}

#[derive(Debug, Clone, Default)]
struct Counters {
    loads: u64,
    restores: u64,
    evictions: u64,
    failures: u64,
    total_load_time_ms: u64,
}

pub struct ChunkManager {
    config: ChunkConfig,
    records: AHashMap<String, ChunkRecord>,
    catalog: Arc<dyn WorldCatalog>,
    assets: AssetRegistry,
    spatial: SpatialIndex,
    handles: AHashMap<String, LoadHandle<ChunkRecord>>,
    in_flight: AHashSet<String>,
    budget: Arc<MemoryBudget>,
    clock: Arc<dyn Clock>,
    events: EventHub,
    counters: Counters,
}

impl ChunkManager {
    pub fn new(
        config: &ChunkConfig,
        catalog: Arc<dyn WorldCatalog>,
        assets: AssetRegistry,
        spatial: SpatialIndex,
        budget: Arc<MemoryBudget>,
        clock: Arc<dyn Clock>,
        events: EventHub,
    ) -> Self {
        Self {
            config: config.clone(),
            records: AHashMap::new(),
            catalog,
            assets,
            spatial,
            handles: AHashMap::new(),
            in_flight: AHashSet::new(),
            budget,
            clock,
            events,
            counters: Counters::default(),
        }
    }

    pub fn assets(&self) -> &AssetRegistry {
        &self.assets
    }

    pub fn assets_mut(&mut self) -> &mut AssetRegistry {
        &mut self.assets
    }

    pub fn spatial(&self) -> &SpatialIndex {
        &self.spatial
    }

    pub fn spatial_mut(&mut self) -> &mut SpatialIndex {
        &mut self.spatial
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    pub fn get(&self, id: &str) -> Option<&ChunkRecord> {
        self.records.get(id)
    }

    pub fn status(&self, id: &str) -> ChunkStatus {
        self.records
            .get(id)
            .map_or(ChunkStatus::Unloaded, |record| record.status)
    }

    /// Active chunks sorted by id
    pub fn active_chunks(&self) -> Vec<&ChunkRecord> {
        let mut active: Vec<&ChunkRecord> = self
            .records
            .values()
            .filter(|r| r.status == ChunkStatus::Active)
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    pub fn active_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.status == ChunkStatus::Active)
            .count()
    }

    pub fn lod_for(&self, id: &str) -> Result<&LodLevel> {
        self.spatial.compute_lod(id)
    }

    /// Request a chunk.
    ///
    /// - Active: touched and returned unchanged, no event.
    /// - Cached: restored to Active, `ChunkLoaded { from_cache: true }`.
    /// - Critical: loaded synchronously; returns once asset loading is done.
    /// - Otherwise: a Loading placeholder is returned and the load is queued.
    pub fn request_load(
        &mut self,
        id: &str,
        priority: Priority,
        requester: &str,
        scheduler: &mut Scheduler,
    ) -> Result<ChunkRecord> {
        let chunk_id = ChunkId::parse(id)?;
        let now = self.clock.now_ms();

        match self.status(id) {
            ChunkStatus::Active => {
                let record = self
                    .records
                    .get_mut(id)
                    .ok_or_else(|| StreamError::ChunkNotFound(id.to_string()))?;
                record.touch(now);
                return Ok(record.clone());
            }
            ChunkStatus::Cached => return self.restore(id),
            ChunkStatus::Loading | ChunkStatus::Unloaded => {}
        }

        if priority.is_critical() {
            scheduler.cancel(ResourceKind::Chunk, id);
            return self.load_critical(id, requester);
        }

        if !self.records.contains_key(id) {
            self.spatial.track(id, chunk_id.coord());
            self.records.insert(
                id.to_string(),
                ChunkRecord::placeholder(&chunk_id, self.config.chunk_size, now),
            );
            debug!(chunk = id, ?priority, requester, "chunk queued");
        }
        scheduler.submit_load(ResourceKind::Chunk, LoadRequest::new(id, priority, requester, now));
        self.handles
            .entry(id.to_string())
            .or_insert_with(LoadHandle::new);

        self.records
            .get(id)
            .cloned()
            .ok_or_else(|| StreamError::ChunkNotFound(id.to_string()))
    }

    /// Like [`request_load`](Self::request_load) but returns a handle that
    /// resolves when the chunk is Active. Callers requesting the same pending
    /// chunk share one handle.
    pub fn request_load_handle(
        &mut self,
        id: &str,
        priority: Priority,
        requester: &str,
        scheduler: &mut Scheduler,
    ) -> LoadHandle<ChunkRecord> {
        let pending = self.handles.get(id).map(LoadHandle::attach);
        match self.request_load(id, priority, requester, scheduler) {
            Ok(record) if record.status == ChunkStatus::Loading => {
                match (pending, self.handles.get(id)) {
                    (Some(handle), _) => handle,
                    (None, Some(handle)) => handle.clone(),
                    (None, None) => LoadHandle::ready(record),
                }
            }
            Ok(record) => {
                if let Some(handle) = &pending {
                    handle.complete(record.clone());
                }
                pending.unwrap_or_else(|| LoadHandle::ready(record))
            }
            Err(err) => match pending {
                Some(handle) if handle.is_finished() => handle,
                _ => LoadHandle::failed(err),
            },
        }
    }

    fn load_critical(&mut self, id: &str, requester: &str) -> Result<ChunkRecord> {
        if self.budget.is_over_soft() {
            self.cleanup();
        }
        let outcome = self.execute_load(id, requester, None);
        if self.budget.is_over_hard() {
            self.cleanup();
        }
        outcome
    }

    /// Load a chunk now: resolve its blueprint, load every referenced asset
    /// and activate it. Partial asset failure activates the chunk tagged
    /// `degraded`; only a catalog failure fails the load.
    pub fn execute_load(
        &mut self,
        id: &str,
        requester: &str,
        quality: Option<Quality>,
    ) -> Result<ChunkRecord> {
        #[cfg(feature = "profiling")]
        let span = info_span!("chunks.load", chunk = id);
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        match self.status(id) {
            ChunkStatus::Active => {
                let record = self.records.get(id).cloned();
                return record.ok_or_else(|| StreamError::ChunkNotFound(id.to_string()));
            }
            ChunkStatus::Cached => return self.restore(id),
            ChunkStatus::Loading | ChunkStatus::Unloaded => {}
        }
        if self.in_flight.contains(id) {
            return Err(StreamError::InvalidState(format!(
                "chunk {id} is already loading"
            )));
        }

        let chunk_id = ChunkId::parse(id)?;
        let started = self.clock.now_ms();
        self.spatial.track(id, chunk_id.coord());
        let lod = *self.spatial.compute_lod(id)?;
        let quality = quality.unwrap_or(lod.quality);
        self.in_flight.insert(id.to_string());
        let mut record = self
            .records
            .remove(id)
            .unwrap_or_else(|| ChunkRecord::placeholder(&chunk_id, self.config.chunk_size, started));
        record.status = ChunkStatus::Loading;

        let blueprint = match self.catalog.blueprint(&chunk_id) {
            Ok(blueprint) => blueprint,
            Err(err) => {
                self.in_flight.remove(id);
                self.counters.failures += 1;
                warn!(chunk = id, error = %err, "chunk load failed");
                self.events.publish(StreamEvent::ChunkLoadFailed {
                    id: id.to_string(),
                    error: err.to_string(),
                });
                if let Some(handle) = self.handles.remove(id) {
                    handle.fail(err.clone());
                }
                return Err(err);
            }
        };

        let priority = Priority::High;

        let mut grouped: BTreeMap<AssetCategory, SmallVec<[String; 4]>> = BTreeMap::new();
        let mut failed = Vec::new();
        for descriptor in blueprint.assets {
            let asset_id = descriptor.id.clone();
            grouped
                .entry(descriptor.category)
                .or_default()
                .push(asset_id.clone());
            self.assets.declare(descriptor);
            if let Err(err) = self.assets.load_asset(&asset_id, priority, requester, quality) {
                debug!(chunk = id, asset = %asset_id, error = %err, "chunk asset failed");
                failed.push(asset_id);
            }
        }

        let finished = self.clock.now_ms();
        record.assets = grouped;
        record.entities = blueprint.entities;
        record.metadata.biome = blueprint.biome;
        record.metadata.difficulty = blueprint.difficulty;
        record.metadata.tags = blueprint.tags;
        if !failed.is_empty() {
            warn!(chunk = id, failed = failed.len(), "chunk activated degraded");
        }
        record.metadata.set_degraded(failed);
        record.lod_level = lod.level;
        record.quality = quality;
        record.status = ChunkStatus::Active;
        record.load_time_ms = finished.saturating_sub(started);
        record.touch(finished);
        record.memory_usage = self.loaded_bytes(&record);

        self.counters.loads += 1;
        self.counters.total_load_time_ms += record.load_time_ms;
        self.in_flight.remove(id);
        debug!(chunk = id, bytes = record.memory_usage, lod = lod.level, "chunk active");

        self.records.insert(id.to_string(), record.clone());
        self.events.publish(StreamEvent::ChunkLoaded {
            id: id.to_string(),
            from_cache: false,
            load_time_ms: record.load_time_ms,
        });
        if let Some(handle) = self.handles.remove(id) {
            handle.complete(record.clone());
        }
        Ok(record)
    }

    /// Promote a Cached chunk back to Active. Its assets come back from the
    /// category caches; any evicted meanwhile are reloaded.
    fn restore(&mut self, id: &str) -> Result<ChunkRecord> {
        let mut record = self
            .records
            .remove(id)
            .ok_or_else(|| StreamError::ChunkNotFound(id.to_string()))?;
        let started = self.clock.now_ms();

        let mut failed = Vec::new();
        let asset_ids: Vec<String> = record.asset_ids().cloned().collect();
        for asset_id in asset_ids {
            if let Err(err) = self
                .assets
                .load_asset(&asset_id, Priority::High, "restore", record.quality)
            {
                debug!(chunk = id, asset = %asset_id, error = %err, "asset missing on restore");
                failed.push(asset_id);
            }
        }

        let finished = self.clock.now_ms();
        record.metadata.set_degraded(failed);
        record.status = ChunkStatus::Active;
        record.touch(finished);
        record.memory_usage = self.loaded_bytes(&record);
        self.counters.restores += 1;
        debug!(chunk = id, bytes = record.memory_usage, "chunk restored from cache");

        self.records.insert(id.to_string(), record.clone());
        self.events.publish(StreamEvent::ChunkLoaded {
            id: id.to_string(),
            from_cache: true,
            load_time_ms: finished.saturating_sub(started),
        });
        if let Some(handle) = self.handles.remove(id) {
            handle.complete(record.clone());
        }
        Ok(record)
    }

    /// Move an Active chunk to Cached, keeping its record for restore
    pub fn request_unload(&mut self, id: &str, reason: UnloadReason) -> Result<()> {
        let status = self
            .records
            .get(id)
            .map(|r| r.status)
            .ok_or_else(|| StreamError::ChunkNotFound(id.to_string()))?;
        if status != ChunkStatus::Active {
            return Err(StreamError::InvalidState(format!(
                "chunk {id} is {status:?}, only Active chunks unload"
            )));
        }

        let shared = self.assets_held_by_others(id, |s| s == ChunkStatus::Active);
        let asset_ids: Vec<String> = self
            .records
            .get(id)
            .map(|r| r.asset_ids().cloned().collect())
            .unwrap_or_default();
        for asset_id in asset_ids {
            if shared.contains(&asset_id) || !self.assets.is_active(&asset_id) {
                continue;
            }
            if let Err(err) = self.assets.unload_asset(&asset_id, reason) {
                debug!(chunk = id, asset = %asset_id, error = %err, "asset unload skipped");
            }
        }

        if let Some(record) = self.records.get_mut(id) {
            record.status = ChunkStatus::Cached;
        }
        debug!(chunk = id, ?reason, "chunk cached");
        self.events.publish(StreamEvent::ChunkUnloaded {
            id: id.to_string(),
            reason,
        });
        Ok(())
    }

    /// Drop a queued load that has not started. The placeholder is removed
    /// and waiters are failed.
    pub fn cancel_pending(&mut self, id: &str, scheduler: &mut Scheduler) -> bool {
        if self.status(id) != ChunkStatus::Loading || self.in_flight.contains(id) {
            return false;
        }
        scheduler.cancel(ResourceKind::Chunk, id);
        self.records.remove(id);
        if let Some(handle) = self.handles.remove(id) {
            handle.fail(StreamError::InvalidState(format!("load of {id} was cancelled")));
        }
        debug!(chunk = id, "queued chunk load cancelled");
        true
    }

    /// Evict the least recently used fraction of Cached chunks, discarding
    /// assets no remaining chunk references. Active and Loading chunks are
    /// never touched. If memory is still above the soft threshold, cached
    /// assets referenced by no chunk are shed as well.
    pub fn cleanup(&mut self) -> CleanupReport {
        let mut candidates: Vec<(u64, usize, String)> = self
            .records
            .values()
            .filter(|r| r.status == ChunkStatus::Cached)
            .map(|r| (r.last_accessed, r.memory_usage, r.id.clone()))
            .collect();
        candidates.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        let quota = (candidates.len() as f64 * self.config.cleanup_fraction).ceil() as usize;
        let mut report = CleanupReport::default();

        for (_, _, id) in candidates.into_iter().take(quota) {
            let Some(record) = self.records.remove(&id) else {
                continue;
            };
            let kept = self.assets_held_by_others(&id, |s| s != ChunkStatus::Unloaded);
            for asset_id in record.asset_ids() {
                if !kept.contains(asset_id) {
                    report.released_bytes += self.assets.discard(asset_id);
                }
            }
            self.spatial.untrack(&id);
            self.counters.evictions += 1;
            debug!(chunk = %id, "chunk evicted");
            report.evicted.push(id);
        }

        let excess = self.budget.excess_over_soft();
        if excess > 0 {
            let referenced: AHashSet<String> = self
                .records
                .values()
                .flat_map(|r| r.asset_ids().cloned())
                .collect();
            report.released_bytes += self.assets.shed_cache(excess, &referenced);
        }

        info!(
            evicted = report.evicted.len(),
            released = report.released_bytes,
            used = self.budget.used(),
            "cleanup pass"
        );
        report
    }

    /// Recompute the memory of Active chunks that reference `asset_id`
    pub fn refresh_memory(&mut self, asset_id: &str) {
        let ids: Vec<String> = self
            .records
            .values()
            .filter(|r| r.status == ChunkStatus::Active && r.references(asset_id))
            .map(|r| r.id.clone())
            .collect();
        for id in ids {
            if let Some(mut record) = self.records.remove(&id) {
                record.memory_usage = self.loaded_bytes(&record);
                self.records.insert(id, record);
            }
        }
    }

    fn loaded_bytes(&self, record: &ChunkRecord) -> usize {
        record
            .asset_ids()
            .filter(|id| self.assets.is_active(id))
            .map(|id| self.assets.resident_bytes(id))
            .sum()
    }

    /// Assets referenced by chunks other than `id` whose status matches
    fn assets_held_by_others(&self, id: &str, holds: impl Fn(ChunkStatus) -> bool) -> AHashSet<String> {
        self.records
            .values()
            .filter(|r| r.id != id && holds(r.status))
            .flat_map(|r| r.asset_ids().cloned())
            .collect()
    }

    pub fn stats(&self) -> ChunkStats {
        let mut stats = ChunkStats {
            total: self.records.len(),
            loads: self.counters.loads,
            cache_restores: self.counters.restores,
            evictions: self.counters.evictions,
            failures: self.counters.failures,
            pending_loads: self.handles.len(),
            ..Default::default()
        };
        for record in self.records.values() {
            match record.status {
                ChunkStatus::Active => {
                    stats.active += 1;
                    stats.total_memory += record.memory_usage;
                }
                ChunkStatus::Cached => stats.cached += 1,
                ChunkStatus::Loading => stats.loading += 1,
                ChunkStatus::Unloaded => {}
            }
            if record.metadata.is_degraded() {
                stats.degraded += 1;
            }
        }
        stats.average_load_time_ms = if self.counters.loads == 0 {
            0.0
        } else {
            self.counters.total_load_time_ms as f64 / self.counters.loads as f64
        };
        stats
    }
}

impl AdmissionState for ChunkManager {
    fn is_in_flight(&self, kind: ResourceKind, target: &str) -> bool {
        match kind {
            ResourceKind::Chunk => self.in_flight.contains(target),
            ResourceKind::Asset => self.assets.is_in_flight(target),
        }
    }

    fn memory_over_soft(&self) -> bool {
        self.budget.is_over_soft()
    }

    fn active_count(&self, kind: ResourceKind) -> usize {
        match kind {
            ResourceKind::Chunk => self.active_count() + self.in_flight.len(),
            ResourceKind::Asset => self.assets.active_count(),
        }
    }

    fn active_ceiling(&self, kind: ResourceKind) -> usize {
        match kind {
            ResourceKind::Chunk => self.config.max_active_chunks,
            ResourceKind::Asset => self.assets.active_ceiling(),
        }
    }
}

impl TickDriver for ChunkManager {
    fn evict(&mut self, _kind: ResourceKind) {
        self.cleanup();
    }

    fn execute(&mut self, kind: ResourceKind, request: PendingRequest) -> Result<()> {
        match (kind, request) {
            (ResourceKind::Chunk, PendingRequest::Load(load)) => self
                .execute_load(&load.target, &load.requester, load.quality)
                .map(|_| ()),
            (ResourceKind::Chunk, PendingRequest::Unload(unload)) => {
                self.request_unload(&unload.target, unload.reason)
            }
            (ResourceKind::Asset, request) => {
                let target = request.target().to_string();
                let loaded = !request.is_unload();
                let outcome = self.assets.execute(request);
                if loaded && outcome.is_ok() {
                    self.refresh_memory(&target);
                }
                outcome
            }
        }
    }
}
