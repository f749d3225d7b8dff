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

//! Asset registry: active store, per-category caches and the load path.
//!
//! An asset id lives in at most one place at a time: the active store or the
//! cache of its category. Every resident byte (active or cached) is recorded
//! in the shared [`MemoryBudget`]; bytes are released only when a record is
//! evicted from its cache or discarded.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::assets::{
    AssetCategory, AssetDescriptor, AssetRecord, AssetStatus, CacheStats, CategoryCache,
};
use crate::clock::Clock;
use crate::compression::{CompressionPipeline, Quality};
use crate::config::AssetConfig;
use crate::error::{Result, StreamError};
use crate::event::{EventHub, StreamEvent};
use crate::media::MediaDecoder;
use crate::memory::MemoryBudget;
use crate::scheduler::{
    LoadHandle, LoadRequest, PendingRequest, Priority, ResourceKind, Scheduler, UnloadReason,
};
use crate::source::AssetSource;

/// Snapshot of the registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetStats {
    pub active_count: usize,
    pub cached_count: usize,
    pub failed_count: usize,
    pub pending_requests: usize,
    pub active_memory: usize,
    pub cached_memory: usize,
    pub total_memory: usize,
    pub loads: u64,
    pub failures: u64,
    pub average_load_time_ms: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// `hits / (hits + misses)`, 0.0 before any lookup
    pub cache_hit_rate: f64,
    pub cache_bytes: BTreeMap<AssetCategory, usize>,
    pub cache_evictions: u64,
}

#[derive(Debug, Clone, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    loads: u64,
    failures: u64,
    total_load_time_ms: u64,
    discarded: u64,
}

/// Shared services the registry is built from
pub struct RegistryServices {
    pub pipeline: Arc<CompressionPipeline>,
    pub decoder: Arc<dyn MediaDecoder>,
    pub source: Arc<dyn AssetSource>,
    pub budget: Arc<MemoryBudget>,
    pub clock: Arc<dyn Clock>,
    pub events: EventHub,
}

pub struct AssetRegistry {
    config: AssetConfig,
    descriptors: AHashMap<String, AssetDescriptor>,
    active: AHashMap<String, AssetRecord>,
    caches: Vec<CategoryCache>,
    failed: AHashMap<String, StreamError>,
    loading: AHashSet<String>,
    handles: AHashMap<String, LoadHandle<AssetRecord>>,
    pipeline: Arc<CompressionPipeline>,
    decoder: Arc<dyn MediaDecoder>,
    source: Arc<dyn AssetSource>,
    budget: Arc<MemoryBudget>,
    clock: Arc<dyn Clock>,
    events: EventHub,
    counters: Counters,
}

impl AssetRegistry {
    pub fn new(config: &AssetConfig, services: RegistryServices) -> Self {
        let per_category = config.per_category_budget();
        let caches = AssetCategory::ALL
            .iter()
            .map(|category| CategoryCache::new(*category, per_category, config.cache_trim_ratio))
            .collect();
        Self {
            config: config.clone(),
            descriptors: AHashMap::new(),
            active: AHashMap::new(),
            caches,
            failed: AHashMap::new(),
            loading: AHashSet::new(),
            handles: AHashMap::new(),
            pipeline: services.pipeline,
            decoder: services.decoder,
            source: services.source,
            budget: services.budget,
            clock: services.clock,
            events: services.events,
            counters: Counters::default(),
        }
    }

    /// Register (or replace) the description of an asset
    pub fn declare(&mut self, descriptor: AssetDescriptor) {
        self.descriptors.insert(descriptor.id.clone(), descriptor);
    }

    pub fn descriptor(&self, id: &str) -> Option<&AssetDescriptor> {
        self.descriptors.get(id)
    }

    pub fn pipeline(&self) -> &Arc<CompressionPipeline> {
        &self.pipeline
    }

    pub fn status(&self, id: &str) -> AssetStatus {
        if let Some(record) = self.active.get(id) {
            record.status
        } else if self.loading.contains(id) {
            AssetStatus::Loading
        } else if self.cache(self.category_of(id)).is_some_and(|c| c.contains(id)) {
            AssetStatus::Cached
        } else if self.failed.contains_key(id) {
            AssetStatus::Failed
        } else {
            AssetStatus::NotLoaded
        }
    }

    fn category_of(&self, id: &str) -> Option<AssetCategory> {
        self.descriptors.get(id).map(|d| d.category)
    }

    fn cache(&self, category: Option<AssetCategory>) -> Option<&CategoryCache> {
        category.map(|c| &self.caches[c.index()])
    }

    /// Load an asset into the active store.
    ///
    /// Active hits are touched and returned. Cached records are promoted
    /// without touching the source or the compression pipeline. Misses fetch,
    /// decode and (for compressible categories) compress at `quality`.
    /// Memory usage is the decoded footprint.
    pub fn load_asset(
        &mut self,
        id: &str,
        priority: Priority,
        requester: &str,
        quality: Quality,
    ) -> Result<AssetRecord> {
        let now = self.clock.now_ms();

        if let Some(record) = self.active.get_mut(id) {
            record.touch(now);
            return Ok(record.clone());
        }

        let descriptor = self
            .descriptors
            .get(id)
            .cloned()
            .ok_or_else(|| StreamError::AssetNotFound(id.to_string()))?;

        if let Some(mut record) = self.caches[descriptor.category.index()].take(id) {
            record.status = AssetStatus::Loaded;
            record.touch(now);
            self.counters.hits += 1;
            debug!(asset = id, requester, "asset restored from cache");
            self.active.insert(id.to_string(), record.clone());
            self.events.publish(StreamEvent::AssetLoaded { id: id.to_string() });
            return Ok(record);
        }

        if !self.loading.insert(id.to_string()) {
            return Err(StreamError::InvalidState(format!(
                "asset {id} is already loading"
            )));
        }
        self.counters.misses += 1;

        for dependency in &descriptor.dependencies {
            if self.active.contains_key(dependency) || self.loading.contains(dependency) {
                continue;
            }
            if let Err(err) = self.load_asset(dependency, priority, requester, quality) {
                warn!(asset = id, dependency = %dependency, error = %err, "dependency failed to load");
            }
        }

        let outcome = self.load_fresh(&descriptor, quality, now);
        self.loading.remove(id);

        match outcome {
            Ok(record) => {
                self.failed.remove(id);
                self.counters.loads += 1;
                self.counters.total_load_time_ms += record.load_time_ms;
                self.budget.record_allocation(record.memory_usage);
                debug!(
                    asset = id,
                    requester,
                    ?priority,
                    ?quality,
                    bytes = record.memory_usage,
                    "asset loaded"
                );
                self.active.insert(id.to_string(), record.clone());
                if let Some(result) = &record.compression {
                    self.events.publish(StreamEvent::CompressionCompleted {
                        id: id.to_string(),
                        result: result.clone(),
                    });
                }
                self.events.publish(StreamEvent::AssetLoaded { id: id.to_string() });
                Ok(record)
            }
            Err(err) => {
                self.counters.failures += 1;
                warn!(asset = id, requester, error = %err, "asset failed to load");
                self.failed.insert(id.to_string(), err.clone());
                self.events.publish(StreamEvent::AssetLoadFailed {
                    id: id.to_string(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn load_fresh(&self, descriptor: &AssetDescriptor, quality: Quality, started: u64) -> Result<AssetRecord> {
        let bytes = self.source.fetch(&descriptor.source_key)?;
        let decoded = self
            .decoder
            .decode(descriptor.category, &bytes)
            .map_err(|err| StreamError::DecodeFailure {
                id: descriptor.id.clone(),
                reason: err.0,
            })?;

        let mut record = AssetRecord::from_descriptor(descriptor, quality, started);
        if descriptor.category.is_compressible() {
            match self.pipeline.compress(&bytes, quality, descriptor.category) {
                Ok(result) => record.compression = Some(result),
                Err(err) => {
                    warn!(asset = %descriptor.id, error = %err, "keeping uncompressed payload");
                }
            }
        }

        let now = self.clock.now_ms();
        record.status = AssetStatus::Loaded;
        record.memory_usage = decoded.footprint;
        record.metadata = decoded.metadata;
        record.load_time_ms = now.saturating_sub(started);
        record.touch(now);
        Ok(record)
    }

    /// Move an active record into its category cache. Records the cache
    /// trims to stay within its share are discarded for good.
    pub fn unload_asset(&mut self, id: &str, reason: UnloadReason) -> Result<()> {
        let Some(record) = self.active.remove(id) else {
            if self.status(id) == AssetStatus::Cached {
                return Ok(());
            }
            return Err(StreamError::AssetNotFound(id.to_string()));
        };

        let category = record.category;
        debug!(asset = id, ?reason, "asset moved to cache");
        let evicted = self.caches[category.index()].insert(record);
        for dropped in evicted {
            self.budget.record_release(dropped.memory_usage);
            self.counters.discarded += 1;
            debug!(asset = %dropped.id, bytes = dropped.memory_usage, "asset evicted from cache");
        }
        self.events.publish(StreamEvent::AssetUnloaded { id: id.to_string() });
        Ok(())
    }

    /// Drop a record from the active store or its cache and release its
    /// bytes. Returns the bytes released.
    pub fn discard(&mut self, id: &str) -> usize {
        let removed = match self.active.remove(id) {
            Some(record) => {
                self.events.publish(StreamEvent::AssetUnloaded { id: id.to_string() });
                Some(record)
            }
            None => self
                .category_of(id)
                .and_then(|category| self.caches[category.index()].remove(id)),
        };
        match removed {
            Some(record) => {
                self.budget.record_release(record.memory_usage);
                self.counters.discarded += 1;
                debug!(asset = id, bytes = record.memory_usage, "asset discarded");
                record.memory_usage
            }
            None => 0,
        }
    }

    /// Evict least recently used cached records, skipping `keep`, until at
    /// least `target` bytes are released. Returns the bytes released.
    pub fn shed_cache(&mut self, target: usize, keep: &AHashSet<String>) -> usize {
        let mut candidates: Vec<(u64, String, AssetCategory)> = self
            .caches
            .iter()
            .flat_map(|cache| cache.iter())
            .filter(|record| !keep.contains(&record.id))
            .map(|record| (record.last_accessed, record.id.clone(), record.category))
            .collect();
        candidates.sort();

        let mut released = 0;
        for (_, id, category) in candidates {
            if released >= target {
                break;
            }
            if let Some(record) = self.caches[category.index()].remove(&id) {
                self.budget.record_release(record.memory_usage);
                self.counters.discarded += 1;
                released += record.memory_usage;
            }
        }
        if released > 0 {
            debug!(released, target, "shed cached assets");
        }
        released
    }

    /// Request an asset through the scheduler's asset queue.
    ///
    /// Active assets resolve immediately; Critical requests load
    /// synchronously. Other callers requesting an id that is already queued
    /// share one handle.
    pub fn request(
        &mut self,
        id: &str,
        priority: Priority,
        requester: &str,
        quality: Quality,
        scheduler: &mut Scheduler,
    ) -> LoadHandle<AssetRecord> {
        if let Some(record) = self.active.get_mut(id) {
            record.touch(self.clock.now_ms());
            return LoadHandle::ready(record.clone());
        }
        if !self.descriptors.contains_key(id) {
            return LoadHandle::failed(StreamError::AssetNotFound(id.to_string()));
        }
        if priority.is_critical() {
            let handle = self.handles.remove(id).unwrap_or_default();
            scheduler.cancel(ResourceKind::Asset, id);
            match self.load_asset(id, priority, requester, quality) {
                Ok(record) => handle.complete(record),
                Err(err) => handle.fail(err),
            };
            return handle;
        }

        let request = LoadRequest::new(id, priority, requester, self.clock.now_ms()).with_quality(quality);
        scheduler.submit_load(ResourceKind::Asset, request);
        match self.handles.get(id) {
            Some(handle) => handle.attach(),
            None => {
                let handle = LoadHandle::new();
                self.handles.insert(id.to_string(), handle.clone());
                handle
            }
        }
    }

    /// Run a request drained from the asset queue
    pub fn execute(&mut self, request: PendingRequest) -> Result<()> {
        match request {
            PendingRequest::Load(load) => {
                let quality = load.quality.unwrap_or(Quality::High);
                let outcome = self.load_asset(&load.target, load.priority, &load.requester, quality);
                let handle = self.handles.remove(&load.target);
                match outcome {
                    Ok(record) => {
                        if let Some(handle) = handle {
                            handle.complete(record);
                        }
                        Ok(())
                    }
                    Err(err) => {
                        if let Some(handle) = handle {
                            handle.fail(err.clone());
                        }
                        Err(err)
                    }
                }
            }
            PendingRequest::Unload(unload) => self.unload_asset(&unload.target, unload.reason),
        }
    }

    pub fn get(&self, id: &str) -> Option<&AssetRecord> {
        self.active.get(id)
    }

    /// Active or cached record
    pub fn peek(&self, id: &str) -> Option<&AssetRecord> {
        self.active.get(id).or_else(|| {
            self.cache(self.category_of(id))
                .and_then(|cache| cache.get(id))
        })
    }

    /// Active assets of a category, sorted by id
    pub fn get_by_type(&self, category: AssetCategory) -> Vec<&AssetRecord> {
        let mut found: Vec<&AssetRecord> = self
            .active
            .values()
            .filter(|record| record.category == category)
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// Active assets carrying `tag`, sorted by id
    pub fn get_by_tag(&self, tag: &str) -> Vec<&AssetRecord> {
        let mut found: Vec<&AssetRecord> = self
            .active
            .values()
            .filter(|record| record.has_tag(tag))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// Bytes an asset currently holds, active or cached
    pub fn resident_bytes(&self, id: &str) -> usize {
        self.peek(id).map_or(0, |record| record.memory_usage)
    }

    pub fn failure(&self, id: &str) -> Option<&StreamError> {
        self.failed.get(id)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        self.loading.contains(id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_ceiling(&self) -> usize {
        self.config.max_active_assets
    }

    pub fn cached_count(&self) -> usize {
        self.caches.iter().map(CategoryCache::len).sum()
    }

    pub fn cache_stats(&self, category: AssetCategory) -> &CacheStats {
        self.caches[category.index()].stats()
    }

    pub fn stats(&self) -> AssetStats {
        let active_memory: usize = self.active.values().map(|r| r.memory_usage).sum();
        let cached_memory: usize = self.caches.iter().map(CategoryCache::memory_usage).sum();
        let lookups = self.counters.hits + self.counters.misses;
        AssetStats {
            active_count: self.active.len(),
            cached_count: self.cached_count(),
            failed_count: self.failed.len(),
            pending_requests: self.handles.len(),
            active_memory,
            cached_memory,
            total_memory: active_memory + cached_memory,
            loads: self.counters.loads,
            failures: self.counters.failures,
            average_load_time_ms: if self.counters.loads == 0 {
                0.0
            } else {
                self.counters.total_load_time_ms as f64 / self.counters.loads as f64
            },
            cache_hits: self.counters.hits,
            cache_misses: self.counters.misses,
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                self.counters.hits as f64 / lookups as f64
            },
            cache_bytes: self
                .caches
                .iter()
                .map(|cache| (cache.category(), cache.memory_usage()))
                .collect(),
            cache_evictions: self.caches.iter().map(|c| c.stats().evictions).sum(),
        }
    }

    pub(crate) fn events(&self) -> &EventHub {
        &self.events
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}
