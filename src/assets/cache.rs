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

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::assets::{AssetCategory, AssetRecord, AssetStatus};

/// Cache statistics
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub inserts: u64,
}

/// Bounded cache for one asset category with LRU eviction.
///
/// Entries keep their decoded footprint; the owning registry stays
/// responsible for the global memory budget and is handed every evicted
/// record back so it can release the bytes.
#[derive(Debug)]
pub struct CategoryCache {
    category: AssetCategory,
    entries: AHashMap<String, AssetRecord>,
    total_size: usize,
    max_size: usize,
    trim_ratio: f64,
    stats: CacheStats,
}

impl CategoryCache {
    /// Create new cache with a byte budget. Overflow trims down to
    /// `trim_ratio * max_size`.
    pub fn new(category: AssetCategory, max_size: usize, trim_ratio: f64) -> Self {
        Self {
            category,
            entries: AHashMap::new(),
            total_size: 0,
            max_size,
            trim_ratio,
            stats: CacheStats::default(),
        }
    }

    pub fn category(&self) -> AssetCategory {
        self.category
    }

    /// Insert a record (status becomes Cached) and return whatever the trim
    /// pass evicted. The inserted record itself may be evicted when it is the
    /// least recently used entry.
    pub fn insert(&mut self, mut record: AssetRecord) -> Vec<AssetRecord> {
        record.status = AssetStatus::Cached;
        if let Some(previous) = self.entries.remove(&record.id) {
            self.total_size = self.total_size.saturating_sub(previous.memory_usage);
        }
        self.total_size += record.memory_usage;
        self.entries.insert(record.id.clone(), record);
        self.stats.inserts += 1;

        if self.total_size <= self.max_size {
            return Vec::new();
        }

        let floor = (self.max_size as f64 * self.trim_ratio) as usize;
        let mut evicted = Vec::new();
        while self.total_size > floor {
            match self.evict_lru() {
                Some(record) => evicted.push(record),
                None => break,
            }
        }
        evicted
    }

    /// Remove a record for promotion back to the active store
    pub fn take(&mut self, id: &str) -> Option<AssetRecord> {
        match self.remove(id) {
            Some(record) => {
                self.stats.hits += 1;
                Some(record)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Remove without touching hit/miss counters
    pub fn remove(&mut self, id: &str) -> Option<AssetRecord> {
        let record = self.entries.remove(id)?;
        self.total_size = self.total_size.saturating_sub(record.memory_usage);
        Some(record)
    }

    /// Evict least recently used entry (ties broken by id)
    pub fn evict_lru(&mut self) -> Option<AssetRecord> {
        let id = self
            .entries
            .values()
            .min_by(|a, b| {
                a.last_accessed
                    .cmp(&b.last_accessed)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|record| record.id.clone())?;
        let record = self.remove(&id)?;
        self.stats.evictions += 1;
        Some(record)
    }

    pub fn get(&self, id: &str) -> Option<&AssetRecord> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssetRecord> {
        self.entries.values()
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Get current memory usage
    pub fn memory_usage(&self) -> usize {
        self.total_size
    }

    /// Get number of cached assets
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
