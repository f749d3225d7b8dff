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

//! Engine configuration.
//!
//! Every recognized option is a field here; [`StreamConfig::validate`] runs
//! when the engine is built so a bad table never reaches the hot path.
//!
//! ```
//! use archetype_stream::config::StreamConfig;
//!
//! let config = StreamConfig::default().with_hard_budget(64 * 1024 * 1024);
//! config.validate().unwrap();
//! let json = config.to_json_string().unwrap();
//! assert_eq!(StreamConfig::from_json_str(&json).unwrap(), config);
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::assets::AssetCategory;
use crate::compression::{Format, Quality};
use crate::error::{Result, StreamError};
use crate::spatial::LodTable;

/// Hard memory budget and soft threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Ceiling on resident asset bytes
    pub hard_budget: usize,
    /// Fraction of the budget above which Normal/Low work is deferred
    pub soft_threshold: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            hard_budget: 512 * 1024 * 1024,
            soft_threshold: 0.8,
        }
    }
}

/// Chunk grid and lifecycle options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// World streamed by observer updates
    pub world_id: String,
    /// Edge length of a chunk in world units
    pub chunk_size: f32,
    /// Chunks within this distance (in chunk units) are visible and loaded
    pub load_distance: f32,
    /// Active chunks beyond this distance are queued for unload
    pub unload_distance: f32,
    /// Include the z coordinate in chunk ids and candidate sets
    pub layered: bool,
    /// Fraction of non-active chunks evicted per cleanup pass
    pub cleanup_fraction: f64,
    /// Ceiling on Active + in-flight chunks
    pub max_active_chunks: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            world_id: "w".to_string(),
            chunk_size: 64.0,
            load_distance: 3.0,
            unload_distance: 5.0,
            layered: false,
            cleanup_fraction: 0.25,
            max_active_chunks: 256,
        }
    }
}

/// Asset store options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Total cache budget, split evenly across categories
    pub cache_budget: usize,
    /// A category cache that overflows is trimmed to this fraction of its share
    pub cache_trim_ratio: f64,
    /// Ceiling on active assets
    pub max_active_assets: usize,
}

impl AssetConfig {
    /// Byte budget of a single category cache
    pub fn per_category_budget(&self) -> usize {
        self.cache_budget / AssetCategory::ALL.len()
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            cache_budget: 128 * 1024 * 1024,
            cache_trim_ratio: 0.8,
            max_active_assets: 4096,
        }
    }
}

/// Fidelity factor per quality level, non-decreasing from Low to Lossless
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityTable {
    pub low: f32,
    pub medium: f32,
    pub high: f32,
    pub ultra: f32,
    pub lossless: f32,
}

impl QualityTable {
    pub const IMAGE: QualityTable = QualityTable {
        low: 0.25,
        medium: 0.5,
        high: 0.75,
        ultra: 0.9,
        lossless: 1.0,
    };

    pub const AUDIO: QualityTable = QualityTable {
        low: 0.2,
        medium: 0.4,
        high: 0.65,
        ultra: 0.85,
        lossless: 1.0,
    };

    /// Lossless-only categories
    pub const FLAT: QualityTable = QualityTable {
        low: 1.0,
        medium: 1.0,
        high: 1.0,
        ultra: 1.0,
        lossless: 1.0,
    };

    pub fn factor(&self, quality: Quality) -> f32 {
        match quality {
            Quality::Low => self.low,
            Quality::Medium => self.medium,
            Quality::High => self.high,
            Quality::Ultra => self.ultra,
            Quality::Lossless => self.lossless,
        }
    }

    pub fn validate(&self, category: AssetCategory) -> Result<()> {
        let factors = Quality::ALL.map(|q| self.factor(q));
        if factors.iter().any(|f| !(*f > 0.0 && *f <= 1.0)) {
            return Err(StreamError::InvalidConfig(format!(
                "{} quality factors must lie in (0, 1]: {factors:?}",
                category.name()
            )));
        }
        if factors.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(StreamError::InvalidConfig(format!(
                "{} quality factors must not decrease from Low to Lossless: {factors:?}",
                category.name()
            )));
        }
        Ok(())
    }
}

/// Compression pipeline options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub tables: BTreeMap<AssetCategory, QualityTable>,
    /// Formats treated as unavailable on this platform
    pub unavailable_formats: Vec<Format>,
}

impl CompressionConfig {
    /// Table for a category; categories without an entry are lossless-only
    pub fn table(&self, category: AssetCategory) -> QualityTable {
        self.tables
            .get(&category)
            .copied()
            .unwrap_or(QualityTable::FLAT)
    }

    pub fn with_table(mut self, category: AssetCategory, table: QualityTable) -> Self {
        self.tables.insert(category, table);
        self
    }

    pub fn with_unavailable_format(mut self, format: Format) -> Self {
        if !self.unavailable_formats.contains(&format) {
            self.unavailable_formats.push(format);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (category, table) in &self.tables {
            table.validate(*category)?;
        }
        Ok(())
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        let mut tables = BTreeMap::new();
        for category in AssetCategory::ALL {
            let table = if category.is_image() {
                QualityTable::IMAGE
            } else if category == AssetCategory::Audio {
                QualityTable::AUDIO
            } else {
                QualityTable::FLAT
            };
            tables.insert(category, table);
        }
        Self {
            tables,
            unavailable_formats: Vec::new(),
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamConfig {
    pub budget: BudgetConfig,
    pub chunks: ChunkConfig,
    pub assets: AssetConfig,
    pub compression: CompressionConfig,
    pub lod: LodTable,
}

impl StreamConfig {
    pub fn with_hard_budget(mut self, bytes: usize) -> Self {
        self.budget.hard_budget = bytes;
        self
    }

    pub fn with_soft_threshold(mut self, fraction: f64) -> Self {
        self.budget.soft_threshold = fraction;
        self
    }

    pub fn with_world(mut self, world_id: impl Into<String>) -> Self {
        self.chunks.world_id = world_id.into();
        self
    }

    pub fn with_distances(mut self, load_distance: f32, unload_distance: f32) -> Self {
        self.chunks.load_distance = load_distance;
        self.chunks.unload_distance = unload_distance;
        self
    }

    pub fn with_cleanup_fraction(mut self, fraction: f64) -> Self {
        self.chunks.cleanup_fraction = fraction;
        self
    }

    pub fn with_cache_budget(mut self, bytes: usize) -> Self {
        self.assets.cache_budget = bytes;
        self
    }

    pub fn with_lod(mut self, lod: LodTable) -> Self {
        self.lod = lod;
        self
    }

    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: StreamConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject configurations the engine cannot honour
    pub fn validate(&self) -> Result<()> {
        let budget = &self.budget;
        if budget.hard_budget == 0 {
            return Err(StreamError::InvalidConfig(
                "hard_budget must be greater than zero".to_string(),
            ));
        }
        if !(budget.soft_threshold > 0.0 && budget.soft_threshold <= 1.0) {
            return Err(StreamError::InvalidConfig(format!(
                "soft_threshold {} outside (0, 1]",
                budget.soft_threshold
            )));
        }

        let chunks = &self.chunks;
        if chunks.world_id.is_empty() {
            return Err(StreamError::InvalidConfig("world_id is empty".to_string()));
        }
        // chunk ids are `<world>_<x>_<y>[_<z>]`; a numeric tail would read as a coordinate
        let tail = chunks.world_id.rsplit('_').next().unwrap_or_default();
        if tail.parse::<i32>().is_ok() {
            return Err(StreamError::InvalidConfig(format!(
                "world_id {:?} must not end in a numeric segment",
                chunks.world_id
            )));
        }
        if !(chunks.chunk_size > 0.0) {
            return Err(StreamError::InvalidConfig(format!(
                "chunk_size {} must be positive",
                chunks.chunk_size
            )));
        }
        if !(chunks.load_distance >= 0.0 && chunks.load_distance <= chunks.unload_distance) {
            return Err(StreamError::InvalidConfig(format!(
                "load_distance {} must be within [0, unload_distance {}]",
                chunks.load_distance, chunks.unload_distance
            )));
        }
        if !(chunks.cleanup_fraction > 0.0 && chunks.cleanup_fraction <= 1.0) {
            return Err(StreamError::InvalidConfig(format!(
                "cleanup_fraction {} outside (0, 1]",
                chunks.cleanup_fraction
            )));
        }
        if chunks.max_active_chunks == 0 {
            return Err(StreamError::InvalidConfig(
                "max_active_chunks must be greater than zero".to_string(),
            ));
        }

        let assets = &self.assets;
        if assets.per_category_budget() == 0 {
            return Err(StreamError::InvalidConfig(format!(
                "cache_budget {} too small to split across {} categories",
                assets.cache_budget,
                AssetCategory::ALL.len()
            )));
        }
        if !(assets.cache_trim_ratio > 0.0 && assets.cache_trim_ratio <= 1.0) {
            return Err(StreamError::InvalidConfig(format!(
                "cache_trim_ratio {} outside (0, 1]",
                assets.cache_trim_ratio
            )));
        }
        if assets.max_active_assets == 0 {
            return Err(StreamError::InvalidConfig(
                "max_active_assets must be greater than zero".to_string(),
            ));
        }

        self.compression.validate()?;
        self.lod.validate()
    }
}
