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

// Chunk Lifecycle Module
//
// Provides:
// - Chunk ids and records
// - World catalog seam (blueprints per chunk)
// - Lifecycle manager: load, restore, unload, cleanup

pub mod catalog;
pub mod manager;

pub use catalog::{ChunkBlueprint, GridCatalog, StaticCatalog, WorldCatalog};
pub use manager::{ChunkManager, CleanupReport};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use glam::IVec3;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::assets::AssetCategory;
use crate::compression::Quality;
use crate::error::StreamError;

/// Metadata tag set on chunks that activated with missing assets
pub const DEGRADED_TAG: &str = "degraded";

/// Parsed chunk id: `<world>_<x>_<y>` or `<world>_<x>_<y>_<z>`.
///
/// The world id must not end in a numeric segment, otherwise the split
/// between world and coordinates would be ambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkId {
    pub world: String,
    pub x: i32,
    pub y: i32,
    pub z: Option<i32>,
}

impl ChunkId {
    pub fn new(world: impl Into<String>, x: i32, y: i32) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z: None,
        }
    }

    pub fn layered(world: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z: Some(z),
        }
    }

    /// Id for a grid cell; z is kept only when `layered`
    pub fn from_coord(world: &str, coord: IVec3, layered: bool) -> Self {
        if layered {
            Self::layered(world, coord.x, coord.y, coord.z)
        } else {
            Self::new(world, coord.x, coord.y)
        }
    }

    pub fn parse(id: &str) -> Result<Self, StreamError> {
        let invalid = || StreamError::InvalidChunkId(id.to_string());
        let segments: Vec<&str> = id.split('_').collect();
        let numeric = segments
            .iter()
            .rev()
            .take_while(|s| s.parse::<i32>().is_ok())
            .count();
        if !(numeric == 2 || numeric == 3) || numeric == segments.len() {
            return Err(invalid());
        }

        let world = segments[..segments.len() - numeric].join("_");
        if world.is_empty() {
            return Err(invalid());
        }
        let coords: Vec<i32> = segments[segments.len() - numeric..]
            .iter()
            .map(|s| s.parse::<i32>())
            .collect::<Result<_, _>>()
            .map_err(|_| invalid())?;

        Ok(match coords.as_slice() {
            [x, y] => Self::new(world, *x, *y),
            [x, y, z] => Self::layered(world, *x, *y, *z),
            _ => return Err(invalid()),
        })
    }

    pub fn coord(&self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z.unwrap_or(0))
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.z {
            Some(z) => write!(f, "{}_{}_{}_{}", self.world, self.x, self.y, z),
            None => write!(f, "{}_{}_{}", self.world, self.x, self.y),
        }
    }
}

impl FromStr for ChunkId {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkStatus {
    Unloaded,
    Loading,
    Active,
    Cached,
}

/// Generated entity ids, handed to gameplay collaborators as-is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityLists {
    pub npcs: Vec<String>,
    pub items: Vec<String>,
    pub puzzles: Vec<String>,
    pub enemies: Vec<String>,
    pub collectibles: Vec<String>,
}

impl EntityLists {
    pub fn len(&self) -> usize {
        self.npcs.len()
            + self.items.len()
            + self.puzzles.len()
            + self.enemies.len()
            + self.collectibles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub biome: String,
    pub difficulty: f32,
    pub tags: Vec<String>,
    /// Assets that failed during the last activation
    pub failed_assets: Vec<String>,
}

impl ChunkMetadata {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn is_degraded(&self) -> bool {
        self.has_tag(DEGRADED_TAG)
    }

    pub(crate) fn set_degraded(&mut self, failed: Vec<String>) {
        if failed.is_empty() {
            self.tags.retain(|t| t != DEGRADED_TAG);
        } else if !self.is_degraded() {
            self.tags.push(DEGRADED_TAG.to_string());
        }
        self.failed_assets = failed;
    }
}

/// Runtime record of a chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub world_id: String,
    pub position: IVec3,
    /// Edge length in world units
    pub size: f32,
    pub lod_level: u8,
    /// Quality the chunk's assets were requested at
    pub quality: Quality,
    pub status: ChunkStatus,
    pub last_accessed: u64,
    pub access_count: u64,
    /// Sum of the loaded referenced assets' memory usage
    pub memory_usage: usize,
    pub assets: BTreeMap<AssetCategory, SmallVec<[String; 4]>>,
    pub entities: EntityLists,
    pub metadata: ChunkMetadata,
    pub load_time_ms: u64,
}

impl ChunkRecord {
    /// Loading record with no memory, returned while a load is queued
    pub fn placeholder(id: &ChunkId, size: f32, now: u64) -> Self {
        Self {
            id: id.to_string(),
            world_id: id.world.clone(),
            position: id.coord(),
            size,
            lod_level: 0,
            quality: Quality::High,
            status: ChunkStatus::Loading,
            last_accessed: now,
            access_count: 0,
            memory_usage: 0,
            assets: BTreeMap::new(),
            entities: EntityLists::default(),
            metadata: ChunkMetadata::default(),
            load_time_ms: 0,
        }
    }

    /// Referenced asset ids, grouped by category order
    pub fn asset_ids(&self) -> impl Iterator<Item = &String> {
        self.assets.values().flat_map(|ids| ids.iter())
    }

    pub fn references(&self, asset_id: &str) -> bool {
        self.asset_ids().any(|id| id == asset_id)
    }

    pub fn is_resident(&self) -> bool {
        matches!(
            self.status,
            ChunkStatus::Active | ChunkStatus::Cached | ChunkStatus::Loading
        )
    }

    pub(crate) fn touch(&mut self, now: u64) {
        self.last_accessed = now;
        self.access_count += 1;
    }
}

/// Snapshot of the chunk store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkStats {
    pub total: usize,
    pub active: usize,
    pub cached: usize,
    pub loading: usize,
    pub degraded: usize,
    /// Memory of active chunks
    pub total_memory: usize,
    pub loads: u64,
    pub cache_restores: u64,
    pub evictions: u64,
    pub failures: u64,
    pub average_load_time_ms: f64,
    pub pending_loads: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_planar_and_layered() {
        let planar = ChunkId::parse("w_0_0").unwrap();
        assert_eq!(planar, ChunkId::new("w", 0, 0));
        let layered: ChunkId = "over_world_-3_4_2".parse().unwrap();
        assert_eq!(layered, ChunkId::layered("over_world", -3, 4, 2));
        assert_eq!(layered.to_string(), "over_world_-3_4_2");
        assert_eq!(layered.coord(), IVec3::new(-3, 4, 2));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["w", "w_1", "1_2", "w_1_2_3_4", "_1_2", "w_x_y"] {
            assert!(
                matches!(ChunkId::parse(bad), Err(StreamError::InvalidChunkId(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_degraded_tag_toggles() {
        let mut metadata = ChunkMetadata::default();
        metadata.set_degraded(vec!["tex".into()]);
        assert!(metadata.is_degraded());
        metadata.set_degraded(vec!["tex".into(), "audio".into()]);
        assert_eq!(metadata.tags.len(), 1);
        metadata.set_degraded(Vec::new());
        assert!(!metadata.is_degraded());
    }

    #[test]
    fn test_placeholder_has_no_memory() {
        let id = ChunkId::new("w", 2, 3);
        let record = ChunkRecord::placeholder(&id, 64.0, 5);
        assert_eq!(record.status, ChunkStatus::Loading);
        assert_eq!(record.memory_usage, 0);
        assert_eq!(record.position, IVec3::new(2, 3, 0));
    }
}
