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

//! Spatial chunk index.
//!
//! Maps a continuous observer position onto the chunk grid and keeps, for
//! every tracked chunk, its distance to the observer's chunk (in chunk units)
//! and whether it lies within the load distance.

pub mod lod;

pub use lod::{LodLevel, LodTable};

use ahash::AHashMap;
use glam::{IVec3, Vec3};

use crate::config::ChunkConfig;
use crate::error::{Result, StreamError};

#[derive(Debug, Clone, Copy, PartialEq)]
struct TrackedChunk {
    coord: IVec3,
    distance: f32,
    visible: bool,
}

/// Chunks whose visibility flag flipped during an observer update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityChanges {
    pub became_visible: Vec<String>,
    pub became_hidden: Vec<String>,
}

impl VisibilityChanges {
    pub fn is_empty(&self) -> bool {
        self.became_visible.is_empty() && self.became_hidden.is_empty()
    }
}

/// Tracked chunk within a query radius
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDistance {
    pub id: String,
    pub coord: IVec3,
    pub distance: f32,
}

/// Distance and visibility bookkeeping for tracked chunks
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    chunk_size: f32,
    load_distance: f32,
    layered: bool,
    observer: Vec3,
    observer_chunk: IVec3,
    tracked: AHashMap<String, TrackedChunk>,
    lod: LodTable,
}

impl SpatialIndex {
    pub fn new(config: &ChunkConfig, lod: LodTable) -> Self {
        Self {
            chunk_size: config.chunk_size,
            load_distance: config.load_distance,
            layered: config.layered,
            observer: Vec3::ZERO,
            observer_chunk: IVec3::ZERO,
            tracked: AHashMap::new(),
            lod,
        }
    }

    /// Grid cell containing a world-space position
    pub fn world_to_chunk(&self, position: Vec3) -> IVec3 {
        let cell = (position / self.chunk_size).floor().as_ivec3();
        if self.layered {
            cell
        } else {
            IVec3::new(cell.x, cell.y, 0)
        }
    }

    pub fn observer(&self) -> Vec3 {
        self.observer
    }

    pub fn observer_chunk(&self) -> IVec3 {
        self.observer_chunk
    }

    pub fn load_distance(&self) -> f32 {
        self.load_distance
    }

    pub fn lod_table(&self) -> &LodTable {
        &self.lod
    }

    /// Euclidean distance in chunk units from the observer's chunk
    pub fn distance_to(&self, coord: IVec3) -> f32 {
        (coord - self.observer_chunk).as_vec3().length()
    }

    /// Start tracking a chunk. Its visibility flag starts cleared and is
    /// settled by the next observer update.
    pub fn track(&mut self, id: impl Into<String>, coord: IVec3) {
        let distance = self.distance_to(coord);
        self.tracked
            .entry(id.into())
            .and_modify(|chunk| {
                chunk.coord = coord;
                chunk.distance = distance;
            })
            .or_insert(TrackedChunk {
                coord,
                distance,
                visible: false,
            });
    }

    pub fn untrack(&mut self, id: &str) -> bool {
        self.tracked.remove(id).is_some()
    }

    pub fn is_tracked(&self, id: &str) -> bool {
        self.tracked.contains_key(id)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn coord(&self, id: &str) -> Option<IVec3> {
        self.tracked.get(id).map(|chunk| chunk.coord)
    }

    pub fn distance(&self, id: &str) -> Option<f32> {
        self.tracked.get(id).map(|chunk| chunk.distance)
    }

    pub fn is_visible(&self, id: &str) -> bool {
        self.tracked.get(id).is_some_and(|chunk| chunk.visible)
    }

    /// Move the observer and recompute distance and visibility of every
    /// tracked chunk. Returned ids are sorted.
    pub fn update_observer(&mut self, position: Vec3) -> VisibilityChanges {
        self.observer = position;
        self.observer_chunk = self.world_to_chunk(position);

        let observer_chunk = self.observer_chunk;
        let load_distance = self.load_distance;
        let mut changes = VisibilityChanges::default();

        for (id, chunk) in self.tracked.iter_mut() {
            chunk.distance = (chunk.coord - observer_chunk).as_vec3().length();
            let visible = chunk.distance <= load_distance;
            if visible != chunk.visible {
                chunk.visible = visible;
                if visible {
                    changes.became_visible.push(id.clone());
                } else {
                    changes.became_hidden.push(id.clone());
                }
            }
        }

        changes.became_visible.sort();
        changes.became_hidden.sort();
        changes
    }

    /// Tracked chunks with distance `<= radius`, nearest first, ties by id
    pub fn chunks_in_radius(&self, radius: f32) -> Vec<ChunkDistance> {
        let mut found: Vec<ChunkDistance> = self
            .tracked
            .iter()
            .filter(|(_, chunk)| chunk.distance <= radius)
            .map(|(id, chunk)| ChunkDistance {
                id: id.clone(),
                coord: chunk.coord,
                distance: chunk.distance,
            })
            .collect();
        found.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.id.cmp(&b.id))
        });
        found
    }

    /// Grid cells within `radius` of the observer's chunk, nearest first
    pub fn cells_within(&self, radius: f32) -> Vec<IVec3> {
        let reach = radius.max(0.0).floor() as i32;
        let z_reach = if self.layered { reach } else { 0 };
        let mut cells = Vec::new();
        for dz in -z_reach..=z_reach {
            for dy in -reach..=reach {
                for dx in -reach..=reach {
                    let offset = IVec3::new(dx, dy, dz);
                    if offset.as_vec3().length() <= radius {
                        cells.push(self.observer_chunk + offset);
                    }
                }
            }
        }
        let origin = self.observer_chunk;
        cells.sort_by(|a, b| {
            let da = (*a - origin).length_squared();
            let db = (*b - origin).length_squared();
            da.cmp(&db)
                .then_with(|| (a.x, a.y, a.z).cmp(&(b.x, b.y, b.z)))
        });
        cells
    }

    /// LOD level for a tracked chunk at its current distance
    pub fn compute_lod(&self, id: &str) -> Result<&LodLevel> {
        let chunk = self
            .tracked
            .get(id)
            .ok_or_else(|| StreamError::ChunkNotFound(id.to_string()))?;
        self.lod_for_distance(chunk.distance)
    }

    pub fn lod_for_distance(&self, distance: f32) -> Result<&LodLevel> {
        self.lod
            .select(distance)
            .ok_or_else(|| StreamError::InvalidConfig("LOD table has no levels".to_string()))
    }
}
