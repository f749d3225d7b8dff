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

//! World catalogs: what a chunk contains.
//!
//! The catalog is an external collaborator. It tells the chunk manager which
//! assets a chunk references and which entities it spawns; the asset bytes
//! themselves come from the [`AssetSource`](crate::source::AssetSource).

use std::hash::{Hash, Hasher};

use ahash::AHashMap;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::assets::{AssetCategory, AssetDescriptor};
use crate::chunk::{ChunkId, EntityLists};
use crate::error::{Result, StreamError};

/// Contents of one chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkBlueprint {
    pub assets: Vec<AssetDescriptor>,
    pub entities: EntityLists,
    pub biome: String,
    pub difficulty: f32,
    pub tags: Vec<String>,
}

impl ChunkBlueprint {
    pub fn new(biome: impl Into<String>) -> Self {
        Self {
            biome: biome.into(),
            ..Default::default()
        }
    }

    pub fn with_asset(mut self, descriptor: AssetDescriptor) -> Self {
        self.assets.push(descriptor);
        self
    }

    pub fn with_difficulty(mut self, difficulty: f32) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_entities(mut self, entities: EntityLists) -> Self {
        self.entities = entities;
        self
    }
}

/// Maps chunk ids to their contents
pub trait WorldCatalog: Send + Sync {
    fn blueprint(&self, id: &ChunkId) -> Result<ChunkBlueprint>;
}

/// Explicit table of blueprints keyed by chunk id
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    chunks: AHashMap<String, ChunkBlueprint>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk(mut self, id: impl Into<String>, blueprint: ChunkBlueprint) -> Self {
        self.insert(id, blueprint);
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, blueprint: ChunkBlueprint) {
        self.chunks.insert(id.into(), blueprint);
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl WorldCatalog for StaticCatalog {
    fn blueprint(&self, id: &ChunkId) -> Result<ChunkBlueprint> {
        self.chunks
            .get(&id.to_string())
            .cloned()
            .ok_or_else(|| StreamError::ChunkNotFound(id.to_string()))
    }
}

/// Procedural catalog: every grid cell of every world exists.
///
/// Asset keys follow `<world>/<biome>/<name>` for biome-shared assets and
/// `<world>/chunks/<x>_<y>[_<z>]/<name>` for per-chunk ones. Output depends
/// only on the chunk id and the seed.
#[derive(Debug, Clone)]
pub struct GridCatalog {
    biomes: Vec<String>,
    seed: u64,
}

impl GridCatalog {
    pub fn new(seed: u64) -> Self {
        Self {
            biomes: ["forest", "desert", "tundra", "marsh"]
                .iter()
                .map(|b| b.to_string())
                .collect(),
            seed,
        }
    }

    /// Replace the biome list; an empty list keeps the defaults
    pub fn with_biomes<I, S>(mut self, biomes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let biomes: Vec<String> = biomes.into_iter().map(Into::into).collect();
        if !biomes.is_empty() {
            self.biomes = biomes;
        }
        self
    }

    fn hash(&self, id: &ChunkId) -> u64 {
        let mut hasher = FxHasher::default();
        self.seed.hash(&mut hasher);
        id.hash(&mut hasher);
        hasher.finish()
    }

    pub fn biome_of(&self, id: &ChunkId) -> &str {
        let index = (self.hash(id) % self.biomes.len() as u64) as usize;
        &self.biomes[index]
    }
}

impl Default for GridCatalog {
    fn default() -> Self {
        Self::new(0)
    }
}

impl WorldCatalog for GridCatalog {
    fn blueprint(&self, id: &ChunkId) -> Result<ChunkBlueprint> {
        let hash = self.hash(id);
        let biome = self.biome_of(id).to_string();
        let world = &id.world;
        let cell = match id.z {
            Some(z) => format!("{}_{}_{}", id.x, id.y, z),
            None => format!("{}_{}", id.x, id.y),
        };

        let shared = |name: &str, category: AssetCategory| {
            let key = format!("{world}/{biome}/{name}");
            AssetDescriptor::new(key.clone(), category, key).with_tag(biome.clone())
        };
        let layout_key = format!("{world}/chunks/{cell}/layout");

        let chunk_id = id.to_string();
        let spawn = |kind: &str, count: u64| -> Vec<String> {
            (0..count).map(|i| format!("{chunk_id}/{kind}/{i}")).collect()
        };
        let entities = EntityLists {
            npcs: spawn("npc", hash % 3),
            items: spawn("item", (hash >> 8) % 4),
            puzzles: spawn("puzzle", (hash >> 16) % 2),
            enemies: spawn("enemy", (hash >> 24) % 5),
            collectibles: spawn("collectible", (hash >> 32) % 6),
        };

        let distance = ((id.x as f32).powi(2) + (id.y as f32).powi(2)).sqrt();
        let difficulty = (distance * 0.5 + ((hash >> 40) % 10) as f32 * 0.1).min(10.0);

        Ok(ChunkBlueprint {
            assets: vec![
                shared("terrain", AssetCategory::Texture),
                shared("ambient", AssetCategory::Audio),
                AssetDescriptor::new(layout_key.clone(), AssetCategory::Data, layout_key),
            ],
            entities,
            biome: biome.clone(),
            difficulty,
            tags: vec![biome],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_catalog_lookup() {
        let catalog = StaticCatalog::new().with_chunk("w_0_0", ChunkBlueprint::new("forest"));
        assert_eq!(
            catalog.blueprint(&ChunkId::new("w", 0, 0)).unwrap().biome,
            "forest"
        );
        assert!(matches!(
            catalog.blueprint(&ChunkId::new("w", 1, 0)),
            Err(StreamError::ChunkNotFound(_))
        ));
    }

    #[test]
    fn test_grid_catalog_is_deterministic() {
        let catalog = GridCatalog::new(42);
        let id = ChunkId::new("overworld", 3, -2);
        let first = catalog.blueprint(&id).unwrap();
        let second = catalog.blueprint(&id).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.assets.len(), 3);
        assert_eq!(first.tags, vec![first.biome.clone()]);
    }

    #[test]
    fn test_grid_catalog_key_conventions() {
        let catalog = GridCatalog::new(7).with_biomes(["glacier"]);
        let blueprint = catalog.blueprint(&ChunkId::layered("sky", 1, 2, 3)).unwrap();
        let keys: Vec<_> = blueprint.assets.iter().map(|a| a.source_key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["sky/glacier/terrain", "sky/glacier/ambient", "sky/chunks/1_2_3/layout"]
        );
    }
}
