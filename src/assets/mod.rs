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

// Asset Registry Module
//
// Provides:
// - Active store with per-category bounded caches
// - Decoded-footprint memory accounting
// - Compression on load for compressible categories
// - Sprite atlas packing

pub mod atlas;
pub mod cache;
pub mod registry;

pub use atlas::{AtlasLayout, AtlasPlacement, PixelRect, UvRect};
pub use cache::{CacheStats, CategoryCache};
pub use registry::{AssetRegistry, AssetStats, RegistryServices};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::compression::{CompressionResult, Quality};
use crate::media::MediaMetadata;

/// Asset category. Each category owns one bounded cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AssetCategory {
    Texture,
    Sprite,
    Audio,
    Model,
    Animation,
    Effect,
    Ui,
    Font,
    Shader,
    Data,
}

impl AssetCategory {
    pub const ALL: [AssetCategory; 10] = [
        AssetCategory::Texture,
        AssetCategory::Sprite,
        AssetCategory::Audio,
        AssetCategory::Model,
        AssetCategory::Animation,
        AssetCategory::Effect,
        AssetCategory::Ui,
        AssetCategory::Font,
        AssetCategory::Shader,
        AssetCategory::Data,
    ];

    /// Stable index into per-category tables
    pub fn index(self) -> usize {
        self as usize
    }

    /// Categories decoded as RGBA surfaces
    pub fn is_image(self) -> bool {
        matches!(
            self,
            AssetCategory::Texture | AssetCategory::Sprite | AssetCategory::Ui
        )
    }

    /// Categories routed through the compression pipeline on load
    pub fn is_compressible(self) -> bool {
        self.is_image() || matches!(self, AssetCategory::Audio | AssetCategory::Data)
    }

    pub fn name(self) -> &'static str {
        match self {
            AssetCategory::Texture => "texture",
            AssetCategory::Sprite => "sprite",
            AssetCategory::Audio => "audio",
            AssetCategory::Model => "model",
            AssetCategory::Animation => "animation",
            AssetCategory::Effect => "effect",
            AssetCategory::Ui => "ui",
            AssetCategory::Font => "font",
            AssetCategory::Shader => "shader",
            AssetCategory::Data => "data",
        }
    }
}

/// Asset lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetStatus {
    NotLoaded,
    Loading,
    Loaded,
    Cached,
    Failed,
}

/// Static description of an asset, as provided by a world catalog or a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub id: String,
    pub category: AssetCategory,
    /// Key handed to the asset source
    pub source_key: String,
    /// Size advertised by the catalog (not used for accounting)
    pub declared_size: usize,
    pub dependencies: SmallVec<[String; 2]>,
    pub tags: SmallVec<[String; 4]>,
}

impl AssetDescriptor {
    pub fn new(id: impl Into<String>, category: AssetCategory, source_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category,
            source_key: source_key.into(),
            declared_size: 0,
            dependencies: SmallVec::new(),
            tags: SmallVec::new(),
        }
    }

    pub fn with_declared_size(mut self, bytes: usize) -> Self {
        self.declared_size = bytes;
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Runtime record of a loaded (or cached) asset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: String,
    pub category: AssetCategory,
    pub source_key: String,
    pub declared_size: usize,
    pub quality: Quality,
    pub status: AssetStatus,
    pub last_accessed: u64,
    pub access_count: u64,
    /// Decoded runtime footprint in bytes
    pub memory_usage: usize,
    pub dependencies: SmallVec<[String; 2]>,
    pub tags: SmallVec<[String; 4]>,
    pub metadata: MediaMetadata,
    /// Stored representation when the category is compressible
    pub compression: Option<CompressionResult>,
    pub load_time_ms: u64,
}

impl AssetRecord {
    pub(crate) fn from_descriptor(descriptor: &AssetDescriptor, quality: Quality, now: u64) -> Self {
        Self {
            id: descriptor.id.clone(),
            category: descriptor.category,
            source_key: descriptor.source_key.clone(),
            declared_size: descriptor.declared_size,
            quality,
            status: AssetStatus::Loading,
            last_accessed: now,
            access_count: 0,
            memory_usage: 0,
            dependencies: descriptor.dependencies.clone(),
            tags: descriptor.tags.clone(),
            metadata: MediaMetadata::default(),
            compression: None,
            load_time_ms: 0,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub(crate) fn touch(&mut self, now: u64) {
        self.last_accessed = now;
        self.access_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_indices_are_dense() {
        for (i, category) in AssetCategory::ALL.iter().enumerate() {
            assert_eq!(category.index(), i);
        }
    }

    #[test]
    fn test_compressible_categories() {
        assert!(AssetCategory::Texture.is_compressible());
        assert!(AssetCategory::Sprite.is_compressible());
        assert!(AssetCategory::Audio.is_compressible());
        assert!(AssetCategory::Data.is_compressible());
        assert!(!AssetCategory::Model.is_compressible());
        assert!(!AssetCategory::Shader.is_compressible());
    }

    #[test]
    fn test_descriptor_builder() {
        let descriptor = AssetDescriptor::new("grass", AssetCategory::Texture, "w/forest/grass")
            .with_declared_size(4096)
            .with_dependency("palette")
            .with_tag("terrain");
        assert_eq!(descriptor.declared_size, 4096);
        assert_eq!(descriptor.dependencies.as_slice(), ["palette".to_string()]);
        assert_eq!(descriptor.tags.as_slice(), ["terrain".to_string()]);
    }
}
