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

//! Sprite atlas packing.
//!
//! Shelf packing: sprites go left to right; a sprite that would cross the
//! right edge starts a new row below the tallest sprite of the current row.
//! Once a sprite overflows the bottom edge, it and every later sprite are
//! reported as skipped.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::assets::AssetRegistry;
use crate::compression::Quality;
use crate::error::{Result, StreamError};
use crate::event::StreamEvent;
use crate::scheduler::Priority;

/// Placement rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn overlaps(&self, other: &PixelRect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// Normalized texture coordinates, `(u0, v0)` top-left, `(u1, v1)` bottom-right
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UvRect {
    pub u0: f32,
    pub v0: f32,
    pub u1: f32,
    pub v1: f32,
}

impl UvRect {
    fn from_pixels(rect: &PixelRect, surface: (u32, u32)) -> Self {
        let (w, h) = (surface.0 as f32, surface.1 as f32);
        Self {
            u0: rect.x as f32 / w,
            v0: rect.y as f32 / h,
            u1: rect.right() as f32 / w,
            v1: rect.bottom() as f32 / h,
        }
    }

    /// Whether all coordinates lie in `[0, 1]`
    pub fn is_normalized(&self) -> bool {
        [self.u0, self.v0, self.u1, self.v1]
            .iter()
            .all(|c| (0.0..=1.0).contains(c))
    }

    pub fn overlaps(&self, other: &UvRect) -> bool {
        self.u0 < other.u1 && other.u0 < self.u1 && self.v0 < other.v1 && other.v0 < self.v1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtlasPlacement {
    pub sprite_id: String,
    pub rect: PixelRect,
    pub uv: UvRect,
}

/// Result of packing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtlasLayout {
    pub id: String,
    pub size: (u32, u32),
    pub placements: Vec<AtlasPlacement>,
    /// Resolved sprites that did not fit vertically
    pub skipped: Vec<String>,
    /// Sprites that failed to load or carry no dimensions
    pub unresolved: Vec<String>,
}

impl AtlasLayout {
    pub fn placement(&self, sprite_id: &str) -> Option<&AtlasPlacement> {
        self.placements.iter().find(|p| p.sprite_id == sprite_id)
    }

    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.unresolved.is_empty()
    }
}

impl AssetRegistry {
    /// Resolve every sprite (loading it if needed) and shelf-pack them into
    /// a `surface` sized atlas.
    ///
    /// Fails with [`StreamError::AtlasTooSmall`] only when the surface is
    /// empty or narrower than the widest sprite.
    pub fn build_atlas<I, S>(&mut self, atlas_id: &str, sprite_ids: I, surface: (u32, u32)) -> Result<AtlasLayout>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        #[cfg(feature = "profiling")]
        let span = info_span!("assets.build_atlas", atlas = atlas_id);
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        let mut sprites = Vec::new();
        let mut unresolved = Vec::new();
        for sprite_id in sprite_ids {
            let sprite_id = sprite_id.as_ref();
            match self.load_asset(sprite_id, Priority::High, atlas_id, Quality::Lossless) {
                Ok(record) => match record.metadata.dimensions() {
                    Some((width, height)) => sprites.push((sprite_id.to_string(), width, height)),
                    None => {
                        warn!(atlas = atlas_id, sprite = sprite_id, "sprite has no dimensions");
                        unresolved.push(sprite_id.to_string());
                    }
                },
                Err(err) => {
                    warn!(atlas = atlas_id, sprite = sprite_id, error = %err, "sprite did not resolve");
                    unresolved.push(sprite_id.to_string());
                }
            }
        }

        let widest_sprite = sprites.iter().map(|(_, w, _)| *w).max().unwrap_or(0);
        if surface.0 == 0 || surface.1 == 0 || widest_sprite > surface.0 {
            return Err(StreamError::AtlasTooSmall {
                atlas_id: atlas_id.to_string(),
                surface,
                widest_sprite,
            });
        }

        let (placements, skipped) = shelf_pack(sprites, surface);

        debug!(
            atlas = atlas_id,
            placed = placements.len(),
            skipped = skipped.len(),
            unresolved = unresolved.len(),
            "atlas packed"
        );
        self.events().publish(StreamEvent::AtlasCreated {
            id: atlas_id.to_string(),
            size: surface,
        });

        Ok(AtlasLayout {
            id: atlas_id.to_string(),
            size: surface,
            placements,
            skipped,
            unresolved,
        })
    }
}

/// Left-to-right rows, wrapping when a sprite overruns the width. Once one
/// sprite overruns the height every remaining sprite is skipped.
fn shelf_pack(sprites: Vec<(String, u32, u32)>, surface: (u32, u32)) -> (Vec<AtlasPlacement>, Vec<String>) {
    let fits = |start: u32, extent: u32, limit: u32| start.checked_add(extent).is_some_and(|end| end <= limit);

    let mut placements = Vec::with_capacity(sprites.len());
    let mut skipped = Vec::new();
    let (mut x, mut y, mut row_height) = (0u32, 0u32, 0u32);

    for (sprite_id, width, height) in sprites {
        if !skipped.is_empty() {
            skipped.push(sprite_id);
            continue;
        }
        if !fits(x, width, surface.0) {
            x = 0;
            y = y.saturating_add(row_height);
            row_height = 0;
        }
        if !fits(x, width, surface.0) || !fits(y, height, surface.1) {
            skipped.push(sprite_id);
            continue;
        }
        let rect = PixelRect {
            x,
            y,
            width,
            height,
        };
        placements.push(AtlasPlacement {
            sprite_id,
            rect,
            uv: UvRect::from_pixels(&rect, surface),
        });
        x += width;
        row_height = row_height.max(height);
    }

    (placements, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_overlap() {
        let a = PixelRect { x: 0, y: 0, width: 64, height: 64 };
        let b = PixelRect { x: 64, y: 0, width: 64, height: 64 };
        let c = PixelRect { x: 32, y: 32, width: 64, height: 64 };
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
    }

    #[test]
    fn test_uv_from_pixels() {
        let rect = PixelRect { x: 64, y: 0, width: 64, height: 128 };
        let uv = UvRect::from_pixels(&rect, (256, 256));
        assert_eq!(uv, UvRect { u0: 0.25, v0: 0.0, u1: 0.5, v1: 0.5 });
        assert!(uv.is_normalized());
    }

    #[test]
    fn test_rect_edges_saturate() {
        let rect = PixelRect { x: u32::MAX - 4, y: 0, width: 64, height: 64 };
        assert_eq!(rect.right(), u32::MAX);
        let left = PixelRect { x: 0, y: 0, width: 64, height: 64 };
        assert!(!rect.overlaps(&left));
    }

    #[test]
    fn test_huge_sprite_is_skipped_without_overflow() {
        let sprites = vec![
            ("tall".to_string(), 16, u32::MAX),
            ("after".to_string(), 16, 16),
        ];
        let (placements, skipped) = shelf_pack(sprites, (64, 64));
        assert!(placements.is_empty());
        assert_eq!(skipped, vec!["tall".to_string(), "after".to_string()]);

        let sprites = vec![
            ("a".to_string(), 32, 32),
            ("wide".to_string(), u32::MAX, 8),
        ];
        let (placements, skipped) = shelf_pack(sprites, (64, 64));
        assert_eq!(placements.len(), 1);
        assert_eq!(skipped, vec!["wide".to_string()]);
    }
}
