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

//! Level-of-detail table.
//!
//! Levels are sorted by ascending distance threshold (in chunk units). For a
//! distance `d` the selected level is the highest-index level whose threshold
//! is `<= d`; level 0 is used below the first threshold. Selection is
//! therefore monotonic: a farther chunk never gets a finer level.

use serde::{Deserialize, Serialize};

use crate::compression::Quality;
use crate::error::{Result, StreamError};

/// One level of detail
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LodLevel {
    /// 0 is the finest level
    pub level: u8,
    /// Distance at which this level starts to apply
    pub distance_threshold: f32,
    /// Relative geometric detail, 1.0 = full
    pub detail_factor: f32,
    /// Asset quality requested for chunks at this level
    pub quality: Quality,
    pub render_distance: f32,
}

impl LodLevel {
    pub fn new(
        level: u8,
        distance_threshold: f32,
        detail_factor: f32,
        quality: Quality,
        render_distance: f32,
    ) -> Self {
        Self {
            level,
            distance_threshold,
            detail_factor,
            quality,
            render_distance,
        }
    }
}

/// Ordered set of LOD levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LodTable {
    levels: Vec<LodLevel>,
}

impl LodTable {
    /// Levels are taken as given; call [`LodTable::validate`] before use.
    pub fn new(levels: Vec<LodLevel>) -> Self {
        Self { levels }
    }

    pub fn levels(&self) -> &[LodLevel] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Highest-index level whose threshold is `<= distance`, level 0 otherwise
    pub fn select(&self, distance: f32) -> Option<&LodLevel> {
        let first = self.levels.first()?;
        Some(
            self.levels
                .iter()
                .rev()
                .find(|level| level.distance_threshold <= distance)
                .unwrap_or(first),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.levels.is_empty() {
            return Err(StreamError::InvalidConfig(
                "LOD table has no levels".to_string(),
            ));
        }
        for (index, level) in self.levels.iter().enumerate() {
            if level.level as usize != index {
                return Err(StreamError::InvalidConfig(format!(
                    "LOD entry {index} declares level {}",
                    level.level
                )));
            }
            if !level.distance_threshold.is_finite() || level.distance_threshold < 0.0 {
                return Err(StreamError::InvalidConfig(format!(
                    "LOD level {index} threshold {} must be finite and non-negative",
                    level.distance_threshold
                )));
            }
            if !(level.detail_factor > 0.0 && level.detail_factor <= 1.0) {
                return Err(StreamError::InvalidConfig(format!(
                    "LOD level {index} detail factor {} outside (0, 1]",
                    level.detail_factor
                )));
            }
        }
        if let Some(pair) = self
            .levels
            .windows(2)
            .find(|pair| pair[0].distance_threshold >= pair[1].distance_threshold)
        {
            return Err(StreamError::InvalidConfig(format!(
                "LOD thresholds must increase strictly: level {} at {} is followed by {}",
                pair[0].level, pair[0].distance_threshold, pair[1].distance_threshold
            )));
        }
        Ok(())
    }
}

impl Default for LodTable {
    fn default() -> Self {
        Self::new(vec![
            LodLevel::new(0, 0.0, 1.0, Quality::Ultra, 2.0),
            LodLevel::new(1, 2.0, 0.75, Quality::High, 4.0),
            LodLevel::new(2, 4.0, 0.5, Quality::Medium, 8.0),
            LodLevel::new(3, 8.0, 0.25, Quality::Low, 16.0),
        ])
    }
}
