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

//! Error types

use std::fmt;

use crate::assets::AssetCategory;
use crate::compression::Quality;

/// Streaming error type
#[derive(Debug, Clone, PartialEq)]
pub enum StreamError {
    /// Unknown chunk id
    ChunkNotFound(String),

    /// Unknown asset id (never declared to the registry)
    AssetNotFound(String),

    /// Chunk id does not follow `<world>_<x>_<y>[_<z>]`
    InvalidChunkId(String),

    /// Media bytes are malformed or of an unsupported layout
    DecodeFailure { id: String, reason: String },

    /// Asset source could not provide bytes for a key
    SourceUnavailable { key: String, reason: String },

    /// Every encoder in the fallback chain is unavailable
    CompressionUnavailable {
        category: AssetCategory,
        quality: Quality,
    },

    /// An available encoder rejected the input
    CompressionFailed(String),

    /// Atlas surface cannot hold even a single sprite per row
    AtlasTooSmall {
        atlas_id: String,
        surface: (u32, u32),
        widest_sprite: u32,
    },

    /// Configuration rejected at construction time
    InvalidConfig(String),

    /// Operation not valid for the record's current status
    InvalidState(String),

    /// IO error (file-backed sources)
    Io(String),

    /// Config (de)serialization error
    Serialization(String),
}

impl StreamError {
    /// Errors the engine absorbs by degrading (missing asset, raw payload)
    /// rather than surfacing to the host.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StreamError::DecodeFailure { .. }
                | StreamError::SourceUnavailable { .. }
                | StreamError::CompressionUnavailable { .. }
                | StreamError::CompressionFailed(_)
        )
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::ChunkNotFound(id) => write!(f, "Chunk not found: {id}"),
            StreamError::AssetNotFound(id) => write!(f, "Asset not found: {id}"),
            StreamError::InvalidChunkId(id) => write!(f, "Invalid chunk id: {id}"),
            StreamError::DecodeFailure { id, reason } => {
                write!(f, "Decode failure for {id}: {reason}")
            }
            StreamError::SourceUnavailable { key, reason } => {
                write!(f, "Source unavailable for {key}: {reason}")
            }
            StreamError::CompressionUnavailable { category, quality } => write!(
                f,
                "No available encoder for {category:?} at {quality:?} quality"
            ),
            StreamError::CompressionFailed(msg) => write!(f, "Compression failed: {msg}"),
            StreamError::AtlasTooSmall {
                atlas_id,
                surface,
                widest_sprite,
            } => write!(
                f,
                "Atlas {atlas_id}: surface {}x{} cannot fit a sprite of width {widest_sprite}",
                surface.0, surface.1
            ),
            StreamError::InvalidConfig(msg) => write!(f, "Invalid configuration: {msg}"),
            StreamError::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
            StreamError::Io(msg) => write!(f, "IO error: {msg}"),
            StreamError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
        }
    }
}

impl std::error::Error for StreamError {}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Serialization(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StreamError>;
