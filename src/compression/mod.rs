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

//! Progressive compression pipeline.
//!
//! Raw media bytes go in, a smaller representation at the requested
//! [`Quality`] comes out. Formats are picked from a per-category preference
//! list; codecs that are not available on the running platform are skipped
//! in favour of the next entry.

pub mod codec;
pub mod pipeline;
pub mod resolve;

pub use codec::{Codec, CodecRegistry, PassthroughCodec, RleCodec, StrideCodec};
pub use pipeline::{CompressionPipeline, CompressionStats, ProgressiveTiers};
pub use resolve::preferred_formats;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::media::MediaMetadata;

/// Requested output fidelity, ordered from most to least aggressive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quality {
    Low,
    Medium,
    High,
    Ultra,
    Lossless,
}

impl Quality {
    pub const ALL: [Quality; 5] = [
        Quality::Low,
        Quality::Medium,
        Quality::High,
        Quality::Ultra,
        Quality::Lossless,
    ];

    /// Ladder produced by progressive tiering. Lossless is not part of it.
    pub const PROGRESSIVE: [Quality; 4] = [Quality::Low, Quality::Medium, Quality::High, Quality::Ultra];
}

/// Output format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Format {
    Avif,
    Webp,
    Jpeg,
    Png,
    Opus,
    Vorbis,
    Mp3,
    Wav,
    Rle,
    /// Input stored unchanged
    Raw,
}

impl Format {
    pub fn is_lossless(self) -> bool {
        matches!(self, Format::Png | Format::Wav | Format::Rle | Format::Raw)
    }
}

/// Outcome of compressing one input at one quality
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionResult {
    pub original_size: usize,
    pub compressed_size: usize,
    /// `compressed_size / original_size`, 1.0 for empty input
    pub ratio: f64,
    pub quality: Quality,
    pub format: Format,
    pub processing_time: Duration,
    pub metadata: MediaMetadata,
    #[serde(skip)]
    pub data: Arc<[u8]>,
}

impl CompressionResult {
    /// Build a result from encoder output. Processing time and metadata are
    /// stamped by the pipeline.
    pub fn from_output(original_size: usize, output: Vec<u8>, quality: Quality, format: Format) -> Self {
        let compressed_size = output.len();
        Self {
            original_size,
            compressed_size,
            ratio: compression_ratio(original_size, compressed_size),
            quality,
            format,
            processing_time: Duration::ZERO,
            metadata: MediaMetadata::default(),
            data: Arc::from(output),
        }
    }

    pub fn bytes_saved(&self) -> usize {
        self.original_size.saturating_sub(self.compressed_size)
    }
}

/// `compressed / original`, defined as 1.0 when the input is empty
pub fn compression_ratio(original_size: usize, compressed_size: usize) -> f64 {
    if original_size == 0 {
        1.0
    } else {
        compressed_size as f64 / original_size as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_guards_zero_length() {
        assert_eq!(compression_ratio(0, 0), 1.0);
        assert_eq!(compression_ratio(0, 12), 1.0);
        assert_eq!(compression_ratio(200, 50), 0.25);
    }

    #[test]
    fn test_quality_ordering() {
        assert!(Quality::Low < Quality::Medium);
        assert!(Quality::Ultra < Quality::Lossless);
        assert!(!Quality::PROGRESSIVE.contains(&Quality::Lossless));
    }
}
