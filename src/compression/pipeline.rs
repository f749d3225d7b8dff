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

//! Compression pipeline: format fallback, progressive tiers and statistics.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::assets::AssetCategory;
use crate::compression::{
    preferred_formats, CodecRegistry, CompressionResult, Format, Quality,
};
use crate::config::CompressionConfig;
use crate::error::{Result, StreamError};
use crate::media::{MediaDecoder, MediaMetadata};

/// Running totals over every successful `compress` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionStats {
    pub compressed_count: u64,
    pub total_original_bytes: u64,
    pub total_compressed_bytes: u64,
    pub bytes_saved: u64,
    /// Mean of `compressed / original` over all results
    pub average_ratio: f64,
    /// Results served by a format other than the first preference
    pub fallbacks: u64,
    /// Calls where every format in the chain was exhausted
    pub failures: u64,
}

impl CompressionStats {
    fn record(&mut self, result: &CompressionResult, fell_back: bool) {
        self.compressed_count += 1;
        self.total_original_bytes += result.original_size as u64;
        self.total_compressed_bytes += result.compressed_size as u64;
        self.bytes_saved += result.bytes_saved() as u64;
        self.average_ratio += (result.ratio - self.average_ratio) / self.compressed_count as f64;
        if fell_back {
            self.fallbacks += 1;
        }
    }
}

/// One result per progressive quality that succeeded
#[derive(Debug, Clone, Default)]
pub struct ProgressiveTiers {
    tiers: BTreeMap<Quality, CompressionResult>,
}

impl ProgressiveTiers {
    pub fn get(&self, quality: Quality) -> Option<&CompressionResult> {
        self.tiers.get(&quality)
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn qualities(&self) -> Vec<Quality> {
        self.tiers.keys().copied().collect()
    }

    /// Tiers ordered from Low to Ultra
    pub fn iter(&self) -> impl Iterator<Item = (&Quality, &CompressionResult)> {
        self.tiers.iter()
    }

    pub fn into_map(self) -> BTreeMap<Quality, CompressionResult> {
        self.tiers
    }
}

/// Turns raw media bytes into a representation at a requested quality
pub struct CompressionPipeline {
    config: CompressionConfig,
    codecs: CodecRegistry,
    decoder: Arc<dyn MediaDecoder>,
    stats: Mutex<CompressionStats>,
}

impl CompressionPipeline {
    /// Formats listed as unavailable in `config` are disabled in `codecs`.
    pub fn new(
        config: CompressionConfig,
        mut codecs: CodecRegistry,
        decoder: Arc<dyn MediaDecoder>,
    ) -> Self {
        for format in &config.unavailable_formats {
            codecs.disable(*format);
        }
        Self {
            config,
            codecs,
            decoder,
            stats: Mutex::new(CompressionStats::default()),
        }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Compress `data` at `quality`, walking the category's format
    /// preference list until an available encoder succeeds.
    ///
    /// Empty input short-circuits to a raw result with ratio 1.0. An
    /// encoder whose output is larger than its input is replaced by the input
    /// stored as [`Format::Raw`].
    pub fn compress(
        &self,
        data: &[u8],
        quality: Quality,
        category: AssetCategory,
    ) -> Result<CompressionResult> {
        let start = Instant::now();
        let formats = preferred_formats(category, quality);

        if data.is_empty() {
            let mut result = CompressionResult::from_output(0, Vec::new(), quality, Format::Raw);
            result.processing_time = start.elapsed();
            self.stats.lock().record(&result, false);
            return Ok(result);
        }

        let factor = self.config.table(category).factor(quality);
        let mut last_error = None;

        for (position, format) in formats.iter().enumerate() {
            let Some(codec) = self.codecs.resolve(*format) else {
                debug!(?format, ?category, ?quality, "encoder unavailable, trying next format");
                continue;
            };

            let mut result = match codec.encode(data, quality, factor) {
                Ok(result) => result,
                Err(err) => {
                    debug!(?format, error = %err, "encoder rejected input, trying next format");
                    last_error = Some(err);
                    continue;
                }
            };

            if result.compressed_size > data.len() {
                result = CompressionResult::from_output(data.len(), data.to_vec(), quality, Format::Raw);
            }

            let fell_back = position > 0;
            if fell_back {
                warn!(
                    ?category,
                    ?quality,
                    preferred = ?formats[0],
                    resolved = ?format,
                    "compression fell back to a lower-preference format"
                );
            }

            result.processing_time = start.elapsed();
            result.metadata = self.probe(category, data);
            self.stats.lock().record(&result, fell_back);
            return Ok(result);
        }

        self.stats.lock().failures += 1;
        match last_error {
            Some(err) => Err(err),
            None => Err(StreamError::CompressionUnavailable { category, quality }),
        }
    }

    /// One result per quality in Low..=Ultra. Each tier is computed
    /// independently; a failed tier is omitted.
    pub fn create_progressive_tiers(&self, data: &[u8], category: AssetCategory) -> ProgressiveTiers {
        #[cfg(feature = "profiling")]
        let span = info_span!("compression.progressive_tiers", bytes = data.len(), ?category);
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        #[cfg(feature = "parallel")]
        let results: Vec<(Quality, Result<CompressionResult>)> = Quality::PROGRESSIVE
            .par_iter()
            .map(|quality| (*quality, self.compress(data, *quality, category)))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let results: Vec<(Quality, Result<CompressionResult>)> = Quality::PROGRESSIVE
            .iter()
            .map(|quality| (*quality, self.compress(data, *quality, category)))
            .collect();

        let mut tiers = BTreeMap::new();
        for (quality, outcome) in results {
            match outcome {
                Ok(result) => {
                    tiers.insert(quality, result);
                }
                Err(err) => warn!(?quality, ?category, error = %err, "progressive tier omitted"),
            }
        }
        ProgressiveTiers { tiers }
    }

    pub fn stats(&self) -> CompressionStats {
        self.stats.lock().clone()
    }

    fn probe(&self, category: AssetCategory, data: &[u8]) -> MediaMetadata {
        self.decoder
            .decode(category, data)
            .map(|decoded| decoded.metadata)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::Codec;
    use crate::media::{solid_raw_image, RawMediaDecoder};

    fn pipeline() -> CompressionPipeline {
        CompressionPipeline::new(
            CompressionConfig::default(),
            CodecRegistry::with_builtin(),
            Arc::new(RawMediaDecoder),
        )
    }

    #[test]
    fn test_empty_input_has_unit_ratio() {
        let result = pipeline()
            .compress(&[], Quality::Low, AssetCategory::Texture)
            .unwrap();
        assert_eq!(result.ratio, 1.0);
        assert_eq!(result.compressed_size, 0);
    }

    #[test]
    fn test_quality_controls_size() {
        let pipeline = pipeline();
        let image = solid_raw_image(32, 32, [1, 2, 3, 4]);
        let low = pipeline
            .compress(&image, Quality::Low, AssetCategory::Texture)
            .unwrap();
        let lossless = pipeline
            .compress(&image, Quality::Lossless, AssetCategory::Texture)
            .unwrap();
        assert_eq!(low.format, Format::Jpeg);
        assert_eq!(lossless.format, Format::Png);
        assert!(lossless.ratio >= low.ratio);
        assert_eq!(low.metadata.dimensions(), Some((32, 32)));
    }

    #[test]
    fn test_falls_back_when_preferred_unavailable() {
        let config = CompressionConfig::default().with_unavailable_format(Format::Avif);
        let pipeline = CompressionPipeline::new(
            config,
            CodecRegistry::with_builtin(),
            Arc::new(RawMediaDecoder),
        );
        let image = solid_raw_image(8, 8, [9, 9, 9, 9]);
        let result = pipeline
            .compress(&image, Quality::Ultra, AssetCategory::Texture)
            .unwrap();
        assert_eq!(result.format, Format::Webp);
        assert_eq!(pipeline.stats().fallbacks, 1);
    }

    #[test]
    fn test_exhausted_chain_is_surfaced() {
        let pipeline = CompressionPipeline::new(
            CompressionConfig::default(),
            CodecRegistry::new(),
            Arc::new(RawMediaDecoder),
        );
        let err = pipeline
            .compress(b"abc", Quality::Medium, AssetCategory::Audio)
            .unwrap_err();
        assert_eq!(
            err,
            StreamError::CompressionUnavailable {
                category: AssetCategory::Audio,
                quality: Quality::Medium,
            }
        );
        assert_eq!(pipeline.stats().failures, 1);
    }

    struct InflatingCodec;

    impl Codec for InflatingCodec {
        fn format(&self) -> Format {
            Format::Rle
        }
        fn encode(&self, data: &[u8], quality: Quality, _: f32) -> Result<CompressionResult> {
            let mut out = data.to_vec();
            out.extend_from_slice(data);
            Ok(CompressionResult::from_output(data.len(), out, quality, Format::Rle))
        }
    }

    #[test]
    fn test_inflated_output_stored_raw() {
        let mut codecs = CodecRegistry::with_builtin();
        codecs.register(Arc::new(InflatingCodec));
        let pipeline =
            CompressionPipeline::new(CompressionConfig::default(), codecs, Arc::new(RawMediaDecoder));
        let result = pipeline
            .compress(b"xyz", Quality::High, AssetCategory::Data)
            .unwrap();
        assert_eq!(result.format, Format::Raw);
        assert_eq!(result.ratio, 1.0);
    }

    #[test]
    fn test_progressive_tiers_exclude_lossless() {
        let image = solid_raw_image(16, 16, [0, 128, 255, 255]);
        let tiers = pipeline().create_progressive_tiers(&image, AssetCategory::Sprite);
        assert_eq!(
            tiers.qualities(),
            vec![Quality::Low, Quality::Medium, Quality::High, Quality::Ultra]
        );
        assert!(tiers.get(Quality::Lossless).is_none());
    }

    #[test]
    fn test_stats_average_ratio() {
        let pipeline = pipeline();
        let data = vec![5u8; 100];
        pipeline
            .compress(&data, Quality::Low, AssetCategory::Texture)
            .unwrap();
        pipeline
            .compress(&data, Quality::Lossless, AssetCategory::Texture)
            .unwrap();
        let stats = pipeline.stats();
        assert_eq!(stats.compressed_count, 2);
        assert!((stats.average_ratio - 0.625).abs() < 1e-9);
        assert_eq!(stats.bytes_saved, 75);
    }
}
