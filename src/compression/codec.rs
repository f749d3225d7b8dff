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

//! Pluggable encoders.
//!
//! The built-in codecs are stand-ins with predictable output sizes; real
//! encoders register under the same [`Format`] and replace them without
//! touching tier or fallback logic.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};

use crate::compression::{CompressionResult, Format, Quality};
use crate::error::{Result, StreamError};

/// Encoder contract for one output format
pub trait Codec: Send + Sync {
    /// Format tag this codec produces
    fn format(&self) -> Format;

    /// Whether the encoder can run on this platform
    fn is_available(&self) -> bool {
        true
    }

    /// Encode `data` at `quality`. `factor` is the category's fidelity factor
    /// for that quality, in (0, 1].
    fn encode(&self, data: &[u8], quality: Quality, factor: f32) -> Result<CompressionResult>;
}

/// Lossy stand-in: keeps `ceil(len * factor)` evenly strided bytes, so output
/// size grows with fidelity.
#[derive(Debug, Clone, Copy)]
pub struct StrideCodec {
    format: Format,
}

impl StrideCodec {
    pub fn new(format: Format) -> Self {
        Self { format }
    }
}

impl Codec for StrideCodec {
    fn format(&self) -> Format {
        self.format
    }

    fn encode(&self, data: &[u8], quality: Quality, factor: f32) -> Result<CompressionResult> {
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(StreamError::CompressionFailed(format!(
                "{:?} factor {factor} outside (0, 1]",
                self.format
            )));
        }
        let len = data.len();
        let target = ((len as f64 * factor as f64).ceil() as usize).clamp(len.min(1), len);
        let output: Vec<u8> = (0..target).map(|i| data[i * len / target]).collect();
        Ok(CompressionResult::from_output(len, output, quality, self.format))
    }
}

/// No-op encoder that returns its input unchanged (ratio 1.0)
#[derive(Debug, Clone, Copy)]
pub struct PassthroughCodec {
    format: Format,
}

impl PassthroughCodec {
    pub fn new(format: Format) -> Self {
        Self { format }
    }
}

impl Codec for PassthroughCodec {
    fn format(&self) -> Format {
        self.format
    }

    fn encode(&self, data: &[u8], quality: Quality, _factor: f32) -> Result<CompressionResult> {
        Ok(CompressionResult::from_output(
            data.len(),
            data.to_vec(),
            quality,
            self.format,
        ))
    }
}

/// Lossless run-length encoder: `(run, byte)` pairs, runs capped at 255
#[derive(Debug, Clone, Copy, Default)]
pub struct RleCodec;

impl RleCodec {
    pub fn decode(encoded: &[u8]) -> Result<Vec<u8>> {
        if encoded.len() % 2 != 0 {
            return Err(StreamError::CompressionFailed(
                "odd-length RLE stream".to_string(),
            ));
        }
        let mut out = Vec::new();
        for pair in encoded.chunks_exact(2) {
            out.extend(std::iter::repeat(pair[1]).take(pair[0] as usize));
        }
        Ok(out)
    }
}

impl Codec for RleCodec {
    fn format(&self) -> Format {
        Format::Rle
    }

    fn encode(&self, data: &[u8], quality: Quality, _factor: f32) -> Result<CompressionResult> {
        let mut output = Vec::new();
        let mut iter = data.iter().copied().peekable();
        while let Some(byte) = iter.next() {
            let mut run: u8 = 1;
            while run < u8::MAX && iter.peek() == Some(&byte) {
                iter.next();
                run += 1;
            }
            output.push(run);
            output.push(byte);
        }
        Ok(CompressionResult::from_output(
            data.len(),
            output,
            quality,
            Format::Rle,
        ))
    }
}

/// Format → codec table with per-format availability overrides
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: AHashMap<Format, Arc<dyn Codec>>,
    disabled: AHashSet<Format>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a stand-in codec for every format
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for format in [
            Format::Avif,
            Format::Webp,
            Format::Jpeg,
            Format::Opus,
            Format::Vorbis,
            Format::Mp3,
        ] {
            registry.register(Arc::new(StrideCodec::new(format)));
        }
        for format in [Format::Png, Format::Wav, Format::Raw] {
            registry.register(Arc::new(PassthroughCodec::new(format)));
        }
        registry.register(Arc::new(RleCodec));
        registry
    }

    /// Register (or replace) the codec for its format
    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        self.codecs.insert(codec.format(), codec);
    }

    /// Treat a format as unavailable regardless of its codec
    pub fn disable(&mut self, format: Format) {
        self.disabled.insert(format);
    }

    pub fn enable(&mut self, format: Format) {
        self.disabled.remove(&format);
    }

    /// Codec for a format if one is registered, enabled and available
    pub fn resolve(&self, format: Format) -> Option<Arc<dyn Codec>> {
        if self.disabled.contains(&format) {
            return None;
        }
        self.codecs
            .get(&format)
            .filter(|codec| codec.is_available())
            .cloned()
    }

    pub fn is_available(&self, format: Format) -> bool {
        self.resolve(format).is_some()
    }
}
