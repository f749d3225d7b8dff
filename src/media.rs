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

//! Media decode capability.
//!
//! Platforms inject a [`MediaDecoder`]; the registry only needs the decoded
//! runtime footprint and a little metadata. [`RawMediaDecoder`] understands
//! two uncompressed containers used by tools and tests:
//!
//! - `RIMG` + width `u32` + height `u32` + `width * height * 4` RGBA bytes
//! - `RAUD` + sample rate `u32` + channels `u16` + reserved `u16` + `i16` PCM samples
//!
//! Every other category is treated as opaque bytes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::assets::AssetCategory;

const IMAGE_MAGIC: &[u8; 4] = b"RIMG";
const AUDIO_MAGIC: &[u8; 4] = b"RAUD";
const IMAGE_HEADER_LEN: usize = 12;
const AUDIO_HEADER_LEN: usize = 12;

/// Category-specific metadata recovered while decoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_secs: Option<f32>,
    pub channels: Option<u16>,
    pub sample_rate: Option<u32>,
}

impl MediaMetadata {
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        Some((self.width?, self.height?))
    }
}

/// Result of decoding media bytes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedMedia {
    pub metadata: MediaMetadata,
    /// Bytes the decoded asset occupies at runtime
    pub footprint: usize,
}

/// Malformed or unsupported media
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError(pub String);

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DecodeError {}

/// Platform decode primitive
pub trait MediaDecoder: Send + Sync {
    fn decode(
        &self,
        category: AssetCategory,
        bytes: &[u8],
    ) -> std::result::Result<DecodedMedia, DecodeError>;
}

/// Decoder for the raw `RIMG`/`RAUD` containers
#[derive(Debug, Clone, Copy, Default)]
pub struct RawMediaDecoder;

impl RawMediaDecoder {
    fn decode_image(bytes: &[u8]) -> std::result::Result<DecodedMedia, DecodeError> {
        if bytes.len() < IMAGE_HEADER_LEN || &bytes[..4] != IMAGE_MAGIC {
            return Err(DecodeError("missing RIMG header".to_string()));
        }
        let width = read_u32(bytes, 4);
        let height = read_u32(bytes, 8);
        if width == 0 || height == 0 {
            return Err(DecodeError(format!("empty image {width}x{height}")));
        }
        let expected = width as usize * height as usize * 4;
        let payload = bytes.len() - IMAGE_HEADER_LEN;
        if payload != expected {
            return Err(DecodeError(format!(
                "image {width}x{height} expects {expected} pixel bytes, found {payload}"
            )));
        }
        Ok(DecodedMedia {
            metadata: MediaMetadata {
                width: Some(width),
                height: Some(height),
                ..Default::default()
            },
            footprint: expected,
        })
    }

    fn decode_audio(bytes: &[u8]) -> std::result::Result<DecodedMedia, DecodeError> {
        if bytes.len() < AUDIO_HEADER_LEN || &bytes[..4] != AUDIO_MAGIC {
            return Err(DecodeError("missing RAUD header".to_string()));
        }
        let sample_rate = read_u32(bytes, 4);
        let channels = u16::from_le_bytes([bytes[8], bytes[9]]);
        if sample_rate == 0 || channels == 0 {
            return Err(DecodeError(format!(
                "invalid audio format: {sample_rate} Hz, {channels} channels"
            )));
        }
        let payload = bytes.len() - AUDIO_HEADER_LEN;
        if payload % 2 != 0 {
            return Err(DecodeError("truncated PCM sample".to_string()));
        }
        let samples = payload / 2;
        if samples % channels as usize != 0 {
            return Err(DecodeError(format!(
                "{samples} samples do not divide into {channels} channels"
            )));
        }
        let frames = samples / channels as usize;
        Ok(DecodedMedia {
            metadata: MediaMetadata {
                duration_secs: Some(frames as f32 / sample_rate as f32),
                channels: Some(channels),
                sample_rate: Some(sample_rate),
                ..Default::default()
            },
            // Decoded to f32 samples at runtime
            footprint: samples * 4,
        })
    }
}

impl MediaDecoder for RawMediaDecoder {
    fn decode(
        &self,
        category: AssetCategory,
        bytes: &[u8],
    ) -> std::result::Result<DecodedMedia, DecodeError> {
        if category.is_image() {
            Self::decode_image(bytes)
        } else if category == AssetCategory::Audio {
            Self::decode_audio(bytes)
        } else {
            Ok(DecodedMedia {
                metadata: MediaMetadata::default(),
                footprint: bytes.len(),
            })
        }
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Encode RGBA pixels into a `RIMG` container
pub fn encode_raw_image(width: u32, height: u32, pixels: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(IMAGE_HEADER_LEN + pixels.len());
    out.extend_from_slice(IMAGE_MAGIC);
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(pixels);
    out
}

/// Single-colour `RIMG` image
pub fn solid_raw_image(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let pixels: Vec<u8> = rgba
        .iter()
        .copied()
        .cycle()
        .take(width as usize * height as usize * 4)
        .collect();
    encode_raw_image(width, height, &pixels)
}

/// Encode interleaved PCM samples into a `RAUD` container
pub fn encode_raw_audio(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(AUDIO_HEADER_LEN + samples.len() * 2);
    out.extend_from_slice(AUDIO_MAGIC);
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_footprint_is_decoded_size() {
        let bytes = solid_raw_image(512, 512, [10, 20, 30, 255]);
        let decoded = RawMediaDecoder
            .decode(AssetCategory::Texture, &bytes)
            .unwrap();
        assert_eq!(decoded.footprint, 512 * 512 * 4);
        assert_eq!(decoded.metadata.dimensions(), Some((512, 512)));
    }

    #[test]
    fn test_truncated_image_rejected() {
        let mut bytes = solid_raw_image(4, 4, [0, 0, 0, 0]);
        bytes.pop();
        assert!(RawMediaDecoder.decode(AssetCategory::Sprite, &bytes).is_err());
        assert!(RawMediaDecoder
            .decode(AssetCategory::Texture, b"not an image")
            .is_err());
    }

    #[test]
    fn test_audio_metadata() {
        let samples = vec![0i16; 44_100 * 2];
        let bytes = encode_raw_audio(44_100, 2, &samples);
        let decoded = RawMediaDecoder.decode(AssetCategory::Audio, &bytes).unwrap();
        assert_eq!(decoded.metadata.channels, Some(2));
        assert_eq!(decoded.metadata.duration_secs, Some(1.0));
        assert_eq!(decoded.footprint, 44_100 * 2 * 4);
    }

    #[test]
    fn test_opaque_categories_use_byte_length() {
        let decoded = RawMediaDecoder.decode(AssetCategory::Model, &[1, 2, 3]).unwrap();
        assert_eq!(decoded.footprint, 3);
    }
}
