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

//! Format resolution table.

use crate::assets::AssetCategory;
use crate::compression::{Format, Quality};

/// Formats to try for `(category, quality)`, most preferred first.
///
/// Higher qualities lead with higher-fidelity formats; every list ends in a
/// lossless format so a platform with only the basic encoders still serves
/// the request.
pub fn preferred_formats(category: AssetCategory, quality: Quality) -> &'static [Format] {
    if category.is_image() {
        match quality {
            Quality::Low => &[Format::Jpeg, Format::Webp, Format::Png],
            Quality::Medium | Quality::High => &[Format::Webp, Format::Jpeg, Format::Png],
            Quality::Ultra => &[Format::Avif, Format::Webp, Format::Png],
            Quality::Lossless => &[Format::Png, Format::Raw],
        }
    } else if category == AssetCategory::Audio {
        match quality {
            Quality::Low => &[Format::Opus, Format::Mp3, Format::Wav],
            Quality::Medium => &[Format::Opus, Format::Vorbis, Format::Mp3, Format::Wav],
            Quality::High | Quality::Ultra => &[Format::Vorbis, Format::Opus, Format::Wav],
            Quality::Lossless => &[Format::Wav, Format::Raw],
        }
    } else {
        &[Format::Rle, Format::Raw]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_list_ends_lossless() {
        for category in AssetCategory::ALL {
            for quality in Quality::ALL {
                let formats = preferred_formats(category, quality);
                assert!(!formats.is_empty());
                assert!(formats[formats.len() - 1].is_lossless());
            }
        }
    }

    #[test]
    fn test_ultra_images_prefer_next_gen() {
        assert_eq!(
            preferred_formats(AssetCategory::Texture, Quality::Ultra)[0],
            Format::Avif
        );
        assert_eq!(
            preferred_formats(AssetCategory::Sprite, Quality::Low)[0],
            Format::Jpeg
        );
    }
}
