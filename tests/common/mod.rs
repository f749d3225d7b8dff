#![allow(dead_code)]

use archetype_stream::media::{encode_raw_audio, solid_raw_image};
use archetype_stream::prelude::*;

/// Engine plus the fixtures a test needs to poke at
pub struct Harness {
    pub engine: StreamingEngine,
    pub source: MemorySource,
    pub clock: ManualClock,
    pub log: EventLog,
}

/// Static world builder backed by an in-memory source
#[derive(Default)]
pub struct World {
    pub catalog: StaticCatalog,
    pub source: MemorySource,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunk with one Data asset of `bytes` bytes
    pub fn data_chunk(mut self, id: &str, bytes: usize) -> Self {
        let key = format!("{id}/layout");
        self.source.insert(key.clone(), vec![3u8; bytes]);
        self.catalog.insert(
            id,
            ChunkBlueprint::new("plains").with_asset(AssetDescriptor::new(
                key.clone(),
                AssetCategory::Data,
                key,
            )),
        );
        self
    }

    /// Chunk with a texture, an ambient track and a layout blob
    pub fn full_chunk(mut self, id: &str) -> Self {
        let texture = format!("{id}/terrain");
        let audio = format!("{id}/ambient");
        let layout = format!("{id}/layout");
        self.source.insert(texture.clone(), solid_raw_image(8, 8, [10, 200, 30, 255]));
        self.source.insert(audio.clone(), encode_raw_audio(8_000, 1, &[120i16; 100]));
        self.source.insert(layout.clone(), vec![5u8; 50]);
        self.catalog.insert(
            id,
            ChunkBlueprint::new("forest")
                .with_asset(AssetDescriptor::new(texture.clone(), AssetCategory::Texture, texture))
                .with_asset(AssetDescriptor::new(audio.clone(), AssetCategory::Audio, audio))
                .with_asset(AssetDescriptor::new(layout.clone(), AssetCategory::Data, layout)),
        );
        self
    }

    pub fn build(self, config: StreamConfig) -> Harness {
        let clock = ManualClock::new();
        let log = EventLog::new();
        let engine = StreamingEngine::builder()
            .with_config(config)
            .with_catalog(self.catalog)
            .with_source(self.source.clone())
            .with_clock(clock.clone())
            .build()
            .unwrap();
        engine.add_observer(log.clone());
        Harness {
            engine,
            source: self.source,
            clock,
            log,
        }
    }
}

/// `RIMG` sprite with the given dimensions
pub fn sprite(width: u32, height: u32) -> Vec<u8> {
    solid_raw_image(width, height, [255, 255, 255, 255])
}
