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

#[cfg(feature = "profiling")]
use archetype_stream::prelude::*;
#[cfg(feature = "profiling")]
use std::time::Instant;

/// Synthesize bytes for the `GridCatalog` key layout
#[cfg(feature = "profiling")]
fn synthetic_asset(key: &str) -> Result<Vec<u8>> {
    use archetype_stream::media::{encode_raw_audio, solid_raw_image};

    if key.ends_with("/terrain") {
        Ok(solid_raw_image(128, 128, [90, 140, 60, 255]))
    } else if key.ends_with("/ambient") {
        let samples: Vec<i16> = (0..22_050).map(|i| ((i % 64) * 256) as i16).collect();
        Ok(encode_raw_audio(22_050, 1, &samples))
    } else {
        Ok(key.bytes().cycle().take(4096).collect())
    }
}

#[cfg(feature = "profiling")]
#[tracing::instrument(skip(engine))]
fn walk(engine: &mut StreamingEngine, steps: u32) {
    for step in 0..steps {
        if step % 10 == 0 {
            tracing::info!("Walking step {}/{}", step, steps);
        }
        engine.update_observer(Vec3::new(step as f32 * 16.0, 0.0, 0.0));
        engine.tick();
    }
}

#[cfg(feature = "profiling")]
fn main() -> Result<()> {
    let _guard = archetype_stream::profiling::init_tracing("trace.json")?;

    let config = StreamConfig::default()
        .with_hard_budget(64 * 1024 * 1024)
        .with_distances(3.0, 5.0);
    let mut engine = StreamingEngine::builder()
        .with_config(config)
        .with_catalog(GridCatalog::new(7))
        .with_source(synthetic_asset)
        .build()?;

    println!("Warming up...");
    {
        let _span = tracing::info_span!("warmup").entered();
        engine.update_observer(Vec3::ZERO);
        engine.tick();
    }

    println!("Profiling observer walk...");
    let start = Instant::now();
    walk(&mut engine, 200);
    println!("Walk complete in: {:?}", start.elapsed());

    let stats = engine.chunk_stats();
    println!(
        "chunks: {} active, {} cached, {} evicted; memory {} bytes",
        stats.active,
        stats.cached,
        stats.evictions,
        engine.memory_used()
    );
    println!("assets: {}", serde_json::to_string_pretty(&engine.asset_stats())?);
    Ok(())
}

#[cfg(not(feature = "profiling"))]
fn main() {
    println!("stream_profile binary requires --features profiling");
}
