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

//! # Profiling Guide
//!
//! Lifecycle transitions are always logged through `tracing` events. With the
//! `profiling` feature the engine also opens spans around its hot paths:
//!
//! - `engine.tick` and `scheduler.tick`
//! - `chunks.load`
//! - `compression.progressive_tiers`
//! - `assets.build_atlas`
//!
//! ```toml
//! [dependencies]
//! archetype_stream = { version = "0.1", features = ["profiling"] }
//! ```
//!
//! ```ignore
//! let _guard = archetype_stream::profiling::init_tracing("trace.json")?;
//! let mut engine = StreamingEngine::new(StreamConfig::default())?;
//! engine.update_observer(Vec3::ZERO);
//! engine.tick();
//! ```
//!
//! Use `RUST_LOG=archetype_stream=debug` to see every transition. Keep the
//! returned guard alive until shutdown or buffered lines are lost.

#[cfg(feature = "profiling")]
pub use tracing_appender::non_blocking::WorkerGuard;

/// Install a global JSON subscriber writing to `path` through a
/// non-blocking appender. The filter comes from `RUST_LOG`, defaulting to
/// `archetype_stream=debug`.
#[cfg(feature = "profiling")]
pub fn init_tracing(path: impl AsRef<std::path::Path>) -> crate::error::Result<WorkerGuard> {
    use tracing_subscriber::EnvFilter;

    let file = std::fs::File::create(path)?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("archetype_stream=debug"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|err| crate::error::StreamError::InvalidState(format!("tracing already installed: {err}")))?;

    Ok(guard)
}
