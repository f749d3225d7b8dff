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

//! Archetype Stream - chunk and asset streaming
//!
//! Observer-driven chunk streaming with LOD, a priority scheduler with
//! admission control, per-category asset caches under one memory budget and
//! a progressive compression pipeline.

pub mod assets;
pub mod chunk;
pub mod clock;
pub mod compression;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod media;
pub mod memory;
pub mod prelude;
pub mod profiling;
pub mod scheduler;
pub mod source;
pub mod spatial;

pub use config::StreamConfig;
pub use engine::{EngineBuilder, SharedEngine, StreamingEngine};
pub use error::{Result, StreamError};
