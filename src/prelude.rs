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

//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use archetype_stream::prelude::*;
//! ```

pub use crate::assets::{AssetCategory, AssetDescriptor, AssetRecord, AssetStatus, AtlasLayout};
pub use crate::chunk::{
    ChunkBlueprint, ChunkId, ChunkRecord, ChunkStatus, GridCatalog, StaticCatalog, WorldCatalog,
};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::compression::{CompressionResult, Format, Quality};
pub use crate::config::StreamConfig;
pub use crate::engine::{EngineBuilder, SharedEngine, StreamingEngine};
pub use crate::error::{Result, StreamError};
pub use crate::event::{EventLog, StreamEvent, StreamObserver};
pub use crate::scheduler::{LoadHandle, Priority, UnloadReason};
pub use crate::source::{AssetSource, DirectorySource, MemorySource};
pub use glam::Vec3;
