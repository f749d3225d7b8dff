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

//! Streaming events.
//!
//! The engine publishes fire-and-forget [`StreamEvent`]s to an [`EventHub`].
//! Collaborators either register a [`StreamObserver`] (called inline, in
//! publish order) or take a channel receiver with [`EventHub::subscribe`].

use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::compression::CompressionResult;
use crate::scheduler::UnloadReason;

/// Signal published by the streaming engine
#[derive(Debug, Clone)]
pub enum StreamEvent {
    ChunkLoaded {
        id: String,
        from_cache: bool,
        load_time_ms: u64,
    },
    ChunkUnloaded {
        id: String,
        reason: UnloadReason,
    },
    ChunkLoadFailed {
        id: String,
        error: String,
    },
    ChunkBecameVisible {
        id: String,
    },
    ChunkBecameHidden {
        id: String,
    },
    AssetLoaded {
        id: String,
    },
    AssetUnloaded {
        id: String,
    },
    AssetLoadFailed {
        id: String,
        error: String,
    },
    CompressionCompleted {
        id: String,
        result: CompressionResult,
    },
    AtlasCreated {
        id: String,
        size: (u32, u32),
    },
}

impl StreamEvent {
    /// Id of the chunk, asset or atlas the event is about
    pub fn target(&self) -> &str {
        match self {
            StreamEvent::ChunkLoaded { id, .. }
            | StreamEvent::ChunkUnloaded { id, .. }
            | StreamEvent::ChunkLoadFailed { id, .. }
            | StreamEvent::ChunkBecameVisible { id }
            | StreamEvent::ChunkBecameHidden { id }
            | StreamEvent::AssetLoaded { id }
            | StreamEvent::AssetUnloaded { id }
            | StreamEvent::AssetLoadFailed { id, .. }
            | StreamEvent::CompressionCompleted { id, .. }
            | StreamEvent::AtlasCreated { id, .. } => id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::ChunkLoaded { .. } => "chunk_loaded",
            StreamEvent::ChunkUnloaded { .. } => "chunk_unloaded",
            StreamEvent::ChunkLoadFailed { .. } => "chunk_load_failed",
            StreamEvent::ChunkBecameVisible { .. } => "chunk_became_visible",
            StreamEvent::ChunkBecameHidden { .. } => "chunk_became_hidden",
            StreamEvent::AssetLoaded { .. } => "asset_loaded",
            StreamEvent::AssetUnloaded { .. } => "asset_unloaded",
            StreamEvent::AssetLoadFailed { .. } => "asset_load_failed",
            StreamEvent::CompressionCompleted { .. } => "compression_completed",
            StreamEvent::AtlasCreated { .. } => "atlas_created",
        }
    }
}

/// Observer that reacts to streaming events
pub trait StreamObserver: Send + Sync {
    /// Called once per published event, outside the hub lock
    fn on_event(&self, event: &StreamEvent);

    /// Get name for debugging
    fn name(&self) -> &str {
        "StreamObserver"
    }
}

#[derive(Default)]
struct HubState {
    senders: Vec<Sender<StreamEvent>>,
    observers: Vec<Arc<dyn StreamObserver>>,
    published: u64,
}

/// Publish/subscribe hub. Clones share the same subscribers.
#[derive(Clone, Default)]
pub struct EventHub {
    state: Arc<Mutex<HubState>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receiver of every event published from now on
    pub fn subscribe(&self) -> Receiver<StreamEvent> {
        let (tx, rx) = unbounded();
        self.state.lock().senders.push(tx);
        rx
    }

    pub fn add_observer(&self, observer: Arc<dyn StreamObserver>) {
        self.state.lock().observers.push(observer);
    }

    /// Deliver an event to observers, then to channel subscribers.
    /// Subscribers whose receiver was dropped are pruned.
    ///
    /// Observers run without the hub lock held, so they may publish.
    pub fn publish(&self, event: StreamEvent) {
        let observers = {
            let mut state = self.state.lock();
            state.published += 1;
            state.observers.clone()
        };
        for observer in &observers {
            observer.on_event(&event);
        }
        self.state
            .lock()
            .senders
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn published_count(&self) -> u64 {
        self.state.lock().published
    }

    pub fn subscriber_count(&self) -> usize {
        let state = self.state.lock();
        state.senders.len() + state.observers.len()
    }
}

/// Observer that keeps every event it sees; handy for hosts that poll
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<StreamEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl StreamObserver for EventLog {
    fn on_event(&self, event: &StreamEvent) {
        self.events.lock().push(event.clone());
    }

    fn name(&self) -> &str {
        "EventLog"
    }
}
