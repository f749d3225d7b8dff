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

//! Shared handle to the outcome of a pending load.
//!
//! Every caller that requests the same id while a load is pending receives a
//! handle to the same slot. The slot resolves exactly once and every attached
//! handle observes the same outcome.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, StreamError};

enum LoadState<T> {
    Pending,
    Ready(T),
    Failed(StreamError),
}

struct Slot<T> {
    state: Mutex<LoadState<T>>,
    resolved: Condvar,
    waiters: AtomicUsize,
}

pub struct LoadHandle<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Clone for LoadHandle<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for LoadHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.slot.state.lock() {
            LoadState::Pending => "pending",
            LoadState::Ready(_) => "ready",
            LoadState::Failed(_) => "failed",
        };
        f.debug_struct("LoadHandle")
            .field("state", &state)
            .field("waiters", &self.slot.waiters.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T: Clone> LoadHandle<T> {
    /// Unresolved handle with one waiter
    pub fn new() -> Self {
        Self::with_state(LoadState::Pending)
    }

    /// Handle that is already resolved with `value`
    pub fn ready(value: T) -> Self {
        Self::with_state(LoadState::Ready(value))
    }

    pub fn failed(error: StreamError) -> Self {
        Self::with_state(LoadState::Failed(error))
    }

    fn with_state(state: LoadState<T>) -> Self {
        Self {
            slot: Arc::new(Slot {
                state: Mutex::new(state),
                resolved: Condvar::new(),
                waiters: AtomicUsize::new(1),
            }),
        }
    }

    /// Attach another caller to the same slot
    pub fn attach(&self) -> Self {
        self.slot.waiters.fetch_add(1, Ordering::Relaxed);
        self.clone()
    }

    /// Number of callers attached to this slot
    pub fn waiter_count(&self) -> usize {
        self.slot.waiters.load(Ordering::Relaxed)
    }

    /// Resolve with a value. Returns false if the slot was already resolved.
    pub fn complete(&self, value: T) -> bool {
        self.resolve(LoadState::Ready(value))
    }

    /// Resolve with an error. Returns false if the slot was already resolved.
    pub fn fail(&self, error: StreamError) -> bool {
        self.resolve(LoadState::Failed(error))
    }

    fn resolve(&self, outcome: LoadState<T>) -> bool {
        let mut state = self.slot.state.lock();
        if !matches!(*state, LoadState::Pending) {
            return false;
        }
        *state = outcome;
        self.slot.resolved.notify_all();
        true
    }

    /// Outcome if resolved, without blocking
    pub fn poll(&self) -> Option<Result<T>> {
        Self::read(&self.slot.state.lock())
    }

    pub fn is_finished(&self) -> bool {
        !matches!(*self.slot.state.lock(), LoadState::Pending)
    }

    /// Block until resolved or until `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.state.lock();
        while matches!(*state, LoadState::Pending) {
            if self
                .slot
                .resolved
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        Self::read(&state)
    }

    /// Whether two handles share a slot
    pub fn same_as(&self, other: &LoadHandle<T>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    fn read(state: &LoadState<T>) -> Option<Result<T>> {
        match state {
            LoadState::Pending => None,
            LoadState::Ready(value) => Some(Ok(value.clone())),
            LoadState::Failed(error) => Some(Err(error.clone())),
        }
    }
}

impl<T: Clone> Default for LoadHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}
