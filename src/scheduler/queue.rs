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

//! Ordered, de-duplicated request queue.
//!
//! Requests are ranked by priority (Critical first), then by timestamp, then
//! by submission order. At most one request per target id is pending.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::scheduler::{PendingRequest, Priority};

/// (priority rank, timestamp, submission sequence)
type QueueKey = (u8, u64, u64);

/// Outcome of [`RequestQueue::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Inserted,
    /// An existing entry for the same target was replaced
    Merged,
}

#[derive(Debug, Clone, Default)]
pub struct RequestQueue {
    entries: BTreeMap<QueueKey, PendingRequest>,
    index: FxHashMap<String, QueueKey>,
    next_seq: u64,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a request, replacing any pending request for the same target.
    ///
    /// When both are loads (or both unloads) the merged entry keeps the more
    /// urgent priority and the newer timestamp, with the remaining fields
    /// taken from the new request. A request of the other kind replaces the
    /// pending one outright.
    pub fn push(&mut self, request: PendingRequest) -> PushOutcome {
        let mut request = request;
        let outcome = match self.remove(request.target()) {
            Some(previous) => {
                if previous.is_unload() == request.is_unload() {
                    let priority = previous.priority().min(request.priority());
                    let timestamp = previous.timestamp().max(request.timestamp());
                    request.set_priority(priority);
                    request.set_timestamp(timestamp);
                }
                PushOutcome::Merged
            }
            None => PushOutcome::Inserted,
        };

        let key = (request.priority().rank(), request.timestamp(), self.next_seq);
        self.next_seq += 1;
        self.index.insert(request.target().to_string(), key);
        self.entries.insert(key, request);
        outcome
    }

    /// Next request in order
    pub fn peek(&self) -> Option<&PendingRequest> {
        self.entries.values().next()
    }

    pub fn pop(&mut self) -> Option<PendingRequest> {
        let (_, request) = self.entries.pop_first()?;
        self.index.remove(request.target());
        Some(request)
    }

    pub fn remove(&mut self, target: &str) -> Option<PendingRequest> {
        let key = self.index.remove(target)?;
        self.entries.remove(&key)
    }

    pub fn get(&self, target: &str) -> Option<&PendingRequest> {
        self.index.get(target).and_then(|key| self.entries.get(key))
    }

    pub fn contains(&self, target: &str) -> bool {
        self.index.contains_key(target)
    }

    pub fn priority_of(&self, target: &str) -> Option<Priority> {
        self.get(target).map(PendingRequest::priority)
    }

    /// Remove and return every pending unload, in queue order
    pub fn take_unloads(&mut self) -> Vec<PendingRequest> {
        let keys: Vec<QueueKey> = self
            .entries
            .iter()
            .filter(|(_, request)| request.is_unload())
            .map(|(key, _)| *key)
            .collect();
        let mut unloads = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(request) = self.entries.remove(&key) {
                self.index.remove(request.target());
                unloads.push(request);
            }
        }
        unloads
    }

    /// Pending requests in order
    pub fn iter(&self) -> impl Iterator<Item = &PendingRequest> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count_unloads(&self) -> usize {
        self.entries.values().filter(|r| r.is_unload()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{LoadRequest, UnloadReason, UnloadRequest};

    fn load(target: &str, priority: Priority, timestamp: u64) -> PendingRequest {
        PendingRequest::Load(LoadRequest::new(target, priority, "test", timestamp))
    }

    fn order(queue: &RequestQueue) -> Vec<String> {
        queue.iter().map(|r| r.target().to_string()).collect()
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = RequestQueue::new();
        queue.push(load("c", Priority::Low, 1));
        queue.push(load("a", Priority::Normal, 5));
        queue.push(load("b", Priority::Normal, 2));
        queue.push(load("d", Priority::Critical, 9));
        assert_eq!(order(&queue), vec!["d", "b", "a", "c"]);
    }

    #[test]
    fn test_equal_timestamps_keep_submission_order() {
        let mut queue = RequestQueue::new();
        queue.push(load("x", Priority::High, 3));
        queue.push(load("y", Priority::High, 3));
        assert_eq!(order(&queue), vec!["x", "y"]);
    }

    #[test]
    fn test_duplicate_escalates_and_keeps_newer_timestamp() {
        let mut queue = RequestQueue::new();
        queue.push(load("a", Priority::Low, 1));
        queue.push(load("b", Priority::High, 2));
        assert_eq!(queue.push(load("a", Priority::High, 3)), PushOutcome::Merged);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.priority_of("a"), Some(Priority::High));
        assert_eq!(order(&queue), vec!["b", "a"]);
    }

    #[test]
    fn test_stale_duplicate_never_downgrades() {
        let mut queue = RequestQueue::new();
        queue.push(load("a", Priority::Critical, 4));
        queue.push(load("a", Priority::Low, 2));
        let pending = queue.get("a").unwrap();
        assert_eq!(pending.priority(), Priority::Critical);
        assert_eq!(pending.timestamp(), 4);
    }

    #[test]
    fn test_unload_replaces_pending_load() {
        let mut queue = RequestQueue::new();
        queue.push(load("a", Priority::Normal, 1));
        queue.push(PendingRequest::Unload(UnloadRequest::new(
            "a",
            Priority::Low,
            UnloadReason::Distance,
            2,
        )));
        assert_eq!(queue.len(), 1);
        assert!(queue.get("a").unwrap().is_unload());
        assert_eq!(queue.take_unloads().len(), 1);
        assert!(queue.is_empty());
        assert!(!queue.contains("a"));
    }

    #[test]
    fn test_pop_keeps_index_consistent() {
        let mut queue = RequestQueue::new();
        queue.push(load("a", Priority::Normal, 1));
        queue.push(load("b", Priority::Normal, 2));
        assert_eq!(queue.pop().unwrap().target(), "a");
        assert!(!queue.contains("a"));
        assert!(queue.contains("b"));
    }
}
