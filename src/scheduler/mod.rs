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

// Priority Scheduler Module
//
// Provides:
// - Two request queues (chunks, assets) with one ordering rule
// - Admission control against in-flight set, memory budget and active ceilings
// - Tick draining through a caller-supplied driver
// - Shared load handles for request coalescing

pub mod handle;
pub mod queue;

pub use handle::LoadHandle;
pub use queue::{PushOutcome, RequestQueue};

use serde::{Deserialize, Serialize};
use tracing::debug;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::compression::Quality;
use crate::error::{Result, StreamError};

/// Request priority. Lower rank drains first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn is_critical(self) -> bool {
        self == Priority::Critical
    }
}

/// Which logical queue a request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Chunk,
    Asset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnloadReason {
    Distance,
    Memory,
    Performance,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadRequest {
    pub target: String,
    pub priority: Priority,
    pub requester: String,
    pub timestamp: u64,
    /// Quality override; chunk loads otherwise follow the chunk's LOD
    pub quality: Option<Quality>,
}

impl LoadRequest {
    pub fn new(
        target: impl Into<String>,
        priority: Priority,
        requester: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            target: target.into(),
            priority,
            requester: requester.into(),
            timestamp,
            quality: None,
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = Some(quality);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnloadRequest {
    pub target: String,
    pub priority: Priority,
    pub reason: UnloadReason,
    pub timestamp: u64,
}

impl UnloadRequest {
    pub fn new(target: impl Into<String>, priority: Priority, reason: UnloadReason, timestamp: u64) -> Self {
        Self {
            target: target.into(),
            priority,
            reason,
            timestamp,
        }
    }
}

/// A queued load or unload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PendingRequest {
    Load(LoadRequest),
    Unload(UnloadRequest),
}

impl PendingRequest {
    pub fn target(&self) -> &str {
        match self {
            PendingRequest::Load(r) => &r.target,
            PendingRequest::Unload(r) => &r.target,
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            PendingRequest::Load(r) => r.priority,
            PendingRequest::Unload(r) => r.priority,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            PendingRequest::Load(r) => r.timestamp,
            PendingRequest::Unload(r) => r.timestamp,
        }
    }

    pub fn is_unload(&self) -> bool {
        matches!(self, PendingRequest::Unload(_))
    }

    fn set_priority(&mut self, priority: Priority) {
        match self {
            PendingRequest::Load(r) => r.priority = priority,
            PendingRequest::Unload(r) => r.priority = priority,
        }
    }

    fn set_timestamp(&mut self, timestamp: u64) {
        match self {
            PendingRequest::Load(r) => r.timestamp = timestamp,
            PendingRequest::Unload(r) => r.timestamp = timestamp,
        }
    }
}

/// Admission decision for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Critical request admitted while above the soft threshold; an eviction
    /// pass runs before it executes
    AdmittedWithEviction,
    RefusedInFlight,
    RefusedOverBudget,
    RefusedAtCapacity,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        matches!(self, Admission::Admitted | Admission::AdmittedWithEviction)
    }
}

/// State that admission control reads
pub trait AdmissionState {
    fn is_in_flight(&self, kind: ResourceKind, target: &str) -> bool;
    fn memory_over_soft(&self) -> bool;
    /// Active plus in-flight count
    fn active_count(&self, kind: ResourceKind) -> usize;
    fn active_ceiling(&self, kind: ResourceKind) -> usize;
}

/// Executes admitted requests on behalf of [`Scheduler::tick`]
pub trait TickDriver: AdmissionState {
    fn evict(&mut self, kind: ResourceKind);
    fn execute(&mut self, kind: ResourceKind, request: PendingRequest) -> Result<()>;
}

/// What one tick did
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub executed: Vec<String>,
    /// Requests dropped because a load for the same id was already in flight
    pub coalesced: Vec<String>,
    pub failed: Vec<(String, StreamError)>,
    /// Requests left pending because admission was refused
    pub deferred: usize,
    pub evictions: usize,
}

impl TickReport {
    pub fn merge(&mut self, other: TickReport) {
        self.executed.extend(other.executed);
        self.coalesced.extend(other.coalesced);
        self.failed.extend(other.failed);
        self.deferred += other.deferred;
        self.evictions += other.evictions;
    }
}

/// Snapshot of queue depth and lifetime counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub pending_chunk_loads: usize,
    pub pending_chunk_unloads: usize,
    pub pending_asset_loads: usize,
    pub pending_asset_unloads: usize,
    pub submitted: u64,
    pub merged: u64,
    pub executed: u64,
    pub coalesced: u64,
    pub failed: u64,
    pub refused_over_budget: u64,
    pub refused_at_capacity: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone, Default)]
struct Counters {
    submitted: u64,
    merged: u64,
    executed: u64,
    coalesced: u64,
    failed: u64,
    refused_over_budget: u64,
    refused_at_capacity: u64,
    evictions: u64,
}

/// Pending load/unload work for chunks and assets
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    chunk_queue: RequestQueue,
    asset_queue: RequestQueue,
    counters: Counters,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, kind: ResourceKind) -> &RequestQueue {
        match kind {
            ResourceKind::Chunk => &self.chunk_queue,
            ResourceKind::Asset => &self.asset_queue,
        }
    }

    fn queue_mut(&mut self, kind: ResourceKind) -> &mut RequestQueue {
        match kind {
            ResourceKind::Chunk => &mut self.chunk_queue,
            ResourceKind::Asset => &mut self.asset_queue,
        }
    }

    pub fn submit(&mut self, kind: ResourceKind, request: PendingRequest) -> PushOutcome {
        debug!(
            ?kind,
            target = request.target(),
            priority = ?request.priority(),
            unload = request.is_unload(),
            "request submitted"
        );
        let outcome = self.queue_mut(kind).push(request);
        self.counters.submitted += 1;
        if outcome == PushOutcome::Merged {
            self.counters.merged += 1;
        }
        outcome
    }

    pub fn submit_load(&mut self, kind: ResourceKind, request: LoadRequest) -> PushOutcome {
        self.submit(kind, PendingRequest::Load(request))
    }

    pub fn submit_unload(&mut self, kind: ResourceKind, request: UnloadRequest) -> PushOutcome {
        self.submit(kind, PendingRequest::Unload(request))
    }

    /// Drop a pending request. Work already executing is not affected.
    pub fn cancel(&mut self, kind: ResourceKind, target: &str) -> Option<PendingRequest> {
        self.queue_mut(kind).remove(target)
    }

    /// Drop a pending unload for `target`; a pending load is left queued
    pub fn cancel_unload(&mut self, kind: ResourceKind, target: &str) -> Option<UnloadRequest> {
        if !self.queue(kind).get(target).is_some_and(PendingRequest::is_unload) {
            return None;
        }
        match self.queue_mut(kind).remove(target) {
            Some(PendingRequest::Unload(request)) => Some(request),
            _ => None,
        }
    }

    pub fn is_pending(&self, kind: ResourceKind, target: &str) -> bool {
        self.queue(kind).contains(target)
    }

    pub fn pending(&self, kind: ResourceKind) -> usize {
        self.queue(kind).len()
    }

    /// Admission control for one request
    pub fn admit<S: AdmissionState + ?Sized>(
        &self,
        kind: ResourceKind,
        request: &PendingRequest,
        state: &S,
    ) -> Admission {
        if request.is_unload() {
            return Admission::Admitted;
        }
        if state.is_in_flight(kind, request.target()) {
            return Admission::RefusedInFlight;
        }
        if request.priority().is_critical() {
            return if state.memory_over_soft() {
                Admission::AdmittedWithEviction
            } else {
                Admission::Admitted
            };
        }
        if state.memory_over_soft() {
            return Admission::RefusedOverBudget;
        }
        if state.active_count(kind) >= state.active_ceiling(kind) {
            return Admission::RefusedAtCapacity;
        }
        Admission::Admitted
    }

    /// Drain one queue in order while admission allows.
    ///
    /// A load that leaves usage above the soft threshold is followed by an
    /// eviction pass before the next request is considered.
    /// The first refused load stops the drain so later requests never
    /// overtake it; pending unloads still run because they only free memory.
    pub fn tick<D: TickDriver + ?Sized>(&mut self, kind: ResourceKind, driver: &mut D) -> TickReport {
        #[cfg(feature = "profiling")]
        let span = info_span!("scheduler.tick", ?kind, pending = self.pending(kind));
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        let mut report = TickReport::default();
        let mut blocked = false;

        loop {
            let admission = match self.queue(kind).peek() {
                Some(head) => self.admit(kind, head, &*driver),
                None => break,
            };
            match admission {
                Admission::Admitted | Admission::AdmittedWithEviction => {
                    if admission == Admission::AdmittedWithEviction {
                        driver.evict(kind);
                        report.evictions += 1;
                        self.counters.evictions += 1;
                    }
                    if let Some(request) = self.queue_mut(kind).pop() {
                        let is_load = !request.is_unload();
                        self.run(kind, request, driver, &mut report);
                        if is_load && driver.memory_over_soft() {
                            debug!(?kind, "load crossed the soft threshold, evicting");
                            driver.evict(kind);
                            report.evictions += 1;
                            self.counters.evictions += 1;
                        }
                    }
                }
                Admission::RefusedInFlight => {
                    if let Some(request) = self.queue_mut(kind).pop() {
                        debug!(?kind, target = request.target(), "coalesced with in-flight load");
                        self.counters.coalesced += 1;
                        report.coalesced.push(request.target().to_string());
                    }
                }
                Admission::RefusedOverBudget | Admission::RefusedAtCapacity => {
                    if admission == Admission::RefusedOverBudget {
                        self.counters.refused_over_budget += 1;
                    } else {
                        self.counters.refused_at_capacity += 1;
                    }
                    blocked = true;
                    break;
                }
            }
        }

        if blocked {
            for request in self.queue_mut(kind).take_unloads() {
                self.run(kind, request, driver, &mut report);
            }
            report.deferred = self.pending(kind);
            debug!(?kind, deferred = report.deferred, "tick stopped by admission control");
        }

        report
    }

    fn run<D: TickDriver + ?Sized>(
        &mut self,
        kind: ResourceKind,
        request: PendingRequest,
        driver: &mut D,
        report: &mut TickReport,
    ) {
        let target = request.target().to_string();
        match driver.execute(kind, request) {
            Ok(()) => {
                self.counters.executed += 1;
                report.executed.push(target);
            }
            Err(err) => {
                self.counters.failed += 1;
                report.failed.push((target, err));
            }
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        let chunk_unloads = self.chunk_queue.count_unloads();
        let asset_unloads = self.asset_queue.count_unloads();
        SchedulerStats {
            pending_chunk_loads: self.chunk_queue.len() - chunk_unloads,
            pending_chunk_unloads: chunk_unloads,
            pending_asset_loads: self.asset_queue.len() - asset_unloads,
            pending_asset_unloads: asset_unloads,
            submitted: self.counters.submitted,
            merged: self.counters.merged,
            executed: self.counters.executed,
            coalesced: self.counters.coalesced,
            failed: self.counters.failed,
            refused_over_budget: self.counters.refused_over_budget,
            refused_at_capacity: self.counters.refused_at_capacity,
            evictions: self.counters.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Default)]
    struct FakeDriver {
        over_soft: bool,
        active: usize,
        ceiling: usize,
        in_flight: HashSet<String>,
        executed: Vec<String>,
        evictions: usize,
        free_on_evict: bool,
        /// Loads that push memory over the soft threshold, 0 for never
        over_soft_after: usize,
    }

    impl AdmissionState for FakeDriver {
        fn is_in_flight(&self, _: ResourceKind, target: &str) -> bool {
            self.in_flight.contains(target)
        }
        fn memory_over_soft(&self) -> bool {
            self.over_soft
        }
        fn active_count(&self, _: ResourceKind) -> usize {
            self.active
        }
        fn active_ceiling(&self, _: ResourceKind) -> usize {
            self.ceiling
        }
    }

    impl TickDriver for FakeDriver {
        fn evict(&mut self, _: ResourceKind) {
            self.evictions += 1;
            if self.free_on_evict {
                self.over_soft = false;
            }
        }
        fn execute(&mut self, _: ResourceKind, request: PendingRequest) -> Result<()> {
            if request.target() == "broken" {
                return Err(StreamError::ChunkNotFound("broken".into()));
            }
            self.executed.push(request.target().to_string());
            if !request.is_unload() {
                self.active += 1;
                if self.over_soft_after > 0 && self.active >= self.over_soft_after {
                    self.over_soft = true;
                }
            }
            Ok(())
        }
    }

    fn driver() -> FakeDriver {
        FakeDriver {
            ceiling: 100,
            ..Default::default()
        }
    }

    fn load(target: &str, priority: Priority, ts: u64) -> LoadRequest {
        LoadRequest::new(target, priority, "test", ts)
    }

    #[test]
    fn test_admission_rules() {
        let scheduler = Scheduler::new();
        let mut state = driver();
        let normal = PendingRequest::Load(load("a", Priority::Normal, 0));
        let critical = PendingRequest::Load(load("a", Priority::Critical, 0));
        let unload = PendingRequest::Unload(UnloadRequest::new("a", Priority::Low, UnloadReason::Manual, 0));

        assert_eq!(scheduler.admit(ResourceKind::Chunk, &normal, &state), Admission::Admitted);

        state.over_soft = true;
        assert_eq!(
            scheduler.admit(ResourceKind::Chunk, &normal, &state),
            Admission::RefusedOverBudget
        );
        assert_eq!(
            scheduler.admit(ResourceKind::Chunk, &critical, &state),
            Admission::AdmittedWithEviction
        );
        assert_eq!(scheduler.admit(ResourceKind::Chunk, &unload, &state), Admission::Admitted);

        state.over_soft = false;
        state.active = 100;
        assert_eq!(
            scheduler.admit(ResourceKind::Chunk, &normal, &state),
            Admission::RefusedAtCapacity
        );

        state.in_flight.insert("a".into());
        assert_eq!(
            scheduler.admit(ResourceKind::Chunk, &critical, &state),
            Admission::RefusedInFlight
        );
    }

    #[test]
    fn test_tick_drains_in_order() {
        let mut scheduler = Scheduler::new();
        scheduler.submit_load(ResourceKind::Chunk, load("low", Priority::Low, 1));
        scheduler.submit_load(ResourceKind::Chunk, load("high", Priority::High, 3));
        scheduler.submit_load(ResourceKind::Chunk, load("normal", Priority::Normal, 2));

        let mut state = driver();
        let report = scheduler.tick(ResourceKind::Chunk, &mut state);
        assert_eq!(state.executed, vec!["high", "normal", "low"]);
        assert_eq!(report.executed.len(), 3);
        assert_eq!(scheduler.pending(ResourceKind::Chunk), 0);
    }

    #[test]
    fn test_over_budget_defers_normal_but_runs_unloads() {
        let mut scheduler = Scheduler::new();
        scheduler.submit_load(ResourceKind::Chunk, load("a", Priority::Normal, 1));
        scheduler.submit_load(ResourceKind::Chunk, load("b", Priority::Normal, 2));
        scheduler.submit_unload(
            ResourceKind::Chunk,
            UnloadRequest::new("old", Priority::Low, UnloadReason::Memory, 3),
        );

        let mut state = driver();
        state.over_soft = true;
        let report = scheduler.tick(ResourceKind::Chunk, &mut state);
        assert_eq!(state.executed, vec!["old"]);
        assert_eq!(report.deferred, 2);

        state.over_soft = false;
        scheduler.tick(ResourceKind::Chunk, &mut state);
        assert_eq!(state.executed, vec!["old", "a", "b"]);
        assert_eq!(scheduler.stats().refused_over_budget, 1);
    }

    #[test]
    fn test_critical_evicts_first() {
        let mut scheduler = Scheduler::new();
        scheduler.submit_load(ResourceKind::Asset, load("hero", Priority::Critical, 1));
        scheduler.submit_load(ResourceKind::Asset, load("grass", Priority::Normal, 2));

        let mut state = driver();
        state.over_soft = true;
        state.free_on_evict = true;
        let report = scheduler.tick(ResourceKind::Asset, &mut state);
        assert_eq!(report.evictions, 1);
        assert_eq!(state.executed, vec!["hero", "grass"]);
    }

    #[test]
    fn test_load_crossing_soft_threshold_triggers_eviction() {
        let mut scheduler = Scheduler::new();
        for (i, target) in ["a", "b", "c", "d"].into_iter().enumerate() {
            scheduler.submit_load(ResourceKind::Chunk, load(target, Priority::Normal, i as u64));
        }

        let mut state = driver();
        state.over_soft_after = 2;
        state.free_on_evict = true;
        let report = scheduler.tick(ResourceKind::Chunk, &mut state);
        assert_eq!(state.executed, vec!["a", "b", "c", "d"]);
        assert_eq!(report.evictions, 3);
        assert_eq!(state.evictions, 3);
        assert!(!state.over_soft);
    }

    #[test]
    fn test_cancel_unload_leaves_loads_queued() {
        let mut scheduler = Scheduler::new();
        scheduler.submit_load(ResourceKind::Chunk, load("near", Priority::Normal, 1));
        scheduler.submit_unload(
            ResourceKind::Chunk,
            UnloadRequest::new("far", Priority::Low, UnloadReason::Distance, 2),
        );

        assert!(scheduler.cancel_unload(ResourceKind::Chunk, "near").is_none());
        assert!(scheduler.is_pending(ResourceKind::Chunk, "near"));
        let withdrawn = scheduler.cancel_unload(ResourceKind::Chunk, "far").unwrap();
        assert_eq!(withdrawn.reason, UnloadReason::Distance);
        assert_eq!(scheduler.pending(ResourceKind::Chunk), 1);
    }

    #[test]
    fn test_in_flight_duplicates_are_coalesced() {
        let mut scheduler = Scheduler::new();
        scheduler.submit_load(ResourceKind::Chunk, load("busy", Priority::High, 1));
        scheduler.submit_load(ResourceKind::Chunk, load("idle", Priority::High, 2));

        let mut state = driver();
        state.in_flight.insert("busy".into());
        let report = scheduler.tick(ResourceKind::Chunk, &mut state);
        assert_eq!(report.coalesced, vec!["busy".to_string()]);
        assert_eq!(state.executed, vec!["idle"]);
    }

    #[test]
    fn test_failures_do_not_stop_the_drain() {
        let mut scheduler = Scheduler::new();
        scheduler.submit_load(ResourceKind::Chunk, load("broken", Priority::High, 1));
        scheduler.submit_load(ResourceKind::Chunk, load("fine", Priority::High, 2));

        let mut state = driver();
        let report = scheduler.tick(ResourceKind::Chunk, &mut state);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(state.executed, vec!["fine"]);
        assert_eq!(scheduler.stats().failed, 1);
    }

    #[test]
    fn test_stats_split_loads_and_unloads() {
        let mut scheduler = Scheduler::new();
        scheduler.submit_load(ResourceKind::Chunk, load("a", Priority::Normal, 1));
        scheduler.submit_load(ResourceKind::Chunk, load("a", Priority::High, 2));
        scheduler.submit_unload(
            ResourceKind::Asset,
            UnloadRequest::new("tex", Priority::Low, UnloadReason::Manual, 3),
        );
        let stats = scheduler.stats();
        assert_eq!(stats.pending_chunk_loads, 1);
        assert_eq!(stats.pending_asset_unloads, 1);
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.merged, 1);
    }
}
