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

//! Memory budget tracking for resident asset bytes.
//!
//! The budget counts every byte the asset registry holds (active store plus
//! category caches). Admission control reads it to defer work above the soft
//! threshold; eviction passes are the only way usage goes back down.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::config::BudgetConfig;

/// Memory pressure level derived from utilization
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemoryPressure {
    /// Below half the budget
    Low,
    /// Between half the budget and the soft threshold
    Moderate,
    /// Above the soft threshold, at or below the hard budget
    High,
    /// Above the hard budget (only transiently, after a Critical admission)
    Critical,
}

impl MemoryPressure {
    /// Whether an eviction pass should run
    pub fn needs_eviction(&self) -> bool {
        matches!(self, MemoryPressure::High | MemoryPressure::Critical)
    }
}

/// Shared counter of resident bytes against a hard budget
#[derive(Debug)]
pub struct MemoryBudget {
    hard_budget: usize,
    soft_threshold: f64,
    used: AtomicUsize,
    peak: AtomicUsize,
}

impl MemoryBudget {
    pub fn new(config: &BudgetConfig) -> Self {
        Self {
            hard_budget: config.hard_budget,
            soft_threshold: config.soft_threshold,
            used: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Record bytes that became resident
    pub fn record_allocation(&self, bytes: usize) {
        let now = self.used.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    /// Record bytes that were permanently released
    pub fn record_release(&self, bytes: usize) {
        // Saturating: a release never drives the counter below zero.
        let mut current = self.used.load(Ordering::SeqCst);
        loop {
            let next = current.saturating_sub(bytes);
            match self
                .used
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    /// Highest usage observed
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn hard_budget(&self) -> usize {
        self.hard_budget
    }

    /// Soft threshold in bytes (80% of the budget by default)
    pub fn soft_limit(&self) -> usize {
        (self.hard_budget as f64 * self.soft_threshold) as usize
    }

    /// Usage strictly above the soft threshold
    pub fn is_over_soft(&self) -> bool {
        self.used() > self.soft_limit()
    }

    /// Usage strictly above the hard budget
    pub fn is_over_hard(&self) -> bool {
        self.used() > self.hard_budget
    }

    /// Utilization (0.0 to 1.0, may exceed 1.0 transiently)
    pub fn utilization(&self) -> f64 {
        if self.hard_budget == 0 {
            return 0.0;
        }
        self.used() as f64 / self.hard_budget as f64
    }

    pub fn pressure(&self) -> MemoryPressure {
        let used = self.used();
        if used > self.hard_budget {
            MemoryPressure::Critical
        } else if used > self.soft_limit() {
            MemoryPressure::High
        } else if used * 2 > self.hard_budget {
            MemoryPressure::Moderate
        } else {
            MemoryPressure::Low
        }
    }

    /// Bytes that must be released to get back under the soft threshold
    pub fn excess_over_soft(&self) -> usize {
        self.used().saturating_sub(self.soft_limit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(bytes: usize) -> MemoryBudget {
        MemoryBudget::new(&BudgetConfig {
            hard_budget: bytes,
            soft_threshold: 0.8,
        })
    }

    #[test]
    fn test_allocation_and_release() {
        let budget = budget(1000);
        budget.record_allocation(500);
        assert_eq!(budget.used(), 500);
        budget.record_release(200);
        assert_eq!(budget.used(), 300);
        budget.record_release(10_000);
        assert_eq!(budget.used(), 0);
        assert_eq!(budget.peak(), 500);
    }

    #[test]
    fn test_pressure_levels() {
        let budget = budget(1000);
        assert_eq!(budget.pressure(), MemoryPressure::Low);
        budget.record_allocation(600);
        assert_eq!(budget.pressure(), MemoryPressure::Moderate);
        budget.record_allocation(300);
        assert_eq!(budget.pressure(), MemoryPressure::High);
        assert!(budget.is_over_soft());
        assert_eq!(budget.excess_over_soft(), 100);
        budget.record_allocation(200);
        assert_eq!(budget.pressure(), MemoryPressure::Critical);
        assert!(budget.pressure().needs_eviction());
    }

    #[test]
    fn test_soft_limit_is_inclusive() {
        let budget = budget(1000);
        budget.record_allocation(800);
        assert!(!budget.is_over_soft());
        budget.record_allocation(1);
        assert!(budget.is_over_soft());
    }
}
