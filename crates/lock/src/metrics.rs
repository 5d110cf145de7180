// Copyright 2025 XylemDB Team
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

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hot-path counters. Plain relaxed atomics — the numbers are operational
/// telemetry, not synchronization.
#[derive(Debug, Default)]
pub(crate) struct LockMetrics {
    pub attempts: AtomicU64,
    pub acquires: AtomicU64,
    pub reentrant_acquires: AtomicU64,
    pub upgrades: AtomicU64,
    pub waits: AtomicU64,
    pub timeouts: AtomicU64,
    pub releases: AtomicU64,
    pub forced_releases: AtomicU64,
    pub not_held_errors: AtomicU64,
}

impl LockMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time metrics view for operational tooling.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// `attempt` calls seen.
    pub attempts: u64,
    /// Successful acquisitions, including reentrant and upgraded ones.
    pub acquires: u64,
    /// Acquisitions that bumped an existing hold.
    pub reentrant_acquires: u64,
    /// In-place or waited-for mode upgrades granted.
    pub upgrades: u64,
    /// Requests that had to park.
    pub waits: u64,
    /// Requests that gave up at their deadline.
    pub timeouts: u64,
    /// Successful releases.
    pub releases: u64,
    /// Holds dropped by `release_all`.
    pub forced_releases: u64,
    /// Releases rejected for lack of a matching hold.
    pub not_held_errors: u64,
    /// Diagnostic events displaced from the full queue.
    pub events_dropped: u64,
    /// Listener panics swallowed by the event bus.
    pub listener_panics: u64,
    /// Resources with live lock state right now.
    pub active_resources: usize,
    /// Owners holding at least one lock right now.
    pub active_owners: usize,
}

impl LockMetrics {
    pub fn snapshot(
        &self,
        events_dropped: u64,
        listener_panics: u64,
        active_resources: usize,
        active_owners: usize,
    ) -> MetricsSnapshot {
        MetricsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            acquires: self.acquires.load(Ordering::Relaxed),
            reentrant_acquires: self.reentrant_acquires.load(Ordering::Relaxed),
            upgrades: self.upgrades.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            forced_releases: self.forced_releases.load(Ordering::Relaxed),
            not_held_errors: self.not_held_errors.load(Ordering::Relaxed),
            events_dropped,
            listener_panics,
            active_resources,
            active_owners,
        }
    }
}
