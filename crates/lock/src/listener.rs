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

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::events::{EventPhase, LockEvent};
use crate::types::{LockOwner, ResourceId};

/// Typed capability for receiving diagnostic lock events.
///
/// Called from the event bus consumer task, never from lock callers; a slow
/// or panicking implementation delays telemetry only, never acquisition.
pub trait LockEventListener: Send + Sync {
    fn on_event(&self, event: &LockEvent);
}

/// Counts events by phase. Handy for operation counting in benchmarks and
/// calibration runs.
#[derive(Debug, Default)]
pub struct EventCounter {
    attempted: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl EventCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempted(&self) -> u64 {
        self.attempted.load(Ordering::Relaxed)
    }

    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.attempted() + self.acquired() + self.released()
    }

    /// Poll until the counter has seen at least `n` events. Test helper for
    /// the asynchronous feed.
    pub async fn wait_for_total(&self, n: u64) {
        while self.total() < n {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

impl LockEventListener for EventCounter {
    fn on_event(&self, event: &LockEvent) {
        let counter = match event.phase {
            EventPhase::Attempted => &self.attempted,
            EventPhase::Acquired => &self.acquired,
            EventPhase::Released => &self.released,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct PendingWait {
    since: Instant,
    warned: bool,
}

/// Surfaces requests that wait past a threshold — the operational signal for
/// potential deadlock or starvation, since the manager runs no global
/// deadlock detector.
///
/// Pairs `Attempted` with the following `Acquired`/`Released` for the same
/// `(owner, resource)` and warns once per long-waiting request.
#[derive(Debug)]
pub struct LongWaitWarner {
    threshold: Duration,
    pending: Mutex<HashMap<(LockOwner, ResourceId), PendingWait>>,
}

impl LongWaitWarner {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Requests currently tracked as outstanding.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl LockEventListener for LongWaitWarner {
    fn on_event(&self, event: &LockEvent) {
        let mut pending = self.pending.lock();
        let key = (event.owner, event.resource.clone());
        match event.phase {
            EventPhase::Attempted => {
                pending.insert(key, PendingWait { since: Instant::now(), warned: false });
            }
            EventPhase::Acquired | EventPhase::Released => {
                if let Some(wait) = pending.remove(&key) {
                    let waited = wait.since.elapsed();
                    if waited >= self.threshold && !wait.warned {
                        tracing::warn!(
                            owner = %event.owner,
                            resource = %event.resource,
                            mode = %event.mode,
                            ?waited,
                            "lock granted after long wait"
                        );
                    }
                }
            }
        }

        // Anything still outstanding past the threshold gets surfaced once,
        // even if its grant never comes.
        for ((owner, resource), wait) in pending.iter_mut() {
            if !wait.warned && wait.since.elapsed() >= self.threshold {
                wait.warned = true;
                tracing::warn!(
                    %owner,
                    %resource,
                    waited = ?wait.since.elapsed(),
                    "lock request waiting past threshold, possible deadlock or starvation"
                );
            }
        }
    }
}
