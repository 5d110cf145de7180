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

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lock manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Number of shards for the resource table. Must be a power of two.
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,

    /// Wait deadline applied when a request carries no explicit timeout.
    /// The backstop against undetected deadlocks.
    #[serde(default = "default_acquire_timeout")]
    pub default_acquire_timeout: Duration,

    /// Capacity of the diagnostic event queue. On overflow the oldest
    /// unconsumed event is dropped and counted.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// Upper bound on how long `shutdown` waits for the event consumer to
    /// drain and stop.
    #[serde(default = "default_shutdown_drain_timeout")]
    pub shutdown_drain_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            default_acquire_timeout: default_acquire_timeout(),
            event_queue_capacity: default_event_queue_capacity(),
            shutdown_drain_timeout: default_shutdown_drain_timeout(),
        }
    }
}

fn default_shard_count() -> usize {
    crate::DEFAULT_SHARD_COUNT
}

fn default_acquire_timeout() -> Duration {
    crate::DEFAULT_ACQUIRE_TIMEOUT
}

fn default_event_queue_capacity() -> usize {
    crate::DEFAULT_EVENT_QUEUE_CAPACITY
}

fn default_shutdown_drain_timeout() -> Duration {
    crate::DEFAULT_SHUTDOWN_DRAIN_TIMEOUT
}
