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

//! Hierarchical multi-granularity lock manager for XylemDB.
//!
//! Every read or write of a collection, document, or index structure in the
//! database goes through one [`LockManager`] instance, which mediates
//! intention/read/write locks across the resource hierarchy, supports
//! reentrant acquisition and in-place upgrades per logical owner, and feeds
//! an asynchronous, best-effort diagnostic event bus that stays off the
//! acquire/release hot path.

// ============================================================================
// Module Declarations
// ============================================================================

pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod listener;
pub mod manager;
pub mod metrics;
pub mod mode;
pub mod types;

mod registry;
mod shard;
mod state;


// ============================================================================
// Public API Exports
// ============================================================================

pub use crate::{
    config::LockConfig,
    error::{LockError, Result},
    events::{EventBus, EventPhase, LockEvent, SubscriptionId},
    guard::LockGuard,
    listener::{EventCounter, LockEventListener, LongWaitWarner},
    manager::LockManager,
    metrics::MetricsSnapshot,
    mode::LockMode,
    types::{HeldLock, HolderInfo, LockOwner, LockRequest, ResourceId, ResourceKind, ResourceLockInfo},
};

// ============================================================================
// Defaults
// ============================================================================

/// Current version of the lock crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default shard count for the resource table (must be a power of 2).
pub const DEFAULT_SHARD_COUNT: usize = 256;

/// Default acquire deadline, the backstop against undetected deadlocks.
pub const DEFAULT_ACQUIRE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Default diagnostic event queue capacity.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 8192;

/// Default bound on the shutdown drain of queued diagnostic events.
pub const DEFAULT_SHUTDOWN_DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);
