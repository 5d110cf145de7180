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

use std::sync::Arc;
use std::time::Instant;

use crate::config::LockConfig;
use crate::error::{LockError, Result};
use crate::events::{EventBus, LockEvent, SubscriptionId};
use crate::guard::LockGuard;
use crate::listener::LockEventListener;
use crate::metrics::{LockMetrics, MetricsSnapshot};
use crate::mode::LockMode;
use crate::registry::OwnerRegistry;
use crate::shard::LockShard;
use crate::state::{Decision, GrantKind};
use crate::types::{HeldLock, LockOwner, LockRequest, ResourceId, ResourceLockInfo};

/// The lock table of one running database instance.
///
/// Exactly one `LockManager` is constructed at database startup and threaded
/// through the constructors of every component that locks — storage engine,
/// collection manager, indexes. There is deliberately no process-wide
/// accessor.
///
/// Callers bracket their work as `attempt` → `acquire` → `acquired` → ... →
/// `release`, and must take ancestor intention locks root-to-leaf before the
/// target lock (and release in reverse order). The manager runs no deadlock
/// detector; the acquire timeout is the backstop, and the event feed is the
/// investigation tool.
#[derive(Debug)]
pub struct LockManager {
    shards: Vec<Arc<LockShard>>,
    shard_mask: usize,
    registry: OwnerRegistry,
    bus: Arc<EventBus>,
    metrics: LockMetrics,
    config: LockConfig,
}

impl LockManager {
    /// Create a manager with the default config. Must run inside a tokio
    /// runtime: the event consumer task is spawned here.
    pub fn new() -> Self {
        Self::with_config(LockConfig::default())
    }

    pub fn with_config(config: LockConfig) -> Self {
        assert!(config.shard_count.is_power_of_two(), "shard count must be a power of 2");

        let shards = (0..config.shard_count).map(|_| Arc::new(LockShard::new())).collect();
        let bus = Arc::new(EventBus::new(config.event_queue_capacity));
        bus.start();

        Self {
            shards,
            shard_mask: config.shard_count - 1,
            registry: OwnerRegistry::new(),
            bus,
            metrics: LockMetrics::default(),
            config,
        }
    }

    fn shard(&self, resource: &ResourceId) -> &Arc<LockShard> {
        &self.shards[resource.shard_index(self.shard_mask)]
    }

    fn note_grant(&self, kind: GrantKind) {
        LockMetrics::incr(&self.metrics.acquires);
        match kind {
            GrantKind::Fresh => {}
            GrantKind::Reentrant => LockMetrics::incr(&self.metrics.reentrant_acquires),
            GrantKind::Upgraded => LockMetrics::incr(&self.metrics.upgrades),
        }
    }

    /// Declare intent to lock. Diagnostic only: publishes an `Attempted`
    /// event and returns immediately.
    pub fn attempt(&self, owner: LockOwner, resource: &ResourceId, mode: LockMode) {
        LockMetrics::incr(&self.metrics.attempts);
        self.bus.publish(LockEvent::attempted(resource.clone(), owner, mode));
    }

    /// Acquire a lock, parking the caller while incompatible holds remain.
    ///
    /// Grants are immediate for the first holder, for compatible co-holders
    /// with an empty queue, for reentrant same-mode requests, and for
    /// sole-holder upgrades. Everything else waits in FIFO order until the
    /// request's deadline (the configured default if the request carries
    /// none), then fails with [`LockError::Timeout`].
    pub async fn acquire(&self, request: &LockRequest) -> Result<()> {
        let timeout = request.acquire_timeout.unwrap_or(self.config.default_acquire_timeout);
        let start = Instant::now();

        loop {
            let shard = self.shard(&request.resource);
            let state = shard.state_for(&request.resource);
            match state.try_grant(&request.resource, request.owner, request.mode, true, &self.registry) {
                Decision::Granted(kind) => {
                    self.note_grant(kind);
                    return Ok(());
                }
                Decision::Invalid { from, to } => return Err(LockError::invalid_upgrade(from, to)),
                // Lost the race against garbage collection of an emptied
                // state; look the resource up again.
                Decision::Retired => continue,
                Decision::WouldBlock => unreachable!("blocking decision with may_wait set"),
                Decision::Wait(entry) => {
                    LockMetrics::incr(&self.metrics.waits);
                    let remaining = timeout.saturating_sub(start.elapsed());
                    if tokio::time::timeout(remaining, entry.notify.notified()).await.is_ok() {
                        debug_assert!(entry.is_granted());
                        self.note_grant(if entry.upgrade { GrantKind::Upgraded } else { GrantKind::Fresh });
                        return Ok(());
                    }

                    // Deadline elapsed; the grant may still have landed first.
                    let (granted, retired) = state.finish_wait(&entry);
                    if retired {
                        shard.remove_retired(&request.resource);
                    }
                    if granted {
                        self.note_grant(if entry.upgrade { GrantKind::Upgraded } else { GrantKind::Fresh });
                        return Ok(());
                    }
                    LockMetrics::incr(&self.metrics.timeouts);
                    tracing::debug!(
                        resource = %request.resource,
                        owner = %request.owner,
                        mode = %request.mode,
                        waited = ?entry.enqueued_at.elapsed(),
                        "lock acquisition timed out"
                    );
                    return Err(LockError::timeout(request.resource.clone(), timeout));
                }
            }
        }
    }

    /// Fast-path-only acquire: grants if possible without waiting, otherwise
    /// reports `Ok(false)` and leaves no trace.
    pub fn try_acquire(&self, request: &LockRequest) -> Result<bool> {
        loop {
            let shard = self.shard(&request.resource);
            let state = shard.state_for(&request.resource);
            match state.try_grant(&request.resource, request.owner, request.mode, false, &self.registry) {
                Decision::Granted(kind) => {
                    self.note_grant(kind);
                    return Ok(true);
                }
                Decision::WouldBlock => return Ok(false),
                Decision::Invalid { from, to } => return Err(LockError::invalid_upgrade(from, to)),
                Decision::Retired => continue,
                Decision::Wait(_) => unreachable!("wait decision with may_wait cleared"),
            }
        }
    }

    /// Acquire a `Read` lock with the default deadline.
    pub async fn acquire_read(&self, resource: ResourceId, owner: LockOwner) -> Result<()> {
        self.acquire(&LockRequest::new(resource, owner, LockMode::Read)).await
    }

    /// Acquire a `Write` lock with the default deadline.
    pub async fn acquire_write(&self, resource: ResourceId, owner: LockOwner) -> Result<()> {
        self.acquire(&LockRequest::new(resource, owner, LockMode::Write)).await
    }

    /// Acquire an `IntentionRead` lock with the default deadline.
    pub async fn acquire_intention_read(&self, resource: ResourceId, owner: LockOwner) -> Result<()> {
        self.acquire(&LockRequest::new(resource, owner, LockMode::IntentionRead)).await
    }

    /// Acquire an `IntentionWrite` lock with the default deadline.
    pub async fn acquire_intention_write(&self, resource: ResourceId, owner: LockOwner) -> Result<()> {
        self.acquire(&LockRequest::new(resource, owner, LockMode::IntentionWrite)).await
    }

    /// Acquire and wrap in an RAII guard. Emits the full `Attempted` /
    /// `Acquired` bracket; the guard's release emits `Released`.
    pub async fn acquire_guarded(&self, request: LockRequest) -> Result<LockGuard<'_>> {
        self.attempt(request.owner, &request.resource, request.mode);
        self.acquire(&request).await?;
        self.acquired(request.owner, &request.resource, request.mode);
        Ok(LockGuard::new(self, request.resource, request.owner, request.mode))
    }

    /// Diagnostic confirmation of a successful `acquire`, published by the
    /// caller. Kept separate from `acquire`'s return value so decision and
    /// diagnostics stay independently testable.
    pub fn acquired(&self, owner: LockOwner, resource: &ResourceId, mode: LockMode) {
        self.bus.publish(LockEvent::acquired(resource.clone(), owner, mode));
    }

    /// Release one hold increment and wake now-grantable waiters in FIFO
    /// order.
    ///
    /// Releasing something the owner does not hold is a caller bug: it is
    /// logged loudly and reported as [`LockError::NotHeld`], never retried
    /// internally.
    pub fn release(&self, owner: LockOwner, resource: &ResourceId, mode: LockMode) -> Result<()> {
        let shard = self.shard(resource);
        let outcome = shard
            .get(resource)
            .and_then(|state| state.release(resource, owner, mode, &self.registry).ok());

        match outcome {
            Some(outcome) => {
                if outcome.retired {
                    shard.remove_retired(resource);
                }
                LockMetrics::incr(&self.metrics.releases);
                self.bus.publish(LockEvent::released(resource.clone(), owner, mode));
                Ok(())
            }
            None => {
                LockMetrics::incr(&self.metrics.not_held_errors);
                tracing::error!(%owner, %resource, %mode, "release without matching hold, caller bug");
                Err(LockError::not_held(resource.clone(), owner))
            }
        }
    }

    /// Emergency cleanup for a terminated owner: drop every hold it still
    /// has, regardless of reentrancy depth, waking waiters as usual. Returns
    /// the freed resources so the caller can clean up after the crashed
    /// worker.
    pub fn release_all(&self, owner: LockOwner) -> Vec<ResourceId> {
        let held = self.registry.resources_of(owner);
        let mut freed = Vec::with_capacity(held.len());

        for lock in held {
            let shard = self.shard(&lock.resource);
            let Some(state) = shard.get(&lock.resource) else {
                continue;
            };
            if let Some(outcome) = state.force_release(&lock.resource, owner, &self.registry) {
                if outcome.retired {
                    shard.remove_retired(&lock.resource);
                }
                LockMetrics::incr(&self.metrics.forced_releases);
                self.bus.publish(LockEvent::released(lock.resource.clone(), owner, lock.mode));
                freed.push(lock.resource);
            }
        }

        if !freed.is_empty() {
            tracing::warn!(%owner, count = freed.len(), "force-released all holds of terminated owner");
        }
        freed
    }

    /// Register a diagnostic listener.
    pub fn subscribe(&self, listener: Arc<dyn LockEventListener>) -> SubscriptionId {
        self.bus.subscribe(listener)
    }

    /// Remove a diagnostic listener. Returns false for an unknown id.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Everything an owner currently holds.
    pub fn holds_of(&self, owner: LockOwner) -> Vec<HeldLock> {
        self.registry.resources_of(owner)
    }

    /// Point-in-time "who holds what" for one resource, if it has any lock
    /// state at all.
    pub fn lock_info(&self, resource: &ResourceId) -> Option<ResourceLockInfo> {
        let state = self.shard(resource).get(resource)?;
        let (holders, waiting) = state.snapshot();
        if holders.is_empty() && waiting == 0 {
            return None;
        }
        Some(ResourceLockInfo {
            resource: resource.clone(),
            holders,
            waiting,
        })
    }

    /// Number of resources with live lock state.
    pub fn resource_count(&self) -> usize {
        self.shards.iter().map(|shard| shard.resource_count()).sum()
    }

    /// Resources with live lock state, for operational reports.
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.shards.iter().flat_map(|shard| shard.resource_ids()).collect()
    }

    /// Counter snapshot for tooling.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(
            self.bus.dropped_events(),
            self.bus.listener_panics(),
            self.resource_count(),
            self.registry.owner_count(),
        )
    }

    /// Stop the diagnostic pipeline: no new events, bounded drain, consumer
    /// task stopped. Idempotent, and safe while other threads are still
    /// releasing locks — lock-table state is left untouched, callers remain
    /// responsible for their own holds.
    pub async fn shutdown(&self) {
        self.bus.shutdown(self.config.shutdown_drain_timeout).await;
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
