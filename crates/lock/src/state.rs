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
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Notify;

use crate::mode::LockMode;
use crate::registry::OwnerRegistry;
use crate::types::{HolderInfo, LockOwner, ResourceId};

/// One owner's hold on a resource. At most one per (resource, owner) pair;
/// reentrant acquisition bumps the count instead of creating a second hold.
#[derive(Debug)]
pub(crate) struct LockHold {
    pub mode: LockMode,
    pub count: u32,
}

/// A blocked request, parked in the resource's FIFO queue.
///
/// Grants are performed by the releaser while it holds the resource mutex:
/// the hold is installed, `granted` is flipped, and the waiter's `Notify` is
/// fired. The notify permit is stored even if the waiter has not reached
/// `notified().await` yet, so wakeups cannot be lost.
#[derive(Debug)]
pub(crate) struct WaitEntry {
    pub owner: LockOwner,
    pub mode: LockMode,
    /// True when the owner already holds this resource and waits to upgrade.
    pub upgrade: bool,
    pub enqueued_at: Instant,
    pub notify: Notify,
    granted: AtomicBool,
}

impl WaitEntry {
    fn new(owner: LockOwner, mode: LockMode, upgrade: bool) -> Arc<Self> {
        Arc::new(Self {
            owner,
            mode,
            upgrade,
            enqueued_at: Instant::now(),
            notify: Notify::new(),
            granted: AtomicBool::new(false),
        })
    }

    pub fn is_granted(&self) -> bool {
        self.granted.load(Ordering::Acquire)
    }
}

/// Outcome of a grant decision for one request.
pub(crate) enum Decision {
    /// Hold installed (or bumped) immediately.
    Granted(GrantKind),
    /// Parked; await the entry's notify.
    Wait(Arc<WaitEntry>),
    /// Would have to park, and the caller asked not to.
    WouldBlock,
    /// Cross-mode request outside the legal upgrade set.
    Invalid { from: LockMode, to: LockMode },
    /// The state was concurrently garbage-collected; look it up again.
    Retired,
}

/// How a grant was satisfied, for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GrantKind {
    Fresh,
    Reentrant,
    Upgraded,
}

#[derive(Debug)]
pub(crate) struct ReleaseOutcome {
    /// The hold reached zero and was removed.
    pub fully_released: bool,
    /// The state became empty and was retired; the shard entry should go.
    pub retired: bool,
}

#[derive(Debug, Default)]
struct ResourceQueue {
    holds: HashMap<LockOwner, LockHold>,
    waiters: VecDeque<Arc<WaitEntry>>,
}

impl ResourceQueue {
    /// Whether the waiter at the front of the queue can be granted against
    /// the current hold set.
    fn front_grantable(&self) -> bool {
        match self.waiters.front() {
            None => false,
            Some(entry) if entry.upgrade => {
                self.holds.len() == 1 && self.holds.contains_key(&entry.owner)
            }
            Some(entry) => self
                .holds
                .values()
                .all(|hold| LockMode::is_compatible(hold.mode, entry.mode)),
        }
    }
}

/// Per-resource lock state: the hold set and the FIFO wait queue, guarded by
/// one private mutex so uncontended resources never serialize against each
/// other.
///
/// Created lazily on first request; `retired` is set (under the mutex) once
/// no holds or waiters remain, after which the shard drops its map entry and
/// racing lookups re-create a fresh state.
#[derive(Debug)]
pub(crate) struct ResourceLockState {
    retired: AtomicBool,
    inner: Mutex<ResourceQueue>,
}

impl ResourceLockState {
    pub fn new() -> Self {
        Self {
            retired: AtomicBool::new(false),
            inner: Mutex::new(ResourceQueue::default()),
        }
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Decide a request: grant in place, park it, or reject it.
    ///
    /// A new owner is granted only when its mode is compatible with every
    /// existing hold *and* no one is queued ahead — arrivals never overtake
    /// the queue, which is what keeps writers from starving.
    pub fn try_grant(
        &self,
        resource: &ResourceId,
        owner: LockOwner,
        mode: LockMode,
        may_wait: bool,
        registry: &OwnerRegistry,
    ) -> Decision {
        let mut queue = self.inner.lock();
        if self.is_retired() {
            return Decision::Retired;
        }

        if let Some(hold) = queue.holds.get_mut(&owner) {
            if hold.mode == mode {
                hold.count += 1;
                return Decision::Granted(GrantKind::Reentrant);
            }
            if !LockMode::can_upgrade(hold.mode, mode) {
                return Decision::Invalid { from: hold.mode, to: mode };
            }
            if queue.holds.len() == 1 {
                let hold = queue.holds.get_mut(&owner).expect("sole holder just seen");
                hold.mode = mode;
                hold.count += 1;
                registry.record(owner, resource, mode);
                return Decision::Granted(GrantKind::Upgraded);
            }
            if !may_wait {
                return Decision::WouldBlock;
            }
            // An upgrade can never be satisfied behind later grants (they only
            // add holds), so it parks at the front of the queue.
            let entry = WaitEntry::new(owner, mode, true);
            queue.waiters.push_front(entry.clone());
            return Decision::Wait(entry);
        }

        let unobstructed = queue.waiters.is_empty()
            && queue
                .holds
                .values()
                .all(|hold| LockMode::is_compatible(hold.mode, mode));
        if unobstructed {
            queue.holds.insert(owner, LockHold { mode, count: 1 });
            registry.record(owner, resource, mode);
            return Decision::Granted(GrantKind::Fresh);
        }

        if !may_wait {
            return Decision::WouldBlock;
        }
        let entry = WaitEntry::new(owner, mode, false);
        queue.waiters.push_back(entry.clone());
        Decision::Wait(entry)
    }

    /// Resolve a waiter whose deadline elapsed.
    ///
    /// Returns `(granted, retired)`. If the grant raced in before the caller
    /// re-acquired the mutex, the acquisition stands and the timeout is
    /// ignored; otherwise the entry is removed atomically — no partial grant.
    pub fn finish_wait(&self, entry: &Arc<WaitEntry>) -> (bool, bool) {
        let mut queue = self.inner.lock();
        if entry.is_granted() {
            return (true, false);
        }
        queue.waiters.retain(|candidate| !Arc::ptr_eq(candidate, entry));
        let retired = self.retire_if_empty(&queue);
        (false, retired)
    }

    /// Release one hold increment for `(owner, mode)`.
    ///
    /// The mode must match the current hold, or be a legal pre-upgrade mode
    /// of a `Write` hold (the matching release of the acquisition that was
    /// later upgraded). Anything else is a caller error.
    pub fn release(
        &self,
        resource: &ResourceId,
        owner: LockOwner,
        mode: LockMode,
        registry: &OwnerRegistry,
    ) -> Result<ReleaseOutcome, ()> {
        let mut queue = self.inner.lock();
        let hold = queue.holds.get_mut(&owner).ok_or(())?;
        let matches = hold.mode == mode
            || (hold.mode == LockMode::Write && LockMode::can_upgrade(mode, LockMode::Write));
        if !matches {
            return Err(());
        }

        hold.count -= 1;
        let fully_released = hold.count == 0;
        if fully_released {
            queue.holds.remove(&owner);
            registry.clear(owner, resource);
            self.wake_waiters(&mut queue, resource, registry);
        }
        let retired = self.retire_if_empty(&queue);
        Ok(ReleaseOutcome { fully_released, retired })
    }

    /// Drop an owner's hold entirely, regardless of count. Used by
    /// `release_all` when cleaning up after a terminated owner.
    pub fn force_release(
        &self,
        resource: &ResourceId,
        owner: LockOwner,
        registry: &OwnerRegistry,
    ) -> Option<ReleaseOutcome> {
        let mut queue = self.inner.lock();
        queue.holds.remove(&owner)?;
        registry.clear(owner, resource);
        self.wake_waiters(&mut queue, resource, registry);
        let retired = self.retire_if_empty(&queue);
        Some(ReleaseOutcome { fully_released: true, retired })
    }

    /// Grant every consecutive grantable waiter from the front of the queue.
    ///
    /// Several compatible waiters (e.g. a run of Read requests) wake
    /// together; the scan stops at the first waiter that still conflicts, so
    /// later compatible requests cannot overtake it.
    fn wake_waiters(&self, queue: &mut ResourceQueue, resource: &ResourceId, registry: &OwnerRegistry) {
        while queue.front_grantable() {
            let entry = queue.waiters.pop_front().expect("front_grantable implies non-empty");
            if entry.upgrade {
                let hold = queue
                    .holds
                    .get_mut(&entry.owner)
                    .expect("upgrade waiter still holds the resource");
                hold.mode = entry.mode;
                hold.count += 1;
            } else {
                queue.holds.insert(entry.owner, LockHold { mode: entry.mode, count: 1 });
            }
            registry.record(entry.owner, resource, entry.mode);
            entry.granted.store(true, Ordering::Release);
            entry.notify.notify_one();
        }
    }

    /// Mark the state retired once nothing holds or waits. Must be called
    /// with the queue mutex held.
    fn retire_if_empty(&self, queue: &ResourceQueue) -> bool {
        if queue.holds.is_empty() && queue.waiters.is_empty() {
            self.retired.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    pub fn snapshot(&self) -> (Vec<HolderInfo>, usize) {
        let queue = self.inner.lock();
        let mut holders: Vec<HolderInfo> = queue
            .holds
            .iter()
            .map(|(owner, hold)| HolderInfo {
                owner: *owner,
                mode: hold.mode,
                count: hold.count,
            })
            .collect();
        holders.sort_by_key(|holder| holder.owner);
        (holders, queue.waiters.len())
    }

    #[cfg(test)]
    pub fn hold_count(&self, owner: LockOwner) -> Option<u32> {
        self.inner.lock().holds.get(&owner).map(|hold| hold.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (ResourceId, ResourceLockState, OwnerRegistry) {
        (
            ResourceId::document("/db/a"),
            ResourceLockState::new(),
            OwnerRegistry::new(),
        )
    }

    fn grant(
        state: &ResourceLockState,
        resource: &ResourceId,
        owner: LockOwner,
        mode: LockMode,
        registry: &OwnerRegistry,
    ) -> Decision {
        state.try_grant(resource, owner, mode, true, registry)
    }

    #[test]
    fn test_fresh_grant_and_reentrancy() {
        let (resource, state, registry) = setup();
        let owner = LockOwner(1);

        assert!(matches!(
            grant(&state, &resource, owner, LockMode::Read, &registry),
            Decision::Granted(GrantKind::Fresh)
        ));
        assert!(matches!(
            grant(&state, &resource, owner, LockMode::Read, &registry),
            Decision::Granted(GrantKind::Reentrant)
        ));
        assert_eq!(state.hold_count(owner), Some(2));

        state.release(&resource, owner, LockMode::Read, &registry).unwrap();
        assert_eq!(state.hold_count(owner), Some(1));
        let outcome = state.release(&resource, owner, LockMode::Read, &registry).unwrap();
        assert!(outcome.fully_released);
        assert!(outcome.retired);
        assert!(state.is_retired());
    }

    #[test]
    fn test_incompatible_request_parks() {
        let (resource, state, registry) = setup();
        assert!(matches!(
            grant(&state, &resource, LockOwner(1), LockMode::Read, &registry),
            Decision::Granted(_)
        ));

        let Decision::Wait(entry) = grant(&state, &resource, LockOwner(2), LockMode::Write, &registry) else {
            panic!("writer should park behind a reader");
        };
        assert!(!entry.is_granted());

        // Reader leaves: the parked writer is granted by the releaser.
        state.release(&resource, LockOwner(1), LockMode::Read, &registry).unwrap();
        assert!(entry.is_granted());
        assert_eq!(state.hold_count(LockOwner(2)), Some(1));
    }

    #[test]
    fn test_arrivals_do_not_overtake_the_queue() {
        let (resource, state, registry) = setup();
        grant(&state, &resource, LockOwner(1), LockMode::Read, &registry);
        let Decision::Wait(writer) = grant(&state, &resource, LockOwner(2), LockMode::Write, &registry) else {
            panic!("writer should park");
        };

        // A later reader is compatible with the holder but must queue behind
        // the writer.
        let Decision::Wait(reader) = grant(&state, &resource, LockOwner(3), LockMode::Read, &registry) else {
            panic!("reader should queue behind the parked writer");
        };

        state.release(&resource, LockOwner(1), LockMode::Read, &registry).unwrap();
        assert!(writer.is_granted());
        assert!(!reader.is_granted());

        state.release(&resource, LockOwner(2), LockMode::Write, &registry).unwrap();
        assert!(reader.is_granted());
    }

    #[test]
    fn test_compatible_waiters_wake_together() {
        let (resource, state, registry) = setup();
        grant(&state, &resource, LockOwner(1), LockMode::Write, &registry);

        let mut readers = Vec::new();
        for id in 2..5 {
            let Decision::Wait(entry) = grant(&state, &resource, LockOwner(id), LockMode::Read, &registry) else {
                panic!("readers should park behind the writer");
            };
            readers.push(entry);
        }

        state.release(&resource, LockOwner(1), LockMode::Write, &registry).unwrap();
        for entry in &readers {
            assert!(entry.is_granted());
        }
    }

    #[test]
    fn test_sole_holder_upgrade_in_place() {
        let (resource, state, registry) = setup();
        let owner = LockOwner(1);
        grant(&state, &resource, owner, LockMode::Read, &registry);

        assert!(matches!(
            grant(&state, &resource, owner, LockMode::Write, &registry),
            Decision::Granted(GrantKind::Upgraded)
        ));
        assert_eq!(state.hold_count(owner), Some(2));

        // Pre-upgrade release against the Write hold is the matching release
        // of the original Read acquisition.
        state.release(&resource, owner, LockMode::Write, &registry).unwrap();
        let outcome = state.release(&resource, owner, LockMode::Read, &registry).unwrap();
        assert!(outcome.fully_released);
    }

    #[test]
    fn test_contended_upgrade_waits_for_sole_holding() {
        let (resource, state, registry) = setup();
        grant(&state, &resource, LockOwner(1), LockMode::Read, &registry);
        grant(&state, &resource, LockOwner(2), LockMode::Read, &registry);

        let Decision::Wait(entry) = grant(&state, &resource, LockOwner(1), LockMode::Write, &registry) else {
            panic!("upgrade should wait while another reader holds");
        };
        assert!(entry.upgrade);

        state.release(&resource, LockOwner(2), LockMode::Read, &registry).unwrap();
        assert!(entry.is_granted());
        assert_eq!(state.hold_count(LockOwner(1)), Some(2));
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let (resource, state, registry) = setup();
        let owner = LockOwner(1);
        grant(&state, &resource, owner, LockMode::Write, &registry);

        let Decision::Invalid { from, to } = grant(&state, &resource, owner, LockMode::Read, &registry) else {
            panic!("Write -> Read is not a legal transition");
        };
        assert_eq!(from, LockMode::Write);
        assert_eq!(to, LockMode::Read);
    }

    #[test]
    fn test_release_mode_mismatch() {
        let (resource, state, registry) = setup();
        let owner = LockOwner(1);
        grant(&state, &resource, owner, LockMode::Read, &registry);

        assert!(state.release(&resource, owner, LockMode::Write, &registry).is_err());
        assert!(state
            .release(&resource, LockOwner(9), LockMode::Read, &registry)
            .is_err());
        assert!(state.release(&resource, owner, LockMode::Read, &registry).is_ok());
    }

    #[test]
    fn test_timed_out_waiter_is_removed() {
        let (resource, state, registry) = setup();
        grant(&state, &resource, LockOwner(1), LockMode::Write, &registry);
        let Decision::Wait(entry) = grant(&state, &resource, LockOwner(2), LockMode::Write, &registry) else {
            panic!("second writer should park");
        };

        let (granted, retired) = state.finish_wait(&entry);
        assert!(!granted);
        assert!(!retired);

        // The dead entry must not absorb the next grant.
        let Decision::Wait(live) = grant(&state, &resource, LockOwner(3), LockMode::Write, &registry) else {
            panic!("third writer should park");
        };
        state.release(&resource, LockOwner(1), LockMode::Write, &registry).unwrap();
        assert!(!entry.is_granted());
        assert!(live.is_granted());
    }

    #[test]
    fn test_grant_beats_timeout_race() {
        let (resource, state, registry) = setup();
        grant(&state, &resource, LockOwner(1), LockMode::Write, &registry);
        let Decision::Wait(entry) = grant(&state, &resource, LockOwner(2), LockMode::Write, &registry) else {
            panic!("second writer should park");
        };

        state.release(&resource, LockOwner(1), LockMode::Write, &registry).unwrap();
        // The waiter's deadline fires after the grant landed: grant stands.
        let (granted, _) = state.finish_wait(&entry);
        assert!(granted);
    }

    #[test]
    fn test_force_release_ignores_count() {
        let (resource, state, registry) = setup();
        let owner = LockOwner(1);
        grant(&state, &resource, owner, LockMode::Read, &registry);
        grant(&state, &resource, owner, LockMode::Read, &registry);
        grant(&state, &resource, owner, LockMode::Read, &registry);

        let outcome = state.force_release(&resource, owner, &registry).unwrap();
        assert!(outcome.fully_released);
        assert!(outcome.retired);
        assert!(state.force_release(&resource, owner, &registry).is_none());
    }

    #[test]
    fn test_snapshot() {
        let (resource, state, registry) = setup();
        grant(&state, &resource, LockOwner(1), LockMode::Read, &registry);
        grant(&state, &resource, LockOwner(2), LockMode::Read, &registry);
        grant(&state, &resource, LockOwner(3), LockMode::Write, &registry);

        let (holders, waiting) = state.snapshot();
        assert_eq!(holders.len(), 2);
        assert_eq!(waiting, 1);
        assert_eq!(holders[0].owner, LockOwner(1));
        assert_eq!(holders[0].mode, LockMode::Read);
    }
}
