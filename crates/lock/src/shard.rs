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

use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use crate::state::ResourceLockState;
use crate::types::ResourceId;

/// One slice of the resource table.
///
/// Resources hash to a shard, so lookups for unrelated parts of the
/// hierarchy never contend on one map lock. States are created on demand and
/// dropped again once retired (no holds, no waiters).
#[derive(Debug, Default)]
pub(crate) struct LockShard {
    resources: RwLock<HashMap<ResourceId, Arc<ResourceLockState>>>,
}

impl LockShard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the live state for a resource.
    ///
    /// A retired state found in the map is replaced in place: the retirer may
    /// not have removed its entry yet, and handing out a retired state would
    /// strand the request.
    pub fn state_for(&self, resource: &ResourceId) -> Arc<ResourceLockState> {
        {
            let resources = self.resources.read();
            if let Some(state) = resources.get(resource) {
                if !state.is_retired() {
                    return state.clone();
                }
            }
        }

        let mut resources = self.resources.write();
        match resources.entry(resource.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_retired() {
                    entry.insert(Arc::new(ResourceLockState::new()));
                }
                entry.get().clone()
            }
            Entry::Vacant(entry) => entry.insert(Arc::new(ResourceLockState::new())).clone(),
        }
    }

    /// Live state for a resource, if any.
    pub fn get(&self, resource: &ResourceId) -> Option<Arc<ResourceLockState>> {
        self.resources
            .read()
            .get(resource)
            .filter(|state| !state.is_retired())
            .cloned()
    }

    /// Drop the map entry for a state that retired itself. Re-checks under
    /// the write lock: a fresh state may already have taken the slot.
    pub fn remove_retired(&self, resource: &ResourceId) {
        let mut resources = self.resources.write();
        if let Some(state) = resources.get(resource) {
            if state.is_retired() {
                resources.remove(resource);
            }
        }
    }

    /// Number of tracked resources, including not-yet-swept retired entries.
    pub fn resource_count(&self) -> usize {
        self.resources.read().len()
    }

    /// Resources currently tracked by this shard.
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.resources.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::LockMode;
    use crate::registry::OwnerRegistry;
    use crate::types::LockOwner;

    #[test]
    fn test_state_created_lazily_and_reused() {
        let shard = LockShard::new();
        let doc = ResourceId::document("/db/a");

        assert!(shard.get(&doc).is_none());
        let first = shard.state_for(&doc);
        let second = shard.state_for(&doc);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(shard.resource_count(), 1);
    }

    #[test]
    fn test_retired_state_is_replaced() {
        let shard = LockShard::new();
        let registry = OwnerRegistry::new();
        let doc = ResourceId::document("/db/a");
        let owner = LockOwner(1);

        let state = shard.state_for(&doc);
        state.try_grant(&doc, owner, LockMode::Read, true, &registry);
        let outcome = state.release(&doc, owner, LockMode::Read, &registry).unwrap();
        assert!(outcome.retired);

        // Lookup before the retirer swept the entry: must hand out a fresh
        // live state, not the retired one.
        let fresh = shard.state_for(&doc);
        assert!(!Arc::ptr_eq(&state, &fresh));
        assert!(!fresh.is_retired());

        shard.remove_retired(&doc);
        // The fresh state took the slot; sweeping must not evict it.
        assert!(shard.get(&doc).is_some());
    }

    #[test]
    fn test_remove_retired_sweeps_entry() {
        let shard = LockShard::new();
        let registry = OwnerRegistry::new();
        let doc = ResourceId::document("/db/a");

        let state = shard.state_for(&doc);
        state.try_grant(&doc, LockOwner(1), LockMode::Read, true, &registry);
        state.release(&doc, LockOwner(1), LockMode::Read, &registry).unwrap();

        shard.remove_retired(&doc);
        assert_eq!(shard.resource_count(), 0);
        assert!(shard.get(&doc).is_none());
    }
}
