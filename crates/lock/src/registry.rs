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

use crate::mode::LockMode;
use crate::types::{HeldLock, LockOwner, ResourceId};

/// Per-owner index over the holds kept in the per-resource states.
///
/// Purely an index — it owns no lock lifecycle of its own. Entries are
/// written while the owning resource's mutex is held (always resource state
/// first, registry second), so the two views stay consistent. The index is
/// what makes `release_all` a single pass and gives tooling the
/// "what does this owner hold" answer without scanning every shard.
#[derive(Debug, Default)]
pub(crate) struct OwnerRegistry {
    owners: RwLock<HashMap<LockOwner, HashMap<ResourceId, LockMode>>>,
}

impl OwnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hold (first grant) or refresh its mode (upgrade).
    pub fn record(&self, owner: LockOwner, resource: &ResourceId, mode: LockMode) {
        self.owners
            .write()
            .entry(owner)
            .or_default()
            .insert(resource.clone(), mode);
    }

    /// Drop a hold on final release; forgets the owner once it holds nothing.
    pub fn clear(&self, owner: LockOwner, resource: &ResourceId) {
        let mut owners = self.owners.write();
        if let Some(held) = owners.get_mut(&owner) {
            held.remove(resource);
            if held.is_empty() {
                owners.remove(&owner);
            }
        }
    }

    /// Everything the owner currently holds, in stable order.
    pub fn resources_of(&self, owner: LockOwner) -> Vec<HeldLock> {
        let owners = self.owners.read();
        let Some(held) = owners.get(&owner) else {
            return Vec::new();
        };
        let mut locks: Vec<HeldLock> = held
            .iter()
            .map(|(resource, mode)| HeldLock {
                resource: resource.clone(),
                mode: *mode,
            })
            .collect();
        locks.sort_by(|a, b| a.resource.cmp(&b.resource));
        locks
    }

    /// Number of owners currently holding at least one lock.
    pub fn owner_count(&self) -> usize {
        self.owners.read().len()
    }
}
