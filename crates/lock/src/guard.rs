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

use crate::manager::LockManager;
use crate::mode::LockMode;
use crate::types::{LockOwner, ResourceId};

/// RAII wrapper around one hold increment, from
/// [`LockManager::acquire_guarded`].
///
/// Releases on drop unless released manually first. Release is synchronous
/// (waiter wakeups are just notify permits), so dropping a guard anywhere is
/// fine.
#[derive(Debug)]
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    resource: ResourceId,
    owner: LockOwner,
    mode: LockMode,
    released: bool,
}

impl<'a> LockGuard<'a> {
    pub(crate) fn new(manager: &'a LockManager, resource: ResourceId, owner: LockOwner, mode: LockMode) -> Self {
        Self {
            manager,
            resource,
            owner,
            mode,
            released: false,
        }
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    pub fn owner(&self) -> LockOwner {
        self.owner
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Release early. Returns false if already released.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.manager.release(self.owner, &self.resource, self.mode).is_ok()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.manager.release(self.owner, &self.resource, self.mode) {
            // release_all may have already swept this hold away.
            tracing::debug!(resource = %self.resource, owner = %self.owner, %err, "guard drop release failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LockRequest;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let manager = LockManager::new();
        let doc = ResourceId::document("/db/a");

        {
            let guard = manager
                .acquire_guarded(LockRequest::new(doc.clone(), LockOwner(1), LockMode::Write))
                .await
                .unwrap();
            assert_eq!(guard.resource(), &doc);
            assert_eq!(guard.mode(), LockMode::Write);
            assert_eq!(guard.owner(), LockOwner(1));
            assert!(!guard.is_released());
            assert_eq!(manager.holds_of(LockOwner(1)).len(), 1);
        }

        assert!(manager.holds_of(LockOwner(1)).is_empty());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_release_disarms_drop() {
        let manager = LockManager::new();
        let doc = ResourceId::document("/db/a");

        let mut guard = manager
            .acquire_guarded(LockRequest::new(doc.clone(), LockOwner(1), LockMode::Read))
            .await
            .unwrap();
        assert!(guard.release());
        assert!(guard.is_released());
        assert!(!guard.release());

        // Only one release reached the manager.
        assert_eq!(manager.metrics().releases, 1);
        drop(guard);
        assert_eq!(manager.metrics().releases, 1);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_guard_unblocks_waiter_on_drop() {
        let manager = Arc::new(LockManager::new());
        let doc = ResourceId::document("/db/a");

        let guard = manager
            .acquire_guarded(LockRequest::new(doc.clone(), LockOwner(1), LockMode::Write))
            .await
            .unwrap();

        let manager2 = manager.clone();
        let doc2 = doc.clone();
        let waiter = tokio::spawn(async move { manager2.acquire_write(doc2, LockOwner(2)).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(guard);

        waiter.await.unwrap().unwrap();
        manager.release(LockOwner(2), &doc, LockMode::Write).unwrap();
        manager.shutdown().await;
    }
}
