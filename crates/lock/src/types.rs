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
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crate::mode::LockMode;

/// Sentinel key for the single global B-tree index structure.
pub const BTREE_INDEX_KEY: &str = "btree";

/// What kind of resource a lock protects.
///
/// Collections and documents form the database hierarchy by path prefix;
/// index structures are siblings of that hierarchy, not descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// A B-tree or other index page structure.
    IndexStructure,
    /// A collection node (`/db`, `/db/apps`, ...).
    Collection,
    /// A document stored inside a collection.
    Document,
}

impl ResourceKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ResourceKind::IndexStructure => "index",
            ResourceKind::Collection => "collection",
            ResourceKind::Document => "document",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a lockable resource: kind plus a hierarchical path key.
///
/// The key stays a human-readable string at the API surface (it matches
/// collection/document naming); internally it is interned as `Arc<str>` so
/// cloning along the hot path never copies the path bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub key: Arc<str>,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, key: impl Into<Arc<str>>) -> Self {
        Self { kind, key: key.into() }
    }

    /// A collection resource, e.g. `/db/apps`.
    pub fn collection(path: impl Into<Arc<str>>) -> Self {
        Self::new(ResourceKind::Collection, path)
    }

    /// A document resource, e.g. `/db/apps/docs/data/3`.
    pub fn document(path: impl Into<Arc<str>>) -> Self {
        Self::new(ResourceKind::Document, path)
    }

    /// A named index structure.
    pub fn index(name: impl Into<Arc<str>>) -> Self {
        Self::new(ResourceKind::IndexStructure, name)
    }

    /// The global B-tree index structure.
    pub fn btree_index() -> Self {
        Self::index(BTREE_INDEX_KEY)
    }

    /// Shard index from the resource hash.
    pub fn shard_index(&self, shard_mask: usize) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish() as usize & shard_mask
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Repr<'a> {
            kind: ResourceKind,
            key: &'a str,
        }
        Repr { kind: self.kind, key: &self.key }.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Repr {
            kind: ResourceKind,
            key: String,
        }
        let repr = Repr::deserialize(deserializer)?;
        Ok(Self::new(repr.kind, repr.key))
    }
}

/// Logical owner of a lock: a 64-bit group id supplied by the caller's
/// transaction/session context.
///
/// The manager never creates or destroys owners and never derives them from
/// the executing thread; ownership is an explicit parameter on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LockOwner(pub u64);

impl std::fmt::Display for LockOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "owner-{}", self.0)
    }
}

/// A lock acquisition request.
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub resource: ResourceId,
    pub owner: LockOwner,
    pub mode: LockMode,
    /// Maximum time to wait for a grant; the manager default applies if unset.
    pub acquire_timeout: Option<Duration>,
}

impl LockRequest {
    pub fn new(resource: ResourceId, owner: LockOwner, mode: LockMode) -> Self {
        Self {
            resource,
            owner,
            mode,
            acquire_timeout: None,
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }
}

/// One hold on a resource, as reported by [`crate::LockManager::lock_info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HolderInfo {
    pub owner: LockOwner,
    pub mode: LockMode,
    pub count: u32,
}

/// Point-in-time view of a single resource's lock state.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceLockInfo {
    pub resource: ResourceId,
    pub holders: Vec<HolderInfo>,
    pub waiting: usize,
}

/// One lock held by an owner, as reported by [`crate::LockManager::holds_of`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeldLock {
    pub resource: ResourceId,
    pub mode: LockMode,
}
