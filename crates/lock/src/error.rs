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

use std::time::Duration;
use thiserror::Error;

use crate::mode::LockMode;
use crate::types::{LockOwner, ResourceId};

/// Lock operation related error types.
///
/// All locking-path errors are ordinary return values so callers branch on
/// them to decide retry vs. abort; none are used for control flow via panics.
/// Diagnostic-path failures (queue overflow, listener panics) never surface
/// here — they are counted and logged inside the event bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The acquire deadline elapsed while waiting for a grant.
    #[error("lock acquisition timeout on '{resource}' after {timeout:?}")]
    Timeout { resource: ResourceId, timeout: Duration },

    /// Release without a matching hold. A caller bug: the operation that
    /// issued it should be treated as failed, not retried.
    #[error("{owner} does not hold '{resource}'")]
    NotHeld { resource: ResourceId, owner: LockOwner },

    /// An upgrade outside the legal set (Read->Write, IntentionWrite->Write).
    /// A caller bug.
    #[error("illegal lock upgrade {from} -> {to}")]
    InvalidUpgrade { from: LockMode, to: LockMode },
}

impl LockError {
    /// Create a timeout error.
    pub fn timeout(resource: ResourceId, timeout: Duration) -> Self {
        Self::Timeout { resource, timeout }
    }

    /// Create a not-held error.
    pub fn not_held(resource: ResourceId, owner: LockOwner) -> Self {
        Self::NotHeld { resource, owner }
    }

    /// Create an invalid-upgrade error.
    pub fn invalid_upgrade(from: LockMode, to: LockMode) -> Self {
        Self::InvalidUpgrade { from, to }
    }

    /// True for contention outcomes a caller may sensibly retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True for errors that indicate a bug in the calling code rather than
    /// contention.
    pub fn is_caller_bug(&self) -> bool {
        matches!(self, Self::NotHeld { .. } | Self::InvalidUpgrade { .. })
    }
}

/// Lock operation Result type.
pub type Result<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let timeout = LockError::timeout(ResourceId::collection("/db"), Duration::from_secs(5));
        assert!(matches!(timeout, LockError::Timeout { .. }));

        let not_held = LockError::not_held(ResourceId::document("/db/a"), LockOwner(3));
        assert!(matches!(not_held, LockError::NotHeld { .. }));

        let upgrade = LockError::invalid_upgrade(LockMode::Write, LockMode::Read);
        assert!(matches!(upgrade, LockError::InvalidUpgrade { .. }));
    }

    #[test]
    fn test_error_classification() {
        let timeout = LockError::timeout(ResourceId::collection("/db"), Duration::from_secs(1));
        assert!(timeout.is_retryable());
        assert!(!timeout.is_caller_bug());

        let not_held = LockError::not_held(ResourceId::document("/db/a"), LockOwner(3));
        assert!(not_held.is_caller_bug());
        assert!(!not_held.is_retryable());

        let upgrade = LockError::invalid_upgrade(LockMode::IntentionRead, LockMode::Write);
        assert!(upgrade.is_caller_bug());
    }

    #[test]
    fn test_error_display() {
        let err = LockError::not_held(ResourceId::document("/db/a"), LockOwner(3));
        assert_eq!(err.to_string(), "owner-3 does not hold 'document:/db/a'");

        let err = LockError::invalid_upgrade(LockMode::Read, LockMode::IntentionWrite);
        assert_eq!(err.to_string(), "illegal lock upgrade R -> IW");
    }
}
