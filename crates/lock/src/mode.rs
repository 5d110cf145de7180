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

/// Lock mode for multi-granularity locking.
///
/// Intention modes are taken on ancestors (database, collection) to announce
/// that a descendant will be locked; `Read`/`Write` protect a node's own
/// content. Different owners may share a resource only when their modes are
/// pairwise compatible; a single owner always re-enters its own mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// The owner will read somewhere below this node.
    IntentionRead,
    /// The owner will write somewhere below this node.
    IntentionWrite,
    /// Shared lock on the node's own content.
    Read,
    /// Exclusive lock on the node's own content.
    Write,
}

impl LockMode {
    /// Compatibility of a requested mode against a mode already held by a
    /// *different* owner on the same resource.
    ///
    /// Evaluated on every contested request, so it must stay a pure table
    /// lookup.
    pub const fn is_compatible(held: LockMode, requested: LockMode) -> bool {
        use LockMode::*;
        match (held, requested) {
            (IntentionRead, Write) => false,
            (IntentionRead, _) => true,
            (IntentionWrite, IntentionRead) | (IntentionWrite, IntentionWrite) => true,
            (IntentionWrite, _) => false,
            (Read, IntentionRead) | (Read, Read) => true,
            (Read, _) => false,
            (Write, _) => false,
        }
    }

    /// Legal in-place upgrades: `Read -> Write` and `IntentionWrite -> Write`,
    /// granted only while the requester is the sole holder.
    pub const fn can_upgrade(from: LockMode, to: LockMode) -> bool {
        matches!(
            (from, to),
            (LockMode::Read, LockMode::Write) | (LockMode::IntentionWrite, LockMode::Write)
        )
    }

    /// True for `IntentionRead`/`IntentionWrite`.
    pub const fn is_intention(self) -> bool {
        matches!(self, LockMode::IntentionRead | LockMode::IntentionWrite)
    }

    /// Short display form used in events and log lines.
    pub const fn as_str(self) -> &'static str {
        match self {
            LockMode::IntentionRead => "IR",
            LockMode::IntentionWrite => "IW",
            LockMode::Read => "R",
            LockMode::Write => "W",
        }
    }
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LockMode::*;

    const ALL: [LockMode; 4] = [IntentionRead, IntentionWrite, Read, Write];

    #[test]
    fn test_compatibility_matrix() {
        // Rows: held, columns: requested, in declaration order.
        let expected = [
            [true, true, true, false],   // IntentionRead
            [true, true, false, false],  // IntentionWrite
            [true, false, true, false],  // Read
            [false, false, false, false], // Write
        ];

        for (i, held) in ALL.iter().enumerate() {
            for (j, requested) in ALL.iter().enumerate() {
                assert_eq!(
                    LockMode::is_compatible(*held, *requested),
                    expected[i][j],
                    "held={held} requested={requested}"
                );
            }
        }
    }

    #[test]
    fn test_compatibility_is_symmetric() {
        for held in ALL {
            for requested in ALL {
                assert_eq!(
                    LockMode::is_compatible(held, requested),
                    LockMode::is_compatible(requested, held),
                    "held={held} requested={requested}"
                );
            }
        }
    }

    #[test]
    fn test_upgrade_set() {
        assert!(LockMode::can_upgrade(Read, Write));
        assert!(LockMode::can_upgrade(IntentionWrite, Write));

        for from in ALL {
            for to in ALL {
                let legal = matches!((from, to), (Read, Write) | (IntentionWrite, Write));
                assert_eq!(LockMode::can_upgrade(from, to), legal, "from={from} to={to}");
            }
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(IntentionRead.to_string(), "IR");
        assert_eq!(IntentionWrite.to_string(), "IW");
        assert_eq!(Read.to_string(), "R");
        assert_eq!(Write.to_string(), "W");
        assert!(IntentionRead.is_intention());
        assert!(!Write.is_intention());
    }
}
