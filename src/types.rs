//! Core value types for the IP pool.
//!
//! # Key Components
//!
//! - `PeerId`: Newtype wrapper around u64 identifying the peer whose traffic is translated
//! - `WhereWhen`: The domain an address is assigned to, and when it was last used
//!
//! # Tiger Style
//!
//! - Explicit types: u64 wrapper instead of bare integers (prevents mixing with Raft node ids)
//! - Timestamps are explicit Unix milliseconds (`*_ms`), never read inside state machine handlers
//! - Ordering: Derived PartialOrd/Ord for deterministic snapshot ordering

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

/// Identity of a peer whose domain traffic is being translated.
///
/// Each peer gets its own view of the whole address set: two peers may hold
/// the same address for different domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Create a new `PeerId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PeerId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<PeerId> for u64 {
    fn from(value: PeerId) -> Self {
        value.0
    }
}

impl FromStr for PeerId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(PeerId)
    }
}

/// Reverse-map entry: which domain an address belongs to and when it was last used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhereWhen {
    /// Domain the address is assigned to.
    pub domain: String,
    /// Last time traffic used this address, Unix milliseconds.
    pub last_used_ms: u64,
}

impl WhereWhen {
    /// Create a new entry.
    pub fn new(domain: impl Into<String>, last_used_ms: u64) -> Self {
        Self {
            domain: domain.into(),
            last_used_ms,
        }
    }

    /// Whether this entry has been idle since before `reuse_deadline_ms`.
    #[inline]
    pub fn is_expired(&self, reuse_deadline_ms: u64) -> bool {
        self.last_used_ms < reuse_deadline_ms
    }
}
