//! Constants for the IP pool.
//!
//! Tiger Style: All constants are explicitly typed with fixed limits
//! to prevent unbounded resource allocation.

use std::time::Duration;

// ============================================================================
// Command Names
// ============================================================================

/// Command name for allocating (or refreshing) the address of a peer/domain pair.
///
/// Command names are part of the replicated log format. Renaming one is a
/// protocol change: replicas running the old name will halt on the new one.
pub const CHECKOUT_ADDR_COMMAND: &str = "checkoutAddr";

/// Command name for refreshing the last-used timestamp of an address.
pub const MARK_LAST_USED_COMMAND: &str = "markLastUsed";

// ============================================================================
// Address Reuse
// ============================================================================

/// Default idle period after which an address may be reclaimed (48 hours).
///
/// The reuse deadline carried in a `checkoutAddr` command is `now - DEFAULT_REUSE_AFTER`.
pub const DEFAULT_REUSE_AFTER: Duration = Duration::from_secs(48 * 60 * 60);

/// Upper bound on the configured reuse period, in seconds (10 years).
pub const MAX_REUSE_AFTER_SECS: u64 = 10 * 365 * 24 * 60 * 60;

// ============================================================================
// Consistent Reader
// ============================================================================

/// Initial wait before the first lookup retry (100ms).
///
/// Each following retry doubles the wait: 100, 200, 400, 800.
pub const LOOKUP_INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum lookup retries after the first attempt (5 attempts total).
///
/// Worst-case added read latency with the default backoff is 1500ms.
pub const LOOKUP_MAX_RETRIES: u32 = 4;

/// Upper bound for configured lookup retries.
///
/// Tiger Style: keeps the doubling backoff from overflowing and bounds the
/// time a reader can be parked.
pub const MAX_LOOKUP_RETRIES: u32 = 16;

// ============================================================================
// Domain Limits
// ============================================================================

/// Maximum domain name length (RFC 1035 Section 2.3.4).
pub const MAX_DOMAIN_LENGTH: usize = 253;

// ============================================================================
// Raft Timing Defaults
// ============================================================================

/// Default Raft heartbeat interval in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 500;

/// Default minimum Raft election timeout in milliseconds.
pub const DEFAULT_ELECTION_TIMEOUT_MIN_MS: u64 = 1500;

/// Default maximum Raft election timeout in milliseconds.
pub const DEFAULT_ELECTION_TIMEOUT_MAX_MS: u64 = 3000;

/// How long a node waits to apply a write it forwarded to the leader (1s).
///
/// The write is already committed when the leader answers; this only
/// narrows the window in which the forwarding node's own reads miss it.
pub const FORWARDED_APPLY_WAIT_MS: u64 = 1000;
