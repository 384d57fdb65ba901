//! Last-used timestamp tracking.
//!
//! Usage refreshes are submitted asynchronously by readers on every node, so
//! they arrive duplicated and out of order. The guards below make applying
//! them commutative: a refresh only ever moves `last_used_ms` forward, and
//! only for the domain the refresh was observed for.

use std::net::Ipv4Addr;

use tracing::warn;

use crate::state::PoolState;
use crate::types::PeerId;
use crate::types::WhereWhen;

/// Outcome of evaluating a usage refresh against the stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkDecision {
    /// Overwrite `last_used_ms` with the refresh timestamp.
    Update,
    /// The address is not assigned for this peer.
    AddrNotTracked,
    /// The address now belongs to a different domain.
    DomainMismatch,
    /// The stored timestamp is already at or after the refresh.
    NotNewer,
}

/// Decide what a refresh of `addr` for `domain` at `updated_at_ms` does.
///
/// Guards are checked in order: tracked, same domain, strictly newer.
#[inline]
pub fn decide_mark(entry: Option<&WhereWhen>, domain: &str, updated_at_ms: u64) -> MarkDecision {
    match entry {
        None => MarkDecision::AddrNotTracked,
        Some(ww) if ww.domain != domain => MarkDecision::DomainMismatch,
        Some(ww) if ww.last_used_ms >= updated_at_ms => MarkDecision::NotNewer,
        Some(_) => MarkDecision::Update,
    }
}

/// Apply a usage refresh. Guard failures are no-ops.
pub fn mark_last_used(pool: &PoolState, peer_id: PeerId, addr: Ipv4Addr, domain: &str, updated_at_ms: u64) {
    let Some(peer) = pool.peer(peer_id) else {
        warn!(peer = %peer_id, %addr, domain, "usage refresh for unknown peer");
        return;
    };
    let Some(mut entry) = peer.addr_to_domain.get_mut(&addr) else {
        return;
    };
    if decide_mark(Some(entry.value()), domain, updated_at_ms) == MarkDecision::Update {
        entry.last_used_ms = updated_at_ms;
    }
}
