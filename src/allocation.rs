//! Address checkout and reuse.
//!
//! Runs inside the state machine, so every function here is deterministic:
//! time comes in as explicit `*_ms` arguments and the scan order is the
//! ascending order of the [`AddressSet`].

use std::net::Ipv4Addr;

use tracing::debug;
use tracing::warn;

use crate::address_set::AddressSet;
use crate::error::ApplyError;
use crate::state::PeerState;
use crate::state::PoolState;
use crate::types::PeerId;
use crate::types::WhereWhen;

/// Whether an address with reverse entry `entry` may be handed out.
///
/// Unrecorded addresses are free. Recorded ones are free once idle since
/// before `reuse_deadline_ms`.
#[inline]
pub fn is_reclaimable(entry: Option<&WhereWhen>, reuse_deadline_ms: u64) -> bool {
    entry.map_or(true, |ww| ww.is_expired(reuse_deadline_ms))
}

/// First address in `addresses` that `peer` can use, scanning in ascending order.
pub fn find_candidate(addresses: &AddressSet, peer: &PeerState, reuse_deadline_ms: u64) -> Option<Ipv4Addr> {
    addresses.iter().find(|addr| {
        let entry = peer.addr_to_domain.get(addr);
        is_reclaimable(entry.as_deref(), reuse_deadline_ms)
    })
}

/// Return the address for `(peer, domain)`, allocating or reclaiming one if needed.
///
/// An existing, consistent assignment is refreshed to `now_ms` and returned.
/// Otherwise the first reclaimable address is taken; if it previously served
/// another domain, that domain loses its forward entry.
pub fn checkout_addr(
    pool: &PoolState,
    addresses: &AddressSet,
    peer_id: PeerId,
    domain: &str,
    now_ms: u64,
    reuse_deadline_ms: u64,
) -> Result<Ipv4Addr, ApplyError> {
    let peer = pool.peer_or_insert(peer_id);

    if let Some(addr) = peer.addr_for_domain(domain) {
        match peer.addr_to_domain.get_mut(&addr) {
            Some(mut ww) if ww.domain == domain => {
                ww.last_used_ms = now_ms;
                return Ok(addr);
            }
            Some(ww) => {
                warn!(
                    peer = %peer_id,
                    domain,
                    %addr,
                    owner = %ww.domain,
                    "forward entry points at an address owned by another domain; reallocating"
                );
            }
            None => {
                warn!(peer = %peer_id, domain, %addr, "forward entry has no reverse entry; reallocating");
            }
        }
    }

    let Some(addr) = find_candidate(addresses, &peer, reuse_deadline_ms) else {
        debug!(peer = %peer_id, domain, "no reclaimable address");
        return Err(ApplyError::Exhausted);
    };

    peer.domain_to_addr.insert(domain.to_string(), addr);
    let previous = peer.addr_to_domain.insert(addr, WhereWhen::new(domain, now_ms));
    if let Some(prev) = previous.filter(|prev| prev.domain != domain) {
        debug!(peer = %peer_id, %addr, from = %prev.domain, to = domain, "reclaimed idle address");
        peer.domain_to_addr.remove_if(&prev.domain, |_, prev_addr| *prev_addr == addr);
    }

    Ok(addr)
}
