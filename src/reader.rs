//! Local reads that tolerate replication lag.
//!
//! An address is handed to a client as soon as `checkoutAddr` is committed,
//! but a follower may not have applied that entry yet when the client's
//! traffic reaches it. Lookups therefore retry with exponential backoff
//! before reporting a miss.

use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::warn;

use crate::state::Lookup;
use crate::state::PoolState;
use crate::types::PeerId;

/// Retry policy for [`lookup_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupBackoff {
    /// Wait before the first retry.
    pub initial_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl LookupBackoff {
    /// Wait before retry number `retry` (0-based): `initial_ms * 2^retry`.
    #[inline]
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        Duration::from_millis(self.initial_ms.saturating_mul(factor))
    }

    /// Sum of every wait when all attempts miss.
    pub fn total_delay(&self) -> Duration {
        (0..self.max_retries).map(|retry| self.delay(retry)).sum()
    }
}

/// Look up the domain `addr` is assigned to for `peer`, retrying on miss.
///
/// Makes `max_retries + 1` attempts. Sleeping suspends only the calling task.
pub async fn lookup_with_retry(
    state: &PoolState,
    peer: PeerId,
    addr: Ipv4Addr,
    backoff: LookupBackoff,
) -> Option<String> {
    let mut retry = 0;
    loop {
        let miss = match state.lookup_domain(peer, addr) {
            Lookup::Found(domain) => return Some(domain),
            miss => miss,
        };

        if retry >= backoff.max_retries {
            match miss {
                Lookup::PeerMissing => warn!(%peer, %addr, attempts = retry + 1, "lookup failed: peer not found"),
                _ => warn!(%peer, %addr, attempts = retry + 1, "lookup failed: address not assigned"),
            }
            return None;
        }

        tokio::time::sleep(backoff.delay(retry)).await;
        retry += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::Instant;

    use super::*;
    use crate::address_set::AddressSet;
    use crate::allocation::checkout_addr;

    const DEFAULT: LookupBackoff = LookupBackoff {
        initial_ms: 100,
        max_retries: 4,
    };

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_delay_doubles() {
        let delays: Vec<u64> = (0..4).map(|r| DEFAULT.delay(r).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800]);
        assert_eq!(DEFAULT.total_delay(), Duration::from_millis(1500));
    }

    #[test]
    fn test_delay_saturates() {
        let backoff = LookupBackoff {
            initial_ms: u64::MAX / 2,
            max_retries: 80,
        };
        assert_eq!(backoff.delay(70), Duration::from_millis(u64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_returns_immediately() {
        let state = PoolState::new();
        let addrs = AddressSet::from_addrs([ip("100.64.0.1")]);
        checkout_addr(&state, &addrs, PeerId(1), "a", 1, 0).unwrap();

        let start = Instant::now();
        let found = lookup_with_retry(&state, PeerId(1), ip("100.64.0.1"), DEFAULT).await;
        assert_eq!(found.as_deref(), Some("a"));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_waits_full_backoff() {
        let state = PoolState::new();
        let start = Instant::now();
        assert_eq!(lookup_with_retry(&state, PeerId(1), ip("100.64.0.1"), DEFAULT).await, None);
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_apply_is_masked() {
        let state = Arc::new(PoolState::new());
        let writer = Arc::clone(&state);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            let addrs = AddressSet::from_addrs([ip("100.64.0.1")]);
            checkout_addr(&writer, &addrs, PeerId(1), "late", 1, 0).unwrap();
        });

        let start = Instant::now();
        let found = lookup_with_retry(&state, PeerId(1), ip("100.64.0.1"), DEFAULT).await;
        assert_eq!(found.as_deref(), Some("late"));
        // Attempts at 0, 100, 300: the third one sees the write.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300) && elapsed < Duration::from_millis(700));
    }
}
