//! Replicated pool state: per-peer domain/address bijections.
//!
//! # Concurrency
//!
//! The state machine is the only writer. Readers (the consistent reader on
//! every node) go through the same `DashMap`s concurrently, so a lookup only
//! contends with a write on the same shard, never on a pool-wide lock.
//!
//! Lock rule: never hold a `Ref` into one map while inserting into the same
//! map. Values are cloned out before any mutation.

use std::net::Ipv4Addr;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use serde::Serialize;

use crate::types::PeerId;
use crate::types::WhereWhen;

/// Address assignments for a single peer.
#[derive(Debug, Default)]
pub struct PeerState {
    pub(crate) domain_to_addr: DashMap<String, Ipv4Addr>,
    pub(crate) addr_to_domain: DashMap<Ipv4Addr, WhereWhen>,
}

impl PeerState {
    /// Address currently recorded for `domain`.
    pub fn addr_for_domain(&self, domain: &str) -> Option<Ipv4Addr> {
        self.domain_to_addr.get(domain).map(|entry| *entry)
    }

    /// Reverse entry for `addr`.
    pub fn where_when(&self, addr: Ipv4Addr) -> Option<WhereWhen> {
        self.addr_to_domain.get(&addr).map(|entry| entry.clone())
    }

    /// Domain recorded for `addr`.
    pub fn domain_for_addr(&self, addr: Ipv4Addr) -> Option<String> {
        self.addr_to_domain.get(&addr).map(|entry| entry.domain.clone())
    }

    /// Number of domains with a forward entry.
    pub fn domain_count(&self) -> usize {
        self.domain_to_addr.len()
    }

    /// Number of addresses with a reverse entry.
    pub fn address_count(&self) -> usize {
        self.addr_to_domain.len()
    }

    /// Whether the forward and reverse maps agree in both directions.
    pub fn is_bijective(&self) -> bool {
        if self.domain_to_addr.len() != self.addr_to_domain.len() {
            return false;
        }
        self.domain_to_addr.iter().all(|entry| {
            self.addr_to_domain.get(entry.value()).is_some_and(|ww| ww.domain == *entry.key())
        })
    }

    fn to_snapshot(&self, peer: PeerId) -> PeerSnapshot {
        let mut domains: Vec<(String, Ipv4Addr)> =
            self.domain_to_addr.iter().map(|entry| (entry.key().clone(), *entry.value())).collect();
        domains.sort();
        let mut addresses: Vec<(Ipv4Addr, WhereWhen)> =
            self.addr_to_domain.iter().map(|entry| (*entry.key(), entry.value().clone())).collect();
        addresses.sort_by_key(|(addr, _)| *addr);
        PeerSnapshot {
            peer,
            domains,
            addresses,
        }
    }

    fn from_snapshot(snapshot: &PeerSnapshot) -> Self {
        let state = Self::default();
        for (domain, addr) in &snapshot.domains {
            state.domain_to_addr.insert(domain.clone(), *addr);
        }
        for (addr, ww) in &snapshot.addresses {
            state.addr_to_domain.insert(*addr, ww.clone());
        }
        state
    }
}

/// Outcome of a local reverse lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// No state exists for the peer on this replica.
    PeerMissing,
    /// The peer is known but the address is not assigned.
    AddrMissing,
    /// The domain the address is assigned to.
    Found(String),
}

/// All peers' assignments.
#[derive(Debug, Default)]
pub struct PoolState {
    peers: DashMap<PeerId, Arc<PeerState>>,
}

impl PoolState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for `peer`, if it has ever allocated.
    pub fn peer(&self, peer: PeerId) -> Option<Arc<PeerState>> {
        self.peers.get(&peer).map(|entry| Arc::clone(entry.value()))
    }

    /// State for `peer`, created empty on first use.
    pub(crate) fn peer_or_insert(&self, peer: PeerId) -> Arc<PeerState> {
        Arc::clone(self.peers.entry(peer).or_default().value())
    }

    /// Number of peers with state.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Reverse lookup of `addr` for `peer`.
    pub fn lookup_domain(&self, peer: PeerId, addr: Ipv4Addr) -> Lookup {
        let Some(state) = self.peer(peer) else {
            return Lookup::PeerMissing;
        };
        match state.domain_for_addr(addr) {
            Some(domain) => Lookup::Found(domain),
            None => Lookup::AddrMissing,
        }
    }

    /// Ordered image of the whole state.
    pub fn snapshot(&self) -> PoolSnapshot {
        let mut peers: Vec<PeerSnapshot> =
            self.peers.iter().map(|entry| entry.value().to_snapshot(*entry.key())).collect();
        peers.sort_by_key(|p| p.peer);
        PoolSnapshot { peers }
    }

    /// Replace the state with `snapshot`.
    ///
    /// Must be sequenced with applies by the caller; concurrent readers may
    /// briefly observe a partially restored pool.
    pub fn restore(&self, snapshot: &PoolSnapshot) {
        self.peers.clear();
        for peer in &snapshot.peers {
            self.peers.insert(peer.peer, Arc::new(PeerState::from_snapshot(peer)));
        }
    }
}

/// Serializable, deterministically ordered image of a [`PoolState`].
///
/// Maps are flattened to sorted vectors so two replicas holding equal state
/// always produce identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Peers ordered by id.
    pub peers: Vec<PeerSnapshot>,
}

/// One peer's assignments inside a [`PoolSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    pub peer: PeerId,
    /// Forward entries ordered by domain.
    pub domains: Vec<(String, Ipv4Addr)>,
    /// Reverse entries ordered by address.
    pub addresses: Vec<(Ipv4Addr, WhereWhen)>,
}
