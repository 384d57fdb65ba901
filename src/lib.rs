//! Consensus-replicated IPv4 address pool.
//!
//! Every (peer, domain) pair gets an address from a fixed [`AddressSet`]; the
//! mapping is a bijection per peer. Allocations and usage refreshes are
//! commands in a replicated log, so every node applies the same sequence and
//! ends up with the same state:
//!
//! - `checkoutAddr` - return the domain's address, or hand out a free or idle one
//! - `markLastUsed` - push an address's last-used time forward
//!
//! Idle addresses become reclaimable once they have not been used for the
//! configured reuse period (48 hours by default).
//!
//! ## Example
//!
//! ```ignore
//! use consensus_ippool::{AddressSet, ConsensusIpPool, IpPoolConfig, PeerId, RaftRouter};
//!
//! let addresses: AddressSet = "100.64.0.0/24".parse()?;
//! let pool = ConsensusIpPool::new(addresses, IpPoolConfig::from_env())?;
//! pool.start_consensus(RaftRouter::new(), "natc").await?;
//!
//! let addr = pool.get_or_allocate_address(PeerId(7), "example.com").await?;
//! let domain = pool.resolve_domain(PeerId(7), addr, current_time_ms()).await;
//! ```

pub mod address_set;
pub mod allocation;
pub mod command;
pub mod config;
pub mod constants;
pub mod error;
pub mod executor;
pub mod fsm;
pub mod pool;
pub mod raft;
pub mod reader;
pub mod state;
pub mod testing;
pub mod time;
pub mod types;
pub mod usage;

pub use address_set::AddressSet;
pub use command::CheckoutAddrArgs;
pub use command::Command;
pub use command::CommandResult;
pub use command::MarkLastUsedArgs;
pub use config::ConsensusConfig;
pub use config::IpPoolConfig;
pub use error::AddressSetError;
pub use error::ApplyError;
pub use error::ConfigError;
pub use error::DispatchError;
pub use error::PoolError;
pub use error::SubmitError;
pub use executor::CommandExecutor;
pub use fsm::IpPoolFsm;
pub use pool::ConsensusIpPool;
pub use raft::RaftConsensus;
pub use raft::RaftRouter;
pub use state::PoolSnapshot;
pub use state::PoolState;
pub use time::current_time_ms;
pub use time::SimulatedTimeProvider;
pub use time::SystemTimeProvider;
pub use time::TimeProvider;
pub use types::PeerId;
pub use types::WhereWhen;
