//! openraft binding for the IP pool.
//!
//! # Key Components
//!
//! - `types`: openraft type configuration
//! - `log_store`: in-memory Raft log
//! - `state_machine`: applies committed commands to the shared [`IpPoolFsm`](crate::IpPoolFsm)
//! - `network`: in-process [`RaftRouter`] joining the nodes of one process
//! - `consensus`: [`RaftConsensus`], the [`CommandExecutor`](crate::CommandExecutor) on top of a Raft node
//!
//! ## Usage Pattern
//!
//! ```ignore
//! let router = RaftRouter::new();
//! for pool in &pools {
//!     pool.start_consensus(router.clone(), "natc").await?;
//! }
//! let addr = pools[1].get_or_allocate_address(PeerId(7), "example.com").await?;
//! ```

pub mod consensus;
pub mod log_store;
pub mod network;
pub mod state_machine;
pub mod types;

pub use consensus::RaftConsensus;
pub use log_store::MemLogStore;
pub use network::RaftRouter;
pub use state_machine::PoolStateMachine;
pub use types::IpPoolRaft;
pub use types::NodeId;
pub use types::TypeConfig;
