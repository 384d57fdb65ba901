//! Type configuration for openraft.
//!
//! - **D**: [`Command`], the replicated command envelope
//! - **R**: [`CommandResult`], returned to the submitter of each entry
//! - **NodeId**: bare `u64`; Raft node ids are unrelated to pool [`PeerId`](crate::PeerId)s

use std::io::Cursor;

use crate::command::Command;
use crate::command::CommandResult;

/// Raft node identifier.
pub type NodeId = u64;

openraft::declare_raft_types!(
    /// Type config for the replicated IP pool.
    pub TypeConfig:
        D = Command,
        R = CommandResult,
        NodeId = NodeId,
        Node = openraft::BasicNode,
        Entry = openraft::Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
        AsyncRuntime = openraft::TokioRuntime,
);

/// A Raft handle for this type config.
pub type IpPoolRaft = openraft::Raft<TypeConfig>;
