//! [`CommandExecutor`] backed by an openraft node.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use openraft::error::ClientWriteError;
use openraft::error::InitializeError;
use openraft::error::RPCError;
use openraft::error::RaftError;
use openraft::BasicNode;
use openraft::Config;
use openraft::Raft;
use snafu::ResultExt;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::command::Command;
use crate::command::CommandResult;
use crate::config::ConsensusConfig;
use crate::constants::FORWARDED_APPLY_WAIT_MS;
use crate::error::InvalidConfigSnafu;
use crate::error::PoolError;
use crate::error::SubmitError;
use crate::executor::CommandExecutor;
use crate::fsm::IpPoolFsm;
use crate::raft::log_store::MemLogStore;
use crate::raft::network::RaftRouter;
use crate::raft::state_machine::PoolStateMachine;
use crate::raft::types::IpPoolRaft;
use crate::raft::types::NodeId;

/// A running Raft node applying commands to an [`IpPoolFsm`].
pub struct RaftConsensus {
    node_id: NodeId,
    raft: IpPoolRaft,
    router: RaftRouter,
}

impl RaftConsensus {
    /// Start a node, join it to `router` and bootstrap the cluster if this
    /// node has the lowest member id.
    #[instrument(skip(config, fsm, router), fields(node_id = config.node_id))]
    pub async fn start(
        config: &ConsensusConfig,
        cluster_tag: &str,
        fsm: Arc<IpPoolFsm>,
        router: RaftRouter,
    ) -> Result<Self, PoolError> {
        config.validate().context(InvalidConfigSnafu)?;
        let node_id = config.node_id;

        let raft_config = Config {
            cluster_name: cluster_tag.to_string(),
            heartbeat_interval: config.heartbeat_interval_ms,
            election_timeout_min: config.election_timeout_min_ms,
            election_timeout_max: config.election_timeout_max_ms,
            ..Default::default()
        }
        .validate()
        .map_err(|e| PoolError::Consensus {
            operation: "config validation",
            source: Box::new(e),
        })?;

        let raft = Raft::new(
            node_id,
            Arc::new(raft_config),
            router.network_factory(node_id),
            MemLogStore::default(),
            PoolStateMachine::new(fsm),
        )
        .await
        .map_err(|e| PoolError::Consensus {
            operation: "start",
            source: Box::new(e),
        })?;
        router.register(node_id, raft.clone()).await;

        let consensus = Self { node_id, raft, router };
        if config.members.iter().min() == Some(&node_id) {
            consensus.initialize(&config.members).await?;
        }
        info!(node_id, cluster_tag, members = ?config.members, "consensus started");
        Ok(consensus)
    }

    async fn initialize(&self, members: &[NodeId]) -> Result<(), PoolError> {
        let membership: BTreeMap<NodeId, BasicNode> =
            members.iter().map(|id| (*id, BasicNode::new(format!("node-{id}")))).collect();
        match self.raft.initialize(membership).await {
            Ok(()) => Ok(()),
            Err(RaftError::APIError(InitializeError::NotAllowed(_))) => {
                debug!(node_id = self.node_id, "cluster already initialized");
                Ok(())
            }
            Err(e) => Err(PoolError::Consensus {
                operation: "initialize",
                source: Box::new(e),
            }),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn raft(&self) -> &IpPoolRaft {
        &self.raft
    }

    /// Leader as currently known to this node.
    pub fn current_leader(&self) -> Option<NodeId> {
        self.raft.metrics().borrow().current_leader
    }

    /// Wait until this node knows of a leader.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Result<NodeId, PoolError> {
        let metrics = self
            .raft
            .wait(Some(timeout))
            .metrics(|m| m.current_leader.is_some(), format!("leader known to node {}", self.node_id))
            .await
            .map_err(|e| PoolError::Consensus {
                operation: "leader wait",
                source: Box::new(e),
            })?;
        metrics.current_leader.ok_or(PoolError::NoLeader { node_id: self.node_id })
    }

    /// Stop the node and leave the router.
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        self.router.unregister(self.node_id).await;
        self.raft.shutdown().await.map_err(|e| PoolError::Consensus {
            operation: "shutdown",
            source: Box::new(e),
        })?;
        info!(node_id = self.node_id, "consensus stopped");
        Ok(())
    }

    /// Submit on the leader, then wait for the entry to be applied here too.
    async fn forward(&self, leader: NodeId, command: Command) -> Result<CommandResult, SubmitError> {
        debug!(from = self.node_id, to = leader, name = %command.name, "forwarding command to leader");
        let resp = match self.router.client_write(self.node_id, leader, command).await {
            Ok(resp) => resp,
            Err(RPCError::RemoteError(remote)) => return Err(map_write_error(remote.source)),
            Err(e) => return Err(SubmitError::Unavailable { reason: e.to_string() }),
        };

        let wait = self
            .raft
            .wait(Some(Duration::from_millis(FORWARDED_APPLY_WAIT_MS)))
            .applied_index_at_least(Some(resp.log_id.index), "forwarded write applied locally")
            .await;
        if let Err(e) = wait {
            debug!(index = resp.log_id.index, error = %e, "forwarded write not yet applied locally");
        }
        Ok(resp.data)
    }
}

fn map_write_error(err: RaftError<NodeId, ClientWriteError<NodeId, BasicNode>>) -> SubmitError {
    match err {
        RaftError::APIError(ClientWriteError::ForwardToLeader(fwd)) => SubmitError::NotLeader {
            leader_id: fwd.leader_id,
        },
        RaftError::APIError(e) => SubmitError::Unavailable { reason: e.to_string() },
        RaftError::Fatal(e) => SubmitError::Fatal { reason: e.to_string() },
    }
}

#[async_trait]
impl CommandExecutor for RaftConsensus {
    async fn execute_command(&self, command: Command) -> Result<CommandResult, SubmitError> {
        match self.raft.client_write(command.clone()).await {
            Ok(resp) => Ok(resp.data),
            Err(err) => match map_write_error(err) {
                SubmitError::NotLeader {
                    leader_id: Some(leader),
                } if leader != self.node_id => match self.forward(leader, command).await {
                    // The leader halting does not halt this node.
                    Err(SubmitError::Fatal { reason }) => Err(SubmitError::Unavailable { reason }),
                    other => other,
                },
                other => {
                    warn!(node_id = self.node_id, error = %other, "command submission failed");
                    Err(other)
                }
            },
        }
    }
}
