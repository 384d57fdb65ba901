//! In-process Raft transport.
//!
//! [`RaftRouter`] is the network handle that every node of one process
//! joins. It delivers Raft RPCs by calling the target node's `Raft` handle
//! directly, optionally after a fixed latency, and supports symmetric link
//! partitions for failure testing.

use std::collections::HashMap;
use std::collections::HashSet;
use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use openraft::error::ClientWriteError;
use openraft::error::InstallSnapshotError;
use openraft::error::NetworkError;
use openraft::error::RPCError;
use openraft::error::RaftError;
use openraft::error::RemoteError;
use openraft::network::RPCOption;
use openraft::network::RaftNetwork;
use openraft::network::RaftNetworkFactory;
use openraft::raft::AppendEntriesRequest;
use openraft::raft::AppendEntriesResponse;
use openraft::raft::ClientWriteResponse;
use openraft::raft::InstallSnapshotRequest;
use openraft::raft::InstallSnapshotResponse;
use openraft::raft::VoteRequest;
use openraft::raft::VoteResponse;
use openraft::BasicNode;
use tokio::sync::RwLock;
use tracing::debug;

use crate::command::Command;
use crate::raft::types::IpPoolRaft;
use crate::raft::types::NodeId;
use crate::raft::types::TypeConfig;

/// Result of a forwarded client write.
pub type ForwardResult =
    Result<ClientWriteResponse<TypeConfig>, RPCError<NodeId, BasicNode, RaftError<NodeId, ClientWriteError<NodeId, BasicNode>>>>;

/// Shared in-process network joining Raft nodes.
#[derive(Clone, Default)]
pub struct RaftRouter {
    inner: Arc<RaftRouterInner>,
}

#[derive(Default)]
struct RaftRouterInner {
    peers: RwLock<HashMap<NodeId, IpPoolRaft>>,
    partitions: RwLock<HashSet<(NodeId, NodeId)>>,
    rpc_latency: Duration,
}

impl RaftRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router that delays every RPC by `latency`.
    pub fn with_rpc_latency(latency: Duration) -> Self {
        Self {
            inner: Arc::new(RaftRouterInner {
                rpc_latency: latency,
                ..RaftRouterInner::default()
            }),
        }
    }

    pub async fn register(&self, node: NodeId, raft: IpPoolRaft) {
        self.inner.peers.write().await.insert(node, raft);
    }

    pub async fn unregister(&self, node: NodeId) {
        self.inner.peers.write().await.remove(&node);
    }

    /// Cut the link between `a` and `b` in both directions.
    pub async fn isolate(&self, a: NodeId, b: NodeId) {
        let mut links = self.inner.partitions.write().await;
        links.insert((a, b));
        links.insert((b, a));
    }

    /// Cut `node` off from every other registered node.
    pub async fn isolate_node(&self, node: NodeId) {
        let others: Vec<NodeId> = self.inner.peers.read().await.keys().copied().filter(|id| *id != node).collect();
        for other in others {
            self.isolate(node, other).await;
        }
    }

    pub async fn heal_all(&self) {
        self.inner.partitions.write().await.clear();
    }

    async fn connected(&self, a: NodeId, b: NodeId) -> bool {
        !self.inner.partitions.read().await.contains(&(a, b))
    }

    /// Factory handed to `Raft::new` for node `node`.
    pub fn network_factory(&self, node: NodeId) -> RouterNetworkFactory {
        RouterNetworkFactory {
            node,
            router: self.clone(),
        }
    }

    /// Submit `command` on node `to` on behalf of node `from`.
    pub async fn client_write(&self, from: NodeId, to: NodeId, command: Command) -> ForwardResult {
        self.with_target(from, to, move |raft| async move { raft.client_write(command).await }).await
    }

    async fn with_target<F, Fut, T, E>(
        &self,
        from: NodeId,
        to: NodeId,
        f: F,
    ) -> Result<T, RPCError<NodeId, BasicNode, RaftError<NodeId, E>>>
    where
        F: FnOnce(IpPoolRaft) -> Fut,
        Fut: Future<Output = Result<T, RaftError<NodeId, E>>>,
        E: Send + Sync + std::fmt::Debug + StdError + 'static,
    {
        if !self.connected(from, to).await {
            return Err(RPCError::Network(link_error("link down")));
        }
        let target = self.inner.peers.read().await.get(&to).cloned().ok_or_else(|| {
            debug!(from, to, "rpc to unregistered node");
            RPCError::Network(link_error("node not registered"))
        })?;
        if !self.inner.rpc_latency.is_zero() {
            tokio::time::sleep(self.inner.rpc_latency).await;
        }
        match f(target).await {
            Ok(resp) => Ok(resp),
            Err(err) => Err(RPCError::RemoteError(RemoteError::new(to, err))),
        }
    }
}

/// Creates [`RouterNetwork`] clients for one node.
#[derive(Clone)]
pub struct RouterNetworkFactory {
    node: NodeId,
    router: RaftRouter,
}

impl RaftNetworkFactory<TypeConfig> for RouterNetworkFactory {
    type Network = RouterNetwork;

    async fn new_client(&mut self, target: NodeId, _node: &BasicNode) -> Self::Network {
        RouterNetwork {
            from: self.node,
            target,
            router: self.router.clone(),
        }
    }
}

/// Raft RPC client from one node to another over the router.
pub struct RouterNetwork {
    from: NodeId,
    target: NodeId,
    router: RaftRouter,
}

impl RaftNetwork<TypeConfig> for RouterNetwork {
    async fn append_entries(
        &mut self,
        req: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        self.router
            .with_target(self.from, self.target, move |raft| async move { raft.append_entries(req).await })
            .await
    }

    async fn install_snapshot(
        &mut self,
        req: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<InstallSnapshotResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId, InstallSnapshotError>>>
    {
        self.router
            .with_target(self.from, self.target, move |raft| async move { raft.install_snapshot(req).await })
            .await
    }

    async fn vote(
        &mut self,
        req: VoteRequest<NodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        self.router.with_target(self.from, self.target, move |raft| async move { raft.vote(req).await }).await
    }
}

fn link_error(reason: &str) -> NetworkError {
    let err = io::Error::new(io::ErrorKind::NotConnected, reason.to_string());
    NetworkError::new(&err)
}
