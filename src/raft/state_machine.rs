//! openraft state machine adapter around [`IpPoolFsm`].
//!
//! Committed entries are dispatched in log order. A dispatch error is
//! returned to openraft as a storage error, which stops the node instead of
//! letting it diverge from the rest of the cluster.
//!
//! Snapshots are the JSON encoding of a [`PoolSnapshot`].

use std::io::Cursor;
use std::sync::Arc;

use openraft::storage::RaftSnapshotBuilder;
use openraft::storage::RaftStateMachine;
use openraft::AnyError;
use openraft::BasicNode;
use openraft::Entry;
use openraft::EntryPayload;
use openraft::LogId;
use openraft::OptionalSend;
use openraft::Snapshot;
use openraft::SnapshotMeta;
use openraft::StorageError;
use openraft::StorageIOError;
use openraft::StoredMembership;
use tokio::sync::RwLock;
use tracing::error;
use tracing::info;

use crate::command::CommandResult;
use crate::fsm::IpPoolFsm;
use crate::raft::types::NodeId;
use crate::raft::types::TypeConfig;
use crate::state::PoolSnapshot;

type StoResult<T> = Result<T, StorageError<NodeId>>;

fn sto(err: StorageIOError<NodeId>) -> StorageError<NodeId> {
    StorageError::from(err)
}

/// The last snapshot this node built or installed.
#[derive(Debug, Clone)]
struct StoredSnapshot {
    meta: SnapshotMeta<NodeId, BasicNode>,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct StateMachineMeta {
    last_applied: Option<LogId<NodeId>>,
    last_membership: StoredMembership<NodeId, BasicNode>,
    current_snapshot: Option<StoredSnapshot>,
    snapshot_idx: u64,
}

/// Raft state machine that applies commands to a shared [`IpPoolFsm`].
///
/// The same `IpPoolFsm` is read by the local consistent reader; this adapter
/// is its only writer.
#[derive(Clone)]
pub struct PoolStateMachine {
    fsm: Arc<IpPoolFsm>,
    meta: Arc<RwLock<StateMachineMeta>>,
}

impl PoolStateMachine {
    pub fn new(fsm: Arc<IpPoolFsm>) -> Self {
        Self {
            fsm,
            meta: Arc::new(RwLock::new(StateMachineMeta::default())),
        }
    }

    pub fn fsm(&self) -> &Arc<IpPoolFsm> {
        &self.fsm
    }
}

impl RaftSnapshotBuilder<TypeConfig> for PoolStateMachine {
    async fn build_snapshot(&mut self) -> StoResult<Snapshot<TypeConfig>> {
        let mut meta = self.meta.write().await;
        let data = serde_json::to_vec(&self.fsm.snapshot()).map_err(|e| {
            let err = AnyError::new(&e);
            sto(StorageIOError::read_snapshot(None, err))
        })?;

        meta.snapshot_idx += 1;
        let snapshot_id = match meta.last_applied {
            Some(last) => format!("ippool-{}-{}-{}", last.leader_id, last.index, meta.snapshot_idx),
            None => format!("ippool--{}", meta.snapshot_idx),
        };
        let snapshot_meta = SnapshotMeta {
            last_log_id: meta.last_applied,
            last_membership: meta.last_membership.clone(),
            snapshot_id,
        };
        meta.current_snapshot = Some(StoredSnapshot {
            meta: snapshot_meta.clone(),
            data: data.clone(),
        });

        info!(snapshot_id = %snapshot_meta.snapshot_id, bytes = data.len(), "built pool snapshot");
        Ok(Snapshot {
            meta: snapshot_meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

impl RaftStateMachine<TypeConfig> for PoolStateMachine {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> StoResult<(Option<LogId<NodeId>>, StoredMembership<NodeId, BasicNode>)> {
        let meta = self.meta.read().await;
        Ok((meta.last_applied, meta.last_membership.clone()))
    }

    async fn apply<I>(&mut self, entries: I) -> StoResult<Vec<CommandResult>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        let mut meta = self.meta.write().await;
        let mut responses = Vec::new();
        for entry in entries {
            let response = match entry.payload {
                EntryPayload::Blank => CommandResult::default(),
                EntryPayload::Normal(command) => self.fsm.apply(&command).map_err(|e| {
                    error!(index = entry.log_id.index, error = %e, "cannot apply log entry; stopping node");
                    let err = AnyError::new(&e);
                    sto(StorageIOError::write_state_machine(err))
                })?,
                EntryPayload::Membership(membership) => {
                    meta.last_membership = StoredMembership::new(Some(entry.log_id), membership);
                    CommandResult::default()
                }
            };
            meta.last_applied = Some(entry.log_id);
            responses.push(response);
        }
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }

    async fn begin_receiving_snapshot(&mut self) -> StoResult<Box<Cursor<Vec<u8>>>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeId, BasicNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> StoResult<()> {
        let data = snapshot.into_inner();
        let image: PoolSnapshot = serde_json::from_slice(&data).map_err(|e| {
            let err = AnyError::new(&e);
            sto(StorageIOError::write_snapshot(Some(meta.signature()), err))
        })?;

        let mut sm_meta = self.meta.write().await;
        self.fsm.restore(&image);
        sm_meta.last_applied = meta.last_log_id;
        sm_meta.last_membership = meta.last_membership.clone();
        sm_meta.current_snapshot = Some(StoredSnapshot {
            meta: meta.clone(),
            data,
        });

        info!(snapshot_id = %meta.snapshot_id, peers = image.peers.len(), "installed pool snapshot");
        Ok(())
    }

    async fn get_current_snapshot(&mut self) -> StoResult<Option<Snapshot<TypeConfig>>> {
        let meta = self.meta.read().await;
        Ok(meta.current_snapshot.as_ref().map(|stored| Snapshot {
            meta: stored.meta.clone(),
            snapshot: Box::new(Cursor::new(stored.data.clone())),
        }))
    }
}
