//! The public IP pool API.
//!
//! Writes (`get_or_allocate_address`) go through the attached
//! [`CommandExecutor`] and return once the command is applied locally.
//! Reads (`resolve_domain`) are served from local state and never wait for
//! consensus, apart from the bounded retry that masks replication lag.

use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::RwLock;
use snafu::ResultExt;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::address_set::AddressSet;
use crate::command::CheckoutAddrArgs;
use crate::command::Command;
use crate::command::CommandResult;
use crate::command::MarkLastUsedArgs;
use crate::config::IpPoolConfig;
use crate::constants::MAX_DOMAIN_LENGTH;
use crate::error::ApplyError;
use crate::error::CodecSnafu;
use crate::error::InvalidConfigSnafu;
use crate::error::PoolError;
use crate::error::SubmissionSnafu;
use crate::error::SubmitError;
use crate::executor::CommandExecutor;
use crate::fsm::IpPoolFsm;
use crate::raft::RaftConsensus;
use crate::raft::RaftRouter;
use crate::reader::lookup_with_retry;
use crate::reader::LookupBackoff;
use crate::state::PoolState;
use crate::time::reuse_deadline_ms;
use crate::time::SystemTimeProvider;
use crate::time::TimeProvider;
use crate::types::PeerId;

/// Consensus-replicated pool of IPv4 addresses for (peer, domain) pairs.
pub struct ConsensusIpPool {
    fsm: Arc<IpPoolFsm>,
    config: IpPoolConfig,
    time: Arc<dyn TimeProvider>,
    executor: RwLock<Option<Arc<dyn CommandExecutor>>>,
    consensus: Mutex<Option<Arc<RaftConsensus>>>,
}

impl ConsensusIpPool {
    /// Create a pool over `addresses` with no executor attached.
    pub fn new(addresses: AddressSet, config: IpPoolConfig) -> Result<Self, PoolError> {
        config.validate().context(InvalidConfigSnafu)?;
        Ok(Self {
            fsm: Arc::new(IpPoolFsm::new(addresses)),
            config,
            time: Arc::new(SystemTimeProvider),
            executor: RwLock::new(None),
            consensus: Mutex::new(None),
        })
    }

    /// Replace the clock used to stamp commands.
    pub fn with_time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    /// Attach a custom executor instead of starting Raft.
    pub fn with_executor(self, executor: Arc<dyn CommandExecutor>) -> Self {
        *self.executor.write() = Some(executor);
        self
    }

    /// The local state machine. Executors must apply committed commands to it.
    pub fn fsm(&self) -> &Arc<IpPoolFsm> {
        &self.fsm
    }

    pub fn state(&self) -> &PoolState {
        self.fsm.state()
    }

    pub fn address_set(&self) -> &AddressSet {
        self.fsm.addresses()
    }

    pub fn config(&self) -> &IpPoolConfig {
        &self.config
    }

    /// The running Raft node, if `start_consensus` succeeded.
    pub async fn consensus(&self) -> Option<Arc<RaftConsensus>> {
        self.consensus.lock().await.clone()
    }

    /// Address for `domain` as seen by `peer`, allocating one if needed.
    #[instrument(skip(self))]
    pub async fn get_or_allocate_address(&self, peer: PeerId, domain: &str) -> Result<Ipv4Addr, PoolError> {
        validate_domain(domain)?;

        let now_ms = self.time.now_unix_ms();
        let args = CheckoutAddrArgs {
            peer_id: peer,
            domain: domain.to_string(),
            reuse_deadline_ms: reuse_deadline_ms(now_ms, self.config.reuse_after()),
            now_ms,
        };
        let command = Command::checkout_addr(&args).context(CodecSnafu)?;

        match self.submit(command).await?.into_result() {
            Ok(bytes) => serde_json::from_slice(&bytes).context(CodecSnafu),
            Err(ApplyError::Exhausted) => {
                warn!(%peer, domain, "ip pool exhausted");
                Err(PoolError::Exhausted { peer })
            }
            Err(source) => Err(PoolError::Rejected { source }),
        }
    }

    /// Domain that `addr` is assigned to for `peer`, from local state.
    ///
    /// On a hit, a usage refresh stamped `observed_at_ms` is submitted in the
    /// background; its outcome never affects the returned value.
    #[instrument(skip(self))]
    pub async fn resolve_domain(&self, peer: PeerId, addr: Ipv4Addr, observed_at_ms: u64) -> Option<String> {
        let domain = lookup_with_retry(self.fsm.state(), peer, addr, self.backoff()).await?;
        self.spawn_usage_refresh(MarkLastUsedArgs {
            peer_id: peer,
            addr,
            domain: domain.clone(),
            updated_at_ms: observed_at_ms,
        });
        Some(domain)
    }

    /// Start a Raft node for this pool on `network`.
    ///
    /// Node id and membership come from `config.consensus`. The member with
    /// the lowest id bootstraps the cluster.
    pub async fn start_consensus(&self, network: RaftRouter, cluster_tag: &str) -> Result<(), PoolError> {
        let mut slot = self.consensus.lock().await;
        if slot.is_some() {
            return Err(PoolError::AlreadyStarted);
        }
        let consensus =
            Arc::new(RaftConsensus::start(&self.config.consensus, cluster_tag, Arc::clone(&self.fsm), network).await?);
        *self.executor.write() = Some(consensus.clone() as Arc<dyn CommandExecutor>);
        *slot = Some(consensus);
        Ok(())
    }

    /// Stop the Raft node. Later writes fail with `NotStarted`.
    pub async fn stop_consensus(&self) -> Result<(), PoolError> {
        let Some(consensus) = self.consensus.lock().await.take() else {
            debug!("stop_consensus called without a running node");
            return Ok(());
        };
        *self.executor.write() = None;
        consensus.shutdown().await
    }

    fn backoff(&self) -> LookupBackoff {
        LookupBackoff {
            initial_ms: self.config.lookup_initial_backoff_ms,
            max_retries: self.config.lookup_max_retries,
        }
    }

    fn current_executor(&self) -> Option<Arc<dyn CommandExecutor>> {
        self.executor.read().clone()
    }

    async fn submit(&self, command: Command) -> Result<CommandResult, PoolError> {
        let executor = self.current_executor().ok_or(SubmitError::NotStarted).context(SubmissionSnafu)?;
        executor.execute_command(command).await.context(SubmissionSnafu)
    }

    fn spawn_usage_refresh(&self, args: MarkLastUsedArgs) {
        let Some(executor) = self.current_executor() else {
            debug!(peer = %args.peer_id, addr = %args.addr, "no executor; skipping usage refresh");
            return;
        };
        tokio::spawn(async move {
            let command = match Command::mark_last_used(&args) {
                Ok(command) => command,
                Err(e) => {
                    warn!(peer = %args.peer_id, addr = %args.addr, error = %e, "cannot encode usage refresh");
                    return;
                }
            };
            match executor.execute_command(command).await {
                Ok(CommandResult { error: Some(e), .. }) => {
                    warn!(peer = %args.peer_id, addr = %args.addr, error = %e, "usage refresh rejected");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(peer = %args.peer_id, addr = %args.addr, error = %e, "usage refresh failed");
                }
            }
        });
    }
}

/// Reject domains that cannot be a DNS name before they reach the log.
fn validate_domain(domain: &str) -> Result<(), PoolError> {
    let reason = if domain.is_empty() {
        "empty"
    } else if domain.len() > MAX_DOMAIN_LENGTH {
        "longer than 253 bytes"
    } else if domain.chars().any(|c| c.is_whitespace() || c.is_control()) {
        "contains whitespace or control characters"
    } else {
        return Ok(());
    };
    Err(PoolError::InvalidDomain {
        domain: domain.to_string(),
        reason: reason.to_string(),
    })
}
