//! In-process command executor for tests.
//!
//! [`LocalExecutor`] plays the role of a consensus engine without any
//! networking: commands are sequenced by a mutex, applied to the local state
//! machine immediately, and delivered to follower replicas after a
//! configurable lag. That lag is exactly the commit-visible gap the
//! consistent reader has to mask.
//!
//! ## Usage Pattern
//!
//! ```ignore
//! let leader = Arc::new(IpPoolFsm::new(addresses.clone()));
//! let follower = Arc::new(IpPoolFsm::new(addresses));
//! let executor = LocalExecutor::new(leader.clone());
//! executor.add_replica(follower.clone(), Duration::from_millis(250));
//!
//! executor.fail_command(MARK_LAST_USED_COMMAND, SubmitError::NotLeader { leader_id: None });
//! ```

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::error;

use crate::command::Command;
use crate::command::CommandResult;
use crate::error::SubmitError;
use crate::executor::CommandExecutor;
use crate::fsm::IpPoolFsm;

type Delivery = (Instant, Arc<Vec<u8>>);

/// Single-process stand-in for a replicated log.
#[derive(Clone)]
pub struct LocalExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    fsm: Arc<IpPoolFsm>,
    log: Mutex<LogState>,
    submitted_changed: Notify,
}

#[derive(Default)]
struct LogState {
    replicas: Vec<(mpsc::UnboundedSender<Delivery>, Duration)>,
    committed: Vec<Command>,
    submitted: Vec<Command>,
    fail_next: VecDeque<SubmitError>,
    fail_by_name: HashMap<String, SubmitError>,
    halted: Option<String>,
}

impl LocalExecutor {
    /// Executor whose local replica is `fsm`.
    pub fn new(fsm: Arc<IpPoolFsm>) -> Self {
        Self {
            inner: Arc::new(Inner {
                fsm,
                log: Mutex::new(LogState::default()),
                submitted_changed: Notify::new(),
            }),
        }
    }

    /// Deliver every future commit to `replica` after `lag`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn add_replica(&self, replica: Arc<IpPoolFsm>, lag: Duration) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        tokio::spawn(async move {
            while let Some((deliver_at, entry)) = rx.recv().await {
                tokio::time::sleep_until(deliver_at).await;
                if let Err(e) = replica.apply_entry(&entry) {
                    error!(error = %e, "replica halted");
                    return;
                }
            }
        });
        self.inner.log.lock().replicas.push((tx, lag));
    }

    /// Fail the next submission with `err`, whatever its command.
    pub fn fail_next(&self, err: SubmitError) {
        self.inner.log.lock().fail_next.push_back(err);
    }

    /// Fail every submission of the command `name` with `err` until cleared.
    pub fn fail_command(&self, name: &str, err: SubmitError) {
        self.inner.log.lock().fail_by_name.insert(name.to_string(), err);
    }

    pub fn clear_failures(&self) {
        let mut log = self.inner.log.lock();
        log.fail_next.clear();
        log.fail_by_name.clear();
    }

    /// Whether a fatal apply error has stopped this executor.
    pub fn is_halted(&self) -> bool {
        self.inner.log.lock().halted.is_some()
    }

    /// Commands that were committed, in log order.
    pub fn committed(&self) -> Vec<Command> {
        self.inner.log.lock().committed.clone()
    }

    /// Every submission attempt, including rejected ones.
    pub fn submitted(&self) -> Vec<Command> {
        self.inner.log.lock().submitted.clone()
    }

    /// Wait until at least `count` submissions have been attempted.
    pub async fn wait_for_submitted(&self, count: usize) {
        loop {
            let notified = self.inner.submitted_changed.notified();
            if self.inner.log.lock().submitted.len() >= count {
                return;
            }
            notified.await;
        }
    }

    fn commit(&self, command: Command) -> Result<CommandResult, SubmitError> {
        let mut log = self.inner.log.lock();
        log.submitted.push(command.clone());
        self.inner.submitted_changed.notify_waiters();

        if let Some(reason) = &log.halted {
            return Err(SubmitError::Fatal { reason: reason.clone() });
        }
        if let Some(err) = log.fail_next.pop_front() {
            return Err(err);
        }
        if let Some(err) = log.fail_by_name.get(&command.name) {
            return Err(err.clone());
        }

        let entry = command.to_bytes().map_err(|e| SubmitError::Unavailable { reason: e.to_string() })?;
        match self.inner.fsm.apply_entry(&entry) {
            Ok(result) => {
                let entry = Arc::new(entry);
                let now = Instant::now();
                for (tx, lag) in &log.replicas {
                    // A closed channel means that replica halted; the rest keep going.
                    let _ = tx.send((now + *lag, Arc::clone(&entry)));
                }
                log.committed.push(command);
                Ok(result)
            }
            Err(e) => {
                let reason = e.to_string();
                log.halted = Some(reason.clone());
                Err(SubmitError::Fatal { reason })
            }
        }
    }
}

#[async_trait]
impl CommandExecutor for LocalExecutor {
    async fn execute_command(&self, command: Command) -> Result<CommandResult, SubmitError> {
        self.commit(command)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::address_set::AddressSet;
    use crate::command::CheckoutAddrArgs;
    use crate::constants::CHECKOUT_ADDR_COMMAND;
    use crate::types::PeerId;

    fn addresses() -> AddressSet {
        AddressSet::from_addrs(["100.64.0.1".parse::<Ipv4Addr>().unwrap()])
    }

    fn checkout(domain: &str) -> Command {
        Command::checkout_addr(&CheckoutAddrArgs {
            peer_id: PeerId(1),
            domain: domain.into(),
            reuse_deadline_ms: 0,
            now_ms: 1,
        })
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_replica_applies_after_lag() {
        let leader = Arc::new(IpPoolFsm::new(addresses()));
        let follower = Arc::new(IpPoolFsm::new(addresses()));
        let executor = LocalExecutor::new(leader.clone());
        executor.add_replica(follower.clone(), Duration::from_millis(500));

        executor.execute_command(checkout("a")).await.unwrap();
        assert_eq!(leader.state().peer_count(), 1);
        assert_eq!(follower.state().peer_count(), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(follower.snapshot(), leader.snapshot());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let executor = LocalExecutor::new(Arc::new(IpPoolFsm::new(addresses())));
        executor.fail_next(SubmitError::Unavailable { reason: "flaky".into() });
        assert!(matches!(
            executor.execute_command(checkout("a")).await,
            Err(SubmitError::Unavailable { .. })
        ));
        assert!(executor.execute_command(checkout("a")).await.is_ok());

        executor.fail_command(CHECKOUT_ADDR_COMMAND, SubmitError::NotLeader { leader_id: Some(3) });
        assert_eq!(
            executor.execute_command(checkout("a")).await,
            Err(SubmitError::NotLeader { leader_id: Some(3) })
        );
        executor.clear_failures();
        assert!(executor.execute_command(checkout("a")).await.is_ok());

        assert_eq!(executor.submitted().len(), 4);
        assert_eq!(executor.committed().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_command_halts() {
        let executor = LocalExecutor::new(Arc::new(IpPoolFsm::new(addresses())));
        let bogus = Command {
            name: "bogus".into(),
            args: serde_json::Value::Null,
        };
        assert!(matches!(executor.execute_command(bogus).await, Err(SubmitError::Fatal { .. })));
        assert!(executor.is_halted());
        assert!(matches!(
            executor.execute_command(checkout("a")).await,
            Err(SubmitError::Fatal { .. })
        ));
        assert!(executor.committed().is_empty());
    }
}
