//! End-to-end pool scenarios over the in-process executor.
//!
//! These drive [`ConsensusIpPool`] through its public API with a simulated
//! clock, so reuse deadlines and replication lag are fully controlled.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use consensus_ippool::constants::CHECKOUT_ADDR_COMMAND;
use consensus_ippool::constants::MARK_LAST_USED_COMMAND;
use consensus_ippool::testing::LocalExecutor;
use consensus_ippool::AddressSet;
use consensus_ippool::Command;
use consensus_ippool::CommandExecutor;
use consensus_ippool::ConsensusIpPool;
use consensus_ippool::IpPoolConfig;
use consensus_ippool::PeerId;
use consensus_ippool::PoolError;
use consensus_ippool::SimulatedTimeProvider;
use consensus_ippool::SubmitError;
use consensus_ippool::TimeProvider;
use tokio::time::Instant;

const T0_MS: u64 = 1_700_000_000_000;
const PEER: PeerId = PeerId(7);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("consensus_ippool=debug").try_init();
}

fn x() -> Ipv4Addr {
    Ipv4Addr::new(100, 64, 0, 1)
}

fn y() -> Ipv4Addr {
    Ipv4Addr::new(100, 64, 0, 2)
}

struct Harness {
    pool: ConsensusIpPool,
    executor: LocalExecutor,
    clock: SimulatedTimeProvider,
}

fn harness() -> Harness {
    let clock = SimulatedTimeProvider::new(T0_MS);
    let pool = ConsensusIpPool::new(AddressSet::from_addrs([x(), y()]), IpPoolConfig::default())
        .unwrap()
        .with_time_provider(Arc::new(clock.clone()));
    let executor = LocalExecutor::new(pool.fsm().clone());
    let pool = pool.with_executor(Arc::new(executor.clone()));
    Harness { pool, executor, clock }
}

#[tokio::test]
async fn test_two_address_lifecycle() {
    init_tracing();
    let h = harness();

    assert_eq!(h.pool.get_or_allocate_address(PEER, "a.example").await.unwrap(), x());
    assert_eq!(h.pool.get_or_allocate_address(PEER, "b.example").await.unwrap(), y());
    // Idempotent for a known domain.
    assert_eq!(h.pool.get_or_allocate_address(PEER, "a.example").await.unwrap(), x());

    let err = h.pool.get_or_allocate_address(PEER, "c.example").await.unwrap_err();
    assert!(matches!(err, PoolError::Exhausted { peer } if peer == PEER));

    // Other peers draw from their own copy of the set.
    assert_eq!(h.pool.get_or_allocate_address(PeerId(8), "c.example").await.unwrap(), x());

    h.clock.advance(Duration::from_secs(49 * 3600));

    // Traffic to b keeps Y alive; a has gone idle.
    let submitted = h.executor.submitted().len();
    let now = h.clock.now_unix_ms();
    assert_eq!(h.pool.resolve_domain(PEER, y(), now).await.as_deref(), Some("b.example"));
    h.executor.wait_for_submitted(submitted + 1).await;

    assert_eq!(h.pool.get_or_allocate_address(PEER, "c.example").await.unwrap(), x());
    assert_eq!(h.pool.resolve_domain(PEER, x(), now).await.as_deref(), Some("c.example"));

    let state = h.pool.state().peer(PEER).unwrap();
    assert_eq!(state.addr_for_domain("a.example"), None);
    assert_eq!(state.addr_for_domain("b.example"), Some(y()));
    assert!(state.is_bijective());
}

#[tokio::test]
async fn test_resolve_submits_usage_refresh() {
    let h = harness();
    h.pool.get_or_allocate_address(PEER, "a.example").await.unwrap();

    let observed = T0_MS + 5_000;
    assert_eq!(h.pool.resolve_domain(PEER, x(), observed).await.as_deref(), Some("a.example"));
    h.executor.wait_for_submitted(2).await;

    let submitted = h.executor.submitted();
    assert_eq!(submitted[1].name, MARK_LAST_USED_COMMAND);
    let ww = h.pool.state().peer(PEER).unwrap().where_when(x()).unwrap();
    assert_eq!(ww.last_used_ms, observed);
}

#[tokio::test]
async fn test_stale_refresh_does_not_regress() {
    let h = harness();
    h.clock.advance_ms(10_000);
    h.pool.get_or_allocate_address(PEER, "a.example").await.unwrap();

    h.pool.resolve_domain(PEER, x(), T0_MS).await;
    h.executor.wait_for_submitted(2).await;

    let ww = h.pool.state().peer(PEER).unwrap().where_when(x()).unwrap();
    assert_eq!(ww.last_used_ms, T0_MS + 10_000);
}

#[tokio::test]
async fn test_refresh_failure_does_not_affect_lookup() {
    init_tracing();
    let h = harness();
    h.pool.get_or_allocate_address(PEER, "a.example").await.unwrap();
    h.executor.fail_command(MARK_LAST_USED_COMMAND, SubmitError::NotLeader { leader_id: None });

    let domain = h.pool.resolve_domain(PEER, x(), T0_MS + 1_000).await;
    assert_eq!(domain.as_deref(), Some("a.example"));
    h.executor.wait_for_submitted(2).await;

    assert_eq!(h.executor.committed().len(), 1);
    let ww = h.pool.state().peer(PEER).unwrap().where_when(x()).unwrap();
    assert_eq!(ww.last_used_ms, T0_MS);
}

#[tokio::test(start_paused = true)]
async fn test_miss_gives_up_after_bounded_wait() {
    let h = harness();
    h.pool.get_or_allocate_address(PEER, "a.example").await.unwrap();

    let start = Instant::now();
    assert_eq!(h.pool.resolve_domain(PEER, y(), T0_MS).await, None);
    assert_eq!(h.pool.resolve_domain(PeerId(99), x(), T0_MS).await, None);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(3000));
    assert!(elapsed < Duration::from_millis(3200));

    // Misses never submit a refresh.
    assert_eq!(h.executor.submitted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_follower_lag_is_masked() {
    init_tracing();
    let leader = harness();
    let follower = ConsensusIpPool::new(AddressSet::from_addrs([x(), y()]), IpPoolConfig::default())
        .unwrap()
        .with_executor(Arc::new(leader.executor.clone()));
    leader.executor.add_replica(follower.fsm().clone(), Duration::from_millis(250));

    let addr = leader.pool.get_or_allocate_address(PEER, "a.example").await.unwrap();
    assert!(follower.state().peer(PEER).is_none());

    let start = Instant::now();
    assert_eq!(follower.resolve_domain(PEER, addr, T0_MS).await.as_deref(), Some("a.example"));
    assert!(start.elapsed() >= Duration::from_millis(250));
    assert_eq!(follower.fsm().snapshot(), leader.pool.fsm().snapshot());
}

#[tokio::test]
async fn test_submission_errors_are_distinct_from_rejections() {
    let h = harness();

    h.executor.fail_next(SubmitError::Unavailable {
        reason: "no quorum".into(),
    });
    let err = h.pool.get_or_allocate_address(PEER, "a.example").await.unwrap_err();
    assert!(matches!(err, PoolError::Submission { .. }));
    assert!(err.is_retryable());
    assert!(h.pool.state().peer(PEER).is_none());

    // The same request succeeds once the engine recovers.
    assert_eq!(h.pool.get_or_allocate_address(PEER, "a.example").await.unwrap(), x());
    h.pool.get_or_allocate_address(PEER, "b.example").await.unwrap();

    let err = h.pool.get_or_allocate_address(PEER, "c.example").await.unwrap_err();
    assert!(matches!(err, PoolError::Exhausted { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_unknown_command_halts_replica() {
    let h = harness();
    h.pool.get_or_allocate_address(PEER, "a.example").await.unwrap();

    let bogus = Command::new("reserveAddr", &serde_json::json!({ "peer_id": 7 })).unwrap();
    let err = h.executor.execute_command(bogus).await.unwrap_err();
    assert!(matches!(err, SubmitError::Fatal { .. }));
    assert!(h.executor.is_halted());

    let err = h.pool.get_or_allocate_address(PEER, "b.example").await.unwrap_err();
    assert!(matches!(err, PoolError::Submission { source: SubmitError::Fatal { .. } }));
    assert!(!err.is_retryable());

    // State from before the halt is untouched.
    assert_eq!(h.pool.state().peer(PEER).unwrap().domain_count(), 1);
    assert_eq!(
        h.executor.committed().iter().filter(|c| c.name == CHECKOUT_ADDR_COMMAND).count(),
        1
    );
}
