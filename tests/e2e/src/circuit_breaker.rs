//! E2E Test: Phase timeouts trip the circuit breaker
//!
//! With prepares and view changes lost on the network no round can finish:
//! - Leaders A, B and C each propose in turn; every round times out and
//!   rotates the view on every validator
//! - Three consecutive timeouts open each validator's breaker
//! - D, leader of view 3, is refused with `CircuitOpen` and does not touch
//!   its transport
//! - Once the network heals and the recovery time passes, the breakers go
//!   half-open, D's proposal commits everywhere and every breaker closes

use {
    assert_matches::assert_matches,
    ogp_consensus_net::Topic,
    ogp_consensus_pbft::{ConsensusError, PbftConfig, Phase},
    ogp_e2e_tests::helpers::*,
    ogp_resilience::{CircuitBreakerConfig, CircuitState},
    std::time::Duration,
};

/// Drive views 0, 1 and 2 to a timeout each: the leader proposes, nobody
/// prepares, all validators time out. Replicas keep the staged batch, so
/// each next leader has work.
async fn time_out_three_views(net: &LoopbackNetwork) {
    let handles = net.handles();
    for (view, leader) in ["A", "B", "C"].into_iter().enumerate() {
        let view = u64::try_from(view).unwrap();
        let seq = net.node(leader).propose().await.unwrap();
        assert_eq!(seq, view.saturating_add(1), "{leader} reused a sequence number");
        for handle in &handles {
            let health = wait_for_view(handle, view.saturating_add(1)).await;
            assert_eq!(health.phase, Phase::Idle);
            assert_eq!(health.height, 0);
        }
    }
    for handle in &handles {
        let health = handle.health().await.unwrap();
        assert_eq!(health.view, 3);
        assert_eq!(health.breaker, CircuitState::Open, "{}", handle.node_id());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_timeouts_open_breaker() {
    init_logging();
    let config = PbftConfig {
        phase_timeout_ms: 300,
        ..PbftConfig::dev_default()
    };
    let net = LoopbackNetwork::start(config).await;
    net.bus.set_topic_dropped(Topic::Prepare, true);
    net.bus.set_topic_dropped(Topic::ViewChange, true);

    net.node("A").submit(mint("alice", 100, 1)).await.unwrap();
    time_out_three_views(&net).await;

    // D leads view 3 but its breaker refuses before anything is published.
    let d = &net.nodes[3];
    assert_eq!(d.handle.health().await.unwrap().leader.as_deref(), Some("D"));
    let published = d.transport.publish_count();
    assert_matches!(
        d.handle.propose().await,
        Err(ConsensusError::CircuitOpen { retry_in }) if retry_in > Duration::ZERO
    );
    assert_eq!(d.transport.publish_count(), published);
    assert_eq!(d.handle.health().await.unwrap().phase, Phase::Idle);

    net.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_breaker_recovers_and_commits() {
    init_logging();
    let config = PbftConfig {
        phase_timeout_ms: 300,
        ..PbftConfig::dev_default()
    };
    let recovery_time = Duration::from_millis(800);
    let breaker_config = CircuitBreakerConfig {
        failure_threshold: 3,
        recovery_time,
    };
    let net = LoopbackNetwork::start_with_breaker(config, breaker_config).await;
    net.bus.set_topic_dropped(Topic::Prepare, true);
    net.bus.set_topic_dropped(Topic::ViewChange, true);

    net.node("A").submit(mint("alice", 100, 1)).await.unwrap();
    time_out_three_views(&net).await;
    let d = net.node("D");
    assert_matches!(d.propose().await, Err(ConsensusError::CircuitOpen { .. }));

    // Heal the network and wait out the recovery time.
    net.bus.set_topic_dropped(Topic::Prepare, false);
    net.bus.set_topic_dropped(Topic::ViewChange, false);
    tokio::time::sleep(recovery_time.saturating_mul(2)).await;

    // The first call after recovery is the half-open probe.
    assert_eq!(d.propose().await.unwrap(), 4);
    let handles = net.handles();
    wait_for_height(&handles, 1).await;

    let reference = d.latest_block().await.unwrap();
    assert_eq!(reference.seq(), 4);
    assert_eq!(reference.view(), 3);
    for handle in &handles {
        let health = handle.health().await.unwrap();
        assert_eq!(health.breaker, CircuitState::Closed, "{}", handle.node_id());
        assert_eq!(health.phase, Phase::Idle);
        assert_eq!(
            handle.latest_block().await.unwrap().hash(),
            reference.hash()
        );
        assert_eq!(handle.balances().await.unwrap().balance("alice"), 100);
    }
    net.shutdown().await;
}
