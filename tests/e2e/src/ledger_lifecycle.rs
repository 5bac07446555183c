//! E2E Test: Ledger lifecycle on a 4-validator loopback network
//!
//! Verifies the happy path end to end:
//! - A client mints 100 to Alice and the leader proposes it
//! - Every validator commits block 1 with at least 3 of 4 signatures
//! - Alice transfers 30 to Bob in block 2
//! - All nodes agree on balances, height and chain validity
//! - A transaction submitted while a round is in flight waits for the next
//!   block instead of splitting the leader from the replicas

use {
    assert_matches::assert_matches,
    ogp_consensus_pbft::{ConsensusError, PbftConfig, Phase},
    ogp_e2e_tests::helpers::*,
    ogp_ledger::LedgerError,
    ogp_snapshots::CheckpointStore,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test: mint then transfer, committed by PBFT on all four validators
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mint_and_transfer_reach_all_validators() {
    init_logging();
    let net = LoopbackNetwork::start(PbftConfig::dev_default()).await;
    let leader = net.node("A");
    let handles = net.handles();

    // Block 1: mint.
    leader.submit(mint("alice", 100, 1)).await.unwrap();
    assert_eq!(leader.propose().await.unwrap(), 1);
    wait_for_height(&handles, 1).await;

    // Block 2: transfer.
    leader.submit(transfer("alice", "bob", 30, 2)).await.unwrap();
    assert_eq!(leader.propose().await.unwrap(), 2);
    wait_for_height(&handles, 2).await;

    let reference = leader.latest_block().await.unwrap();
    for handle in &handles {
        let head = handle.latest_block().await.unwrap();
        assert_eq!(head.index(), 2);
        assert_eq!(head.hash(), reference.hash(), "{} diverged", handle.node_id());
        assert!(head.verify_signatures(3));
        assert!(handle.is_chain_valid().await.unwrap());

        let balances = handle.balances().await.unwrap();
        assert_eq!(balances.balance("alice"), 70);
        assert_eq!(balances.balance("bob"), 30);

        let summary = handle.ledger_summary().await.unwrap();
        assert_eq!(summary.len(), 3);
        assert!(summary[1..].iter().all(|line| line.signers.len() >= 3));
    }

    // Each node checkpointed its head after the last commit.
    for node in &net.nodes {
        let checkpoint = node.checkpoints.load().await.expect("checkpoint saved");
        assert_eq!(checkpoint.height, 2);
        assert_eq!(checkpoint.last_hash, *reference.hash());
    }

    let health = leader.health().await.unwrap();
    assert_eq!(health.phase, Phase::Idle);
    assert_eq!(health.view, 0);
    assert_eq!(health.seq, 2);
    assert_eq!(health.leader.as_deref(), Some("A"));
    net.shutdown().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: only the leader of the current view may propose
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replica_cannot_propose() {
    init_logging();
    let net = LoopbackNetwork::start(PbftConfig::dev_default()).await;
    let replica = net.node("B");
    replica.submit(mint("alice", 5, 1)).await.unwrap();
    assert_matches!(
        replica.propose().await,
        Err(ConsensusError::NotLeader { view: 0, leader: Some(leader) }) if leader == "A"
    );
    assert_matches!(net.node("A").propose().await, Err(ConsensusError::NothingToPropose));
    net.shutdown().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: invalid transactions never reach the pending buffer
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invalid_transaction_rejected() {
    init_logging();
    let net = LoopbackNetwork::start(PbftConfig::dev_default()).await;
    let leader = net.node("A");

    assert_matches!(
        leader.submit(mint("alice", -5, 1)).await,
        Err(ConsensusError::Ledger(LedgerError::Validation(_)))
    );
    assert_matches!(leader.propose().await, Err(ConsensusError::NothingToPropose));
    assert_eq!(leader.height(), 0);
    net.shutdown().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: a submit during an in-flight round lands in the next block
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_submit_during_round_kept_for_next_block() {
    init_logging();
    let net = LoopbackNetwork::start(PbftConfig::dev_default()).await;
    let leader = net.node("A");
    let handles = net.handles();

    leader.submit(mint("alice", 100, 1)).await.unwrap();
    assert_eq!(leader.propose().await.unwrap(), 1);
    leader.submit(mint("bob", 5, 2)).await.unwrap();
    wait_for_height(&handles, 1).await;

    let reference = leader.latest_block().await.unwrap();
    assert_eq!(reference.transactions(), &[mint("alice", 100, 1)]);
    for handle in &handles {
        let head = handle.latest_block().await.unwrap();
        assert_eq!(head.hash(), reference.hash(), "{} diverged", handle.node_id());
        let health = handle.health().await.unwrap();
        assert_eq!(health.phase, Phase::Idle);
        assert_eq!(health.height, 1);
    }

    // The late mint is still pending on the leader.
    assert_eq!(leader.propose().await.unwrap(), 2);
    wait_for_height(&handles, 2).await;
    for handle in &handles {
        let balances = handle.balances().await.unwrap();
        assert_eq!(balances.balance("alice"), 100);
        assert_eq!(balances.balance("bob"), 5);
        assert!(handle.is_chain_valid().await.unwrap());
    }
    net.shutdown().await;
}
