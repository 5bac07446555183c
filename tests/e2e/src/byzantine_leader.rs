//! E2E Test: Byzantine leader and Merkle mismatches
//!
//! Verifies that inconsistent blocks never reach a ledger:
//! - A pre-prepare whose Merkle root does not match its batch is rejected
//!   by every replica, leaving them idle at height 0
//! - A pre-prepare signed with a key that is not the leader's is dropped
//! - The same leader's honest proposal is then committed by the replicas
//! - At the ledger level, a seal with a wrong Merkle root is refused and
//!   the chain and pending buffer stay as they were
//! - View changes from a faulty validator reporting a huge sequence number
//!   neither move the honest validators' sequence nor stop the leader

use {
    assert_matches::assert_matches,
    ogp_consensus_net::{ConsensusTransport, Topic},
    ogp_consensus_pbft::{
        ConsensusMessage, NodeHandle, PbftConfig, Phase, PrePrepare, ViewChange,
    },
    ogp_crypto::{hash, Keypair},
    ogp_e2e_tests::helpers::*,
    ogp_ledger::{BlockCandidate, BlockSeal, LedgerError},
    ogp_snapshots::MemoryCheckpointStore,
    std::{sync::Arc, time::Duration},
};

/// A valid candidate for block 1 carrying a single mint.
fn honest_candidate() -> BlockCandidate {
    let mut chain = memory_chain();
    chain.add_transaction(mint("alice", 100, 1)).unwrap();
    chain.candidate(0, 1, 1_000).unwrap().unwrap()
}

async fn assert_idle_at_genesis(replicas: &[NodeHandle]) {
    for replica in replicas {
        let health = replica.health().await.unwrap();
        assert_eq!(health.phase, Phase::Idle, "{} accepted a bad proposal", replica.node_id());
        assert_eq!(health.height, 0);
        assert_eq!(health.seq, 0);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: replicas reject forged proposals and commit the honest one
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replicas_reject_merkle_mismatch() {
    init_logging();
    let bus = ogp_consensus_net::LoopbackBus::new();
    let mut replicas = Vec::new();
    for (i, id) in VALIDATOR_IDS.iter().enumerate().skip(1) {
        replicas.push(
            spawn_validator(
                i,
                PbftConfig::dev_default(),
                memory_chain(),
                bus.transport(*id),
                Arc::new(MemoryCheckpointStore::new()),
            )
            .await,
        );
    }
    // The test plays validator A, leader of view 0.
    let leader = bus.transport("A");
    let leader_key = validator_keypair(0);

    let mut forged = honest_candidate();
    forged.header.merkle_root = hash(b"forged root");
    let message = ConsensusMessage::PrePrepare(PrePrepare::signed(forged, "A", &leader_key));
    leader
        .publish(Topic::PrePrepare, message.encode().unwrap())
        .await
        .unwrap();

    let impostor = ConsensusMessage::PrePrepare(PrePrepare::signed(
        honest_candidate(),
        "A",
        &Keypair::generate(),
    ));
    leader
        .publish(Topic::PrePrepare, impostor.encode().unwrap())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_idle_at_genesis(&replicas).await;

    // The honest proposal goes through on B, C and D alone: three of four
    // is a quorum.
    let honest = ConsensusMessage::PrePrepare(PrePrepare::signed(
        honest_candidate(),
        "A",
        &leader_key,
    ));
    leader
        .publish(Topic::PrePrepare, honest.encode().unwrap())
        .await
        .unwrap();
    wait_for_height(&replicas, 1).await;

    let expected = honest_candidate().digest();
    for replica in &replicas {
        let head = replica.latest_block().await.unwrap();
        assert_eq!(*head.hash(), expected);
        assert!(head.verify_signatures(3));
        assert_eq!(replica.balances().await.unwrap().balance("alice"), 100);
        replica.shutdown().await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: a seal whose Merkle root disagrees with the batch is rolled back
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_merkle_mismatch_at_commit_rolls_back() {
    init_logging();
    let mut chain = memory_chain();
    chain.add_transaction(mint("alice", 100, 1)).unwrap();
    let candidate = chain.candidate(0, 1, 1_000).unwrap().unwrap();
    let transactions = candidate.transactions.clone();

    let mut header = candidate.header;
    header.merkle_root = hash(b"not the batch");
    let digest = header.hash();
    let signatures = (0..3)
        .map(|i| {
            let key = validator_keypair(i);
            ogp_ledger::ConsensusSignature {
                validator_id: VALIDATOR_IDS[i].to_string(),
                signature: key.sign_bytes(digest.as_ref()),
                public_key: key.public_key(),
            }
        })
        .collect();

    let result = chain
        .commit_block(BlockSeal {
            header,
            transactions,
            signatures,
            quorum: 3,
        })
        .await;
    assert_matches!(result, Err(LedgerError::MerkleMismatch { expected, .. }) if expected == header.merkle_root);
    assert_eq!(chain.blocks().len(), 1);
    assert_eq!(chain.pending().len(), 1);
    assert!(chain.is_chain_valid());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test: a faulty validator's view changes cannot inflate the sequence
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_inflated_view_change_sequence_ignored() {
    init_logging();
    let bus = ogp_consensus_net::LoopbackBus::new();
    let mut honest = Vec::new();
    for (i, id) in VALIDATOR_IDS.iter().enumerate().take(3) {
        honest.push(
            spawn_validator(
                i,
                PbftConfig::dev_default(),
                memory_chain(),
                bus.transport(*id),
                Arc::new(MemoryCheckpointStore::new()),
            )
            .await,
        );
    }
    // The test plays validator D.
    let faulty = bus.transport("D");
    let faulty_key = validator_keypair(3);
    for new_view in [0, 1, 1_000] {
        let vc = ViewChange::signed(new_view, 1_000_000, "D", &faulty_key).unwrap();
        faulty
            .publish(Topic::ViewChange, ConsensusMessage::ViewChange(vc).encode().unwrap())
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_idle_at_genesis(&honest).await;
    for validator in &honest {
        assert_eq!(validator.health().await.unwrap().view, 0);
    }

    // A still leads view 0 and commits with B and C.
    let leader = &honest[0];
    leader.submit(mint("alice", 100, 1)).await.unwrap();
    assert_eq!(leader.propose().await.unwrap(), 1);
    wait_for_height(&honest, 1).await;
    for validator in &honest {
        let health = validator.health().await.unwrap();
        assert_eq!(health.seq, 1);
        assert_eq!(health.view, 0);
        validator.shutdown().await;
    }
}
