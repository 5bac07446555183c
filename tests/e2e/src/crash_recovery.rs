//! E2E Test: Crash recovery from a checkpoint
//!
//! Verifies that a validator restarted from disk rejoins consensus:
//! - Four validators persist blocks and checkpoints under a temp directory
//! - After two commits validator D stops
//! - D's chain is rebuilt from its checkpoint and block log
//! - D restarts and commits block 3 together with the others

use {
    ogp_consensus_pbft::{NodeHandle, PbftConfig},
    ogp_e2e_tests::helpers::*,
    ogp_ledger::{BlockStore, FileBlockStore, LedgerChain, TxValidator},
    ogp_snapshots::{CheckpointStore, FileCheckpointStore},
    std::{path::Path, sync::Arc},
};

fn block_log(dir: &Path, id: &str) -> Arc<FileBlockStore> {
    Arc::new(FileBlockStore::new(dir.join(format!("{id}.blocks.jsonl"))))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restarted_validator_rejoins() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let bus = ogp_consensus_net::LoopbackBus::new();

    let mut handles: Vec<NodeHandle> = Vec::new();
    for (i, id) in VALIDATOR_IDS.iter().enumerate() {
        let chain = LedgerChain::new(block_log(dir.path(), id), TxValidator::new());
        let checkpoints = Arc::new(FileCheckpointStore::new(dir.path(), id));
        handles.push(
            spawn_validator(
                i,
                PbftConfig::dev_default(),
                chain,
                bus.transport(*id),
                checkpoints,
            )
            .await,
        );
    }

    let leader = handles[0].clone();
    leader.submit(mint("alice", 100, 1)).await.unwrap();
    leader.propose().await.unwrap();
    wait_for_height(&handles, 1).await;
    leader.submit(transfer("alice", "bob", 30, 2)).await.unwrap();
    leader.propose().await.unwrap();
    wait_for_height(&handles, 2).await;
    let head = leader.latest_block().await.unwrap();

    // Crash D.
    let d = handles.pop().unwrap();
    d.shutdown().await;

    // Rebuild D from disk.
    let store = block_log(dir.path(), "D");
    assert_eq!(store.list_blocks(1).await.unwrap().len(), 2);
    let checkpoints = Arc::new(FileCheckpointStore::new(dir.path(), "D"));
    let checkpoint = checkpoints.load().await.expect("checkpoint on disk");
    assert_eq!(checkpoint.height, 2);
    assert_eq!(checkpoint.last_hash, *head.hash());

    let recovered =
        LedgerChain::recover_from_snapshot(store, checkpoints.as_ref(), TxValidator::new())
            .await
            .unwrap();
    assert_eq!(recovered.height(), 2);
    assert_eq!(recovered.latest_block().hash(), head.hash());
    assert!(recovered.is_chain_valid());

    let d = spawn_validator(
        3,
        PbftConfig::dev_default(),
        recovered,
        bus.transport("D"),
        checkpoints,
    )
    .await;
    let health = d.health().await.unwrap();
    assert_eq!(health.height, 2);
    assert_eq!(health.seq, 2);
    handles.push(d);

    // Block 3 includes the restarted validator.
    leader.submit(mint("carol", 5, 3)).await.unwrap();
    assert_eq!(leader.propose().await.unwrap(), 3);
    wait_for_height(&handles, 3).await;

    let head = leader.latest_block().await.unwrap();
    for handle in &handles {
        assert_eq!(handle.latest_block().await.unwrap().hash(), head.hash());
        assert!(handle.is_chain_valid().await.unwrap());
        handle.shutdown().await;
    }
}
