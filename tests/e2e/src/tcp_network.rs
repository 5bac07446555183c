//! E2E Test: PBFT over real TCP sockets
//!
//! Four validators bind ephemeral loopback ports, learn each other's
//! addresses and commit a block through length-prefixed framing.

use {
    ogp_consensus_net::{TcpTransport, TransportConfig},
    ogp_consensus_pbft::PbftConfig,
    ogp_e2e_tests::helpers::*,
    ogp_snapshots::MemoryCheckpointStore,
    std::sync::Arc,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_commit_over_tcp() {
    init_logging();

    let mut transports = Vec::new();
    for id in VALIDATOR_IDS {
        transports.push(
            TcpTransport::start(TransportConfig::dev_default(id))
                .await
                .unwrap(),
        );
    }
    let addrs: Vec<_> = transports.iter().map(TcpTransport::local_addr).collect();
    for (i, transport) in transports.iter_mut().enumerate() {
        let peers = addrs
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, addr)| *addr)
            .collect();
        transport.set_peers(peers);
        assert_eq!(transport.peers().len(), 3);
    }

    let mut handles = Vec::new();
    for (i, transport) in transports.into_iter().enumerate() {
        handles.push(
            spawn_validator(
                i,
                PbftConfig::dev_default(),
                memory_chain(),
                Arc::new(transport),
                Arc::new(MemoryCheckpointStore::new()),
            )
            .await,
        );
    }

    let leader = &handles[0];
    leader.submit(mint("alice", 100, 1)).await.unwrap();
    assert_eq!(leader.propose().await.unwrap(), 1);
    wait_for_height(&handles, 1).await;

    let head = leader.latest_block().await.unwrap();
    for handle in &handles {
        assert_eq!(handle.latest_block().await.unwrap().hash(), head.hash());
        assert_eq!(handle.balances().await.unwrap().balance("alice"), 100);
        handle.shutdown().await;
    }
}
