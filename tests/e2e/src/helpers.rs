//! Shared test utilities for OGP end-to-end tests.
//!
//! Provides a simulated network environment that orchestrates:
//! - Four validators `A`, `B`, `C`, `D` with deterministic keys
//! - One PBFT node task per validator over a shared loopback bus
//! - Client transactions signed by a deterministic client key
//! - Polling helpers for heights and views

use {
    log::*,
    ogp_consensus_net::{ConsensusTransport, LoopbackBus, LoopbackTransport},
    ogp_consensus_pbft::{
        ConsensusHealth, NodeHandle, NodeSetup, PbftConfig, PbftNode, ValidatorSet,
    },
    ogp_crypto::Keypair,
    ogp_ledger::{LedgerChain, MemoryBlockStore, Transaction, TxValidator},
    ogp_resilience::CircuitBreakerConfig,
    ogp_snapshots::{CheckpointStore, MemoryCheckpointStore},
    std::{sync::Arc, time::Duration},
    tokio::time::{sleep, Instant},
};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Validator ids, in leader rotation order.
pub const VALIDATOR_IDS: [&str; 4] = ["A", "B", "C", "D"];

/// How long a test waits for something the network should do quickly.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval for [`wait_for_view`].
const POLL_INTERVAL: Duration = Duration::from_millis(20);

// ─────────────────────────────────────────────────────────────────────────────
// Keys and transactions
// ─────────────────────────────────────────────────────────────────────────────

pub fn init_logging() {
    ogp_logger::setup_with_default("ogp=info,ogp_consensus_pbft=info");
}

/// Deterministic signing key of validator `index`.
pub fn validator_keypair(index: usize) -> Keypair {
    let mut seed = [0x5A; 32];
    seed[0] = u8::try_from(index).expect("small validator index");
    Keypair::from_seed(&seed).expect("valid seed")
}

/// The four-validator set every scenario uses.
pub fn validator_set() -> ValidatorSet {
    ValidatorSet::new(
        VALIDATOR_IDS
            .iter()
            .enumerate()
            .map(|(i, id)| (id.to_string(), validator_keypair(i).public_key()))
            .collect(),
    )
}

/// Key the simulated client signs its transactions with.
pub fn client_keypair() -> Keypair {
    Keypair::from_seed(&[0xC1; 32]).expect("valid seed")
}

pub fn mint(to: &str, amount: i64, nonce: u64) -> Transaction {
    Transaction::mint("treasury", to, amount, nonce)
        .signed(&client_keypair())
        .expect("sign mint")
}

pub fn transfer(from: &str, to: &str, amount: i64, nonce: u64) -> Transaction {
    Transaction::transfer(from, to, amount, nonce)
        .signed(&client_keypair())
        .expect("sign transfer")
}

// ─────────────────────────────────────────────────────────────────────────────
// Nodes
// ─────────────────────────────────────────────────────────────────────────────

/// Start validator `index` on `transport` with the given chain and stores.
pub async fn spawn_validator(
    index: usize,
    config: PbftConfig,
    chain: LedgerChain,
    transport: Arc<dyn ConsensusTransport>,
    checkpoints: Arc<dyn CheckpointStore>,
) -> NodeHandle {
    spawn_validator_with_breaker(
        index,
        config,
        CircuitBreakerConfig::default(),
        chain,
        transport,
        checkpoints,
    )
    .await
}

pub async fn spawn_validator_with_breaker(
    index: usize,
    config: PbftConfig,
    breaker_config: CircuitBreakerConfig,
    chain: LedgerChain,
    transport: Arc<dyn ConsensusTransport>,
    checkpoints: Arc<dyn CheckpointStore>,
) -> NodeHandle {
    PbftNode::spawn(NodeSetup {
        config,
        breaker_config,
        keypair: validator_keypair(index),
        validators: validator_set(),
        chain,
        transport,
        checkpoints,
    })
    .await
    .expect("spawn validator")
}

pub fn memory_chain() -> LedgerChain {
    LedgerChain::new(Arc::new(MemoryBlockStore::new()), TxValidator::new())
}

/// One validator of a [`LoopbackNetwork`].
pub struct TestNode {
    pub handle: NodeHandle,
    pub transport: Arc<LoopbackTransport>,
    pub checkpoints: Arc<MemoryCheckpointStore>,
}

/// Four validators on one loopback bus.
pub struct LoopbackNetwork {
    pub bus: LoopbackBus,
    pub nodes: Vec<TestNode>,
}

impl LoopbackNetwork {
    /// Start all four validators with in-memory stores.
    pub async fn start(config: PbftConfig) -> Self {
        Self::start_with_breaker(config, CircuitBreakerConfig::default()).await
    }

    pub async fn start_with_breaker(
        config: PbftConfig,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        let bus = LoopbackBus::new();
        let mut nodes = Vec::with_capacity(VALIDATOR_IDS.len());
        for (i, id) in VALIDATOR_IDS.iter().enumerate() {
            let transport = bus.transport(*id);
            let checkpoints = Arc::new(MemoryCheckpointStore::new());
            let handle = spawn_validator_with_breaker(
                i,
                config.clone(),
                breaker_config.clone(),
                memory_chain(),
                transport.clone(),
                checkpoints.clone(),
            )
            .await;
            nodes.push(TestNode {
                handle,
                transport,
                checkpoints,
            });
        }
        info!("loopback network of {} validators started", nodes.len());
        Self { bus, nodes }
    }

    pub fn node(&self, id: &str) -> &NodeHandle {
        let index = VALIDATOR_IDS
            .iter()
            .position(|candidate| *candidate == id)
            .expect("known validator id");
        &self.nodes[index].handle
    }

    pub fn handles(&self) -> Vec<NodeHandle> {
        self.nodes.iter().map(|node| node.handle.clone()).collect()
    }

    pub async fn shutdown(&self) {
        for node in &self.nodes {
            node.handle.shutdown().await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Waiting
// ─────────────────────────────────────────────────────────────────────────────

/// Wait until every node in `handles` reached `height`.
pub async fn wait_for_height(handles: &[NodeHandle], height: u64) {
    for handle in handles {
        handle
            .wait_for_height(height, SETTLE_TIMEOUT)
            .await
            .unwrap_or_else(|e| panic!("{} never reached height {height}: {e}", handle.node_id()));
    }
}

/// Poll until `handle` is in `view` or later; returns its health then.
pub async fn wait_for_view(handle: &NodeHandle, view: u64) -> ConsensusHealth {
    let deadline = Instant::now()
        .checked_add(SETTLE_TIMEOUT)
        .expect("deadline in range");
    loop {
        let health = handle.health().await.expect("node running");
        if health.view >= view {
            return health;
        }
        assert!(
            Instant::now() < deadline,
            "{} stuck in view {} waiting for view {view}",
            handle.node_id(),
            health.view
        );
        sleep(POLL_INTERVAL).await;
    }
}
