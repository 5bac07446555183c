//! Error types for the consensus engine and node.

use {
    crate::{config::ConfigError, types::Phase},
    ogp_consensus_net::TransportError,
    ogp_crypto::CryptoError,
    ogp_ledger::LedgerError,
    ogp_resilience::GuardError,
    ogp_snapshots::SnapshotError,
    std::time::Duration,
    thiserror::Error,
};

/// Failures surfaced by consensus operations.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("not the leader of view {view} (leader is {leader:?})")]
    NotLeader { view: u64, leader: Option<String> },

    #[error("no pending transactions to propose")]
    NothingToPropose,

    #[error("round already in progress (phase {0})")]
    RoundInProgress(Phase),

    #[error("sequence {seq} outside watermarks [{low}, {high}]")]
    OutsideWatermark { seq: u64, low: u64, high: u64 },

    /// The resilience guard refused the call; nothing was attempted.
    #[error("circuit open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("no commit at height {height} within {waited:?}")]
    Timeout { height: u64, waited: Duration },

    #[error("message codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("consensus node has stopped")]
    NodeStopped,
}

impl<E> From<GuardError<E>> for ConsensusError
where
    ConsensusError: From<E>,
{
    fn from(err: GuardError<E>) -> Self {
        match err {
            GuardError::CircuitOpen { retry_in } => ConsensusError::CircuitOpen { retry_in },
            GuardError::Inner(e) => e.into(),
        }
    }
}

/// Conditions that prevent a node from starting.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The ledger handed to the node fails its integrity walk. Fatal.
    #[error("ledger corrupted at block {index}")]
    CorruptLedger { index: u64 },

    #[error("{0} is not in the validator set or its key does not match")]
    NotAValidator(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("circuit breaker config: {0}")]
    Breaker(#[from] ogp_resilience::ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
