//! Error types for the ledger.

use {
    ogp_crypto::{CryptoError, Hash},
    thiserror::Error,
};

/// A transaction failed an admission rule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transaction rejected by rule:{rule}")]
pub struct ValidationError {
    /// Name of the first rule that failed.
    pub rule: String,
}

/// Failures of the durable block store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("block store unavailable: {0}")]
    Unavailable(String),

    #[error("block store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("block encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Errors from mutating the ledger chain.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The candidate block does not extend the current head.
    #[error("block {index} does not link to the chain head")]
    LinkError { index: u64 },

    /// The agreed Merkle root differs from the one recomputed locally.
    #[error("merkle root mismatch: expected {expected:?}, computed {actual:?}")]
    MerkleMismatch { expected: Hash, actual: Hash },

    #[error("transaction {index} carries an invalid signature")]
    InvalidTransactionSignature { index: usize },

    #[error("block carries {valid} valid validator signatures, quorum is {quorum}")]
    InsufficientSignatures { valid: usize, quorum: usize },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Reasons [`LedgerChain::recover_from_snapshot`](crate::LedgerChain::recover_from_snapshot)
/// could not rebuild a chain.
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("no checkpoint to recover from")]
    NoCheckpoint,

    #[error("checkpoint block {0:?} not found in the block store")]
    MissingBlock(Hash),

    #[error("checkpoint height {checkpoint} does not match block index {block}")]
    HeightMismatch { checkpoint: u64, block: u64 },

    #[error("checkpoint block {0} failed its integrity check")]
    CorruptBlock(u64),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
