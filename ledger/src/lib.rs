//! OGP Ledger chain
//!
//! The ledger is an append-only chain of sealed blocks fed by a buffer of
//! validated client transactions:
//!
//! ```text
//!  client tx ──► TxValidator ──► pending buffer ──► candidate ──► consensus
//!                                                                    │
//!  BlockStore ◄── commit_block(seal) ◄───────────────────────────────┘
//! ```
//!
//! - [`TxValidator`] admits transactions by an ordered, pluggable rule set.
//! - [`LedgerChain::candidate`] turns the pending buffer into the block a
//!   leader proposes; replicas adopt it with [`LedgerChain::stage_proposal`].
//! - [`LedgerChain::commit_block`] seals the certified batch once a quorum
//!   of validators signed it, persists it through a [`BlockStore`] and only
//!   then removes those transactions from the pending buffer.
//! - [`LedgerChain::recover_from_snapshot`] rebuilds the chain after a crash
//!   from a checkpoint and the block log.

pub mod balances;
pub mod block;
pub mod chain;
pub mod error;
pub mod store;
pub mod transaction;
pub mod validator;

pub use {
    balances::BalanceSheet,
    block::{Block, BlockCandidate, BlockHeader, ConsensusSignature},
    chain::{BlockSeal, BlockSummary, LedgerChain},
    error::{LedgerError, RecoveryError, StorageError, ValidationError},
    store::{BlockStore, FileBlockStore, MemoryBlockStore},
    transaction::{Transaction, TxKind, TxSignature},
    validator::{FnRule, TxRule, TxValidator},
};
