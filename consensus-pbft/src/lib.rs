//! OGP PBFT Consensus
//!
//! This crate implements Practical Byzantine Fault Tolerant consensus for a
//! permissioned validator set. There is no mining: a block is final once a
//! quorum of `floor(2n/3) + 1` validators signed it, through three phases:
//!
//! 1. **Pre-prepare**: the round-robin leader of the current view proposes
//!    the pending buffer as a block candidate under a fresh sequence number.
//! 2. **Prepare**: validators accept the candidate and broadcast prepares.
//! 3. **Commit**: on a prepare quorum, validators broadcast commit
//!    signatures; a commit quorum seals the block into the ledger.
//!
//! # Key Properties
//!
//! - **Safety**: sequence numbers are never reused, and only authenticated
//!   messages from validators in the set are counted.
//! - **Liveness**: a round that stalls past the phase timeout rotates the
//!   leader through a view change.
//! - **Bounded memory**: watermarks advance on stable checkpoints, early
//!   votes are held in a bounded buffer, seen message ids roll over in two
//!   generations and view-change votes are kept only for a few views ahead.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │                    PbftNode                       │
//! │  ┌──────────────────────────────────────────┐     │
//! │  │ PbftEngine                               │     │
//! │  │  ConsensusState: view, seq, phase,       │     │
//! │  │  watermarks, seen message ids            │     │
//! │  │  ValidatorSet ── leader_for_view         │     │
//! │  └──────────────────────────────────────────┘     │
//! │  ┌────────────┐ ┌───────────┐ ┌──────────────┐    │
//! │  │ LedgerChain│ │ PhaseTimer│ │CircuitBreaker│    │
//! │  └────────────┘ └───────────┘ └──────────────┘    │
//! │  ┌─────────────────────┐ ┌───────────────────┐    │
//! │  │ ConsensusTransport  │ │ CheckpointStore   │    │
//! │  └─────────────────────┘ └───────────────────┘    │
//! └───────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod leader;
pub mod node;
pub mod timeout;
pub mod types;
pub mod validator_set;

// Re-exports for convenience
pub use config::{ConfigError, PbftConfig};
pub use engine::{CommitCertificate, EngineOutput, PbftEngine, StableCheckpoint, TimerCommand};
pub use error::{ConsensusError, NodeError};
pub use leader::{is_leader, leader_for_view};
pub use node::{NodeHandle, NodeSetup, PbftNode};
pub use timeout::PhaseTimer;
pub use types::{
    quorum, CheckpointVote, ConsensusHealth, ConsensusMessage, ConsensusState, Phase, PrePrepare,
    ViewChange, Vote,
};
pub use validator_set::{ValidatorInfo, ValidatorSet};
