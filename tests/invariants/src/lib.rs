//! OGP Property-Based Invariant Tests
//!
//! Uses proptest to verify critical system invariants across:
//! - PBFT quorum arithmetic, message dedup, leader rotation and agreement
//! - Block hashing, Merkle roots and chain integrity

pub mod ledger_invariants;
