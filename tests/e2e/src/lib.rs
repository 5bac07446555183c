//! OGP End-to-End Test Suite
//!
//! Runs several PBFT validator nodes inside one tokio runtime, connected
//! over the loopback bus or real TCP sockets, and drives them through their
//! public [`NodeHandle`](ogp_consensus_pbft::NodeHandle) API.
//!
//! Each test file can be run independently:
//!
//! ```bash
//! cargo test -p ogp-e2e-tests --test ledger_lifecycle -- --nocapture
//! cargo test -p ogp-e2e-tests --test byzantine_leader -- --nocapture
//! cargo test -p ogp-e2e-tests --test circuit_breaker -- --nocapture
//! cargo test -p ogp-e2e-tests --test crash_recovery -- --nocapture
//! cargo test -p ogp-e2e-tests --test tcp_network -- --nocapture
//! ```

pub mod helpers;
