//! OGP consensus networking layer
//!
//! Consensus messages travel over a topic-based fabric. The consensus node
//! only sees the [`ConsensusTransport`] trait; this crate ships two
//! implementations of it:
//!
//! ```text
//!  ┌─────────────────────────────────────────────┐
//!  │  PBFT node                                  │
//!  │  publish(topic, bytes) / subscribe(topic)   │
//!  └───────────────┬─────────────────────────────┘
//!                  │  ConsensusTransport
//!       ┌──────────┴───────────┐
//!  ┌────▼─────────┐     ┌──────▼───────────────────┐
//!  │ LoopbackBus  │     │ TcpTransport             │
//!  │ (in-process) │     │ length-prefixed frames   │
//!  └──────────────┘     └──────────────────────────┘
//! ```
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`]    | `TransportConfig` defaults and dev overrides |
//! | [`message`]   | Topics, wire envelope, framing helpers |
//! | [`transport`] | The `ConsensusTransport` trait |
//! | [`loopback`]  | In-process fabric with fault injection |
//! | [`tcp`]       | TCP listener and broadcast |
//! | [`error`]     | Crate-wide error enum |

pub mod config;
pub mod error;
pub mod loopback;
pub mod message;
pub mod tcp;
pub mod transport;

pub use {
    config::TransportConfig,
    error::{Result, TransportError},
    loopback::{LoopbackBus, LoopbackTransport},
    message::{Envelope, InboundMessage, Topic},
    tcp::TcpTransport,
    transport::ConsensusTransport,
};
