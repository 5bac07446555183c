//! The publish/subscribe seam between the consensus engine and the network.

use {
    crate::{
        error::Result,
        message::{InboundMessage, Topic},
    },
    async_trait::async_trait,
    tokio::sync::mpsc,
};

/// Topic-based message fabric connecting the validators.
///
/// A publish reaches every other node subscribed to the topic; the
/// publisher never receives its own message.
#[async_trait]
pub trait ConsensusTransport: Send + Sync {
    /// Identity this transport stamps on outbound envelopes.
    fn node_id(&self) -> &str;

    async fn publish(&self, topic: Topic, payload: Vec<u8>) -> Result<()>;

    /// Deliver every message published on `topic` by other nodes to `handler`.
    async fn subscribe(&self, topic: Topic, handler: mpsc::Sender<InboundMessage>) -> Result<()>;
}
