//! Configuration for the consensus transport.

use {crate::error::TransportError, std::net::SocketAddr};

/// Configuration for the TCP consensus transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Identity stamped on every outbound envelope.
    pub node_id: String,

    /// Local address to bind the consensus listener on.
    /// Default: `0.0.0.0:8900`
    pub bind_addr: SocketAddr,

    /// Static set of peer listeners that every publish is sent to.
    pub peers: Vec<SocketAddr>,

    /// Maximum size of a single serialized envelope in bytes.
    /// Votes are a few hundred bytes; pre-prepares carry the whole batch.
    pub max_message_size: usize,

    /// How long to wait for a peer connection before counting it as failed (ms).
    pub connect_timeout_ms: u64,

    /// Capacity of the queue between connection readers and subscribers.
    /// Readers stop pulling from their sockets while it is full.
    pub channel_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8900)),
            peers: Vec::new(),
            max_message_size: 4 * 1_048_576, // 4 MB
            connect_timeout_ms: 2_000,
            channel_buffer_size: 10_000,
        }
    }
}

impl TransportConfig {
    /// Create a config suitable for local testing: loopback, ephemeral port.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            peers: Vec::new(),
            max_message_size: 1_048_576,
            connect_timeout_ms: 500,
            channel_buffer_size: 1_000,
        }
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        if self.node_id.is_empty() {
            return Err(TransportError::InvalidConfig("node_id must be set"));
        }
        if self.max_message_size == 0 {
            return Err(TransportError::InvalidConfig("max_message_size must be > 0"));
        }
        if self.channel_buffer_size == 0 {
            return Err(TransportError::InvalidConfig(
                "channel_buffer_size must be > 0",
            ));
        }
        Ok(())
    }
}
