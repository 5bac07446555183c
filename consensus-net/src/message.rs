//! Topics and the wire envelope for consensus traffic.
//!
//! Every frame on the consensus channel carries exactly one [`Envelope`]:
//! the topic it was published on, the publishing node and an opaque
//! payload that the consensus layer encodes itself.

use {
    crate::error::{Result, TransportError},
    serde::{Deserialize, Serialize},
    std::fmt,
};

// ── Topics ──────────────────────────────────────────────────────────────────

/// Publish/subscribe channels used by PBFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Topic {
    PrePrepare,
    Prepare,
    Commit,
    ViewChange,
    Checkpoint,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::PrePrepare,
        Topic::Prepare,
        Topic::Commit,
        Topic::ViewChange,
        Topic::Checkpoint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::PrePrepare => "pbft.pre-prepare",
            Topic::Prepare => "pbft.prepare",
            Topic::Commit => "pbft.commit",
            Topic::ViewChange => "pbft.viewchange",
            Topic::Checkpoint => "pbft.checkpoint",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Wire envelope ───────────────────────────────────────────────────────────

/// One published message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: Topic,
    /// Node id of the publisher, as claimed by the publisher.
    pub sender: String,
    pub payload: Vec<u8>,
}

/// What subscribers receive.
pub type InboundMessage = Envelope;

impl Envelope {
    pub fn new(topic: Topic, sender: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic,
            sender: sender.into(),
            payload,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(TransportError::Serialization)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(TransportError::Serialization)
    }

    /// Serialize with a 4-byte little-endian length prefix.
    ///
    /// Wire format: `[len: u32-le][payload: len bytes]`
    pub fn serialize_framed(&self, max_size: usize) -> Result<Vec<u8>> {
        let payload = self.serialize()?;
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|_| payload.len() <= max_size)
            .ok_or(TransportError::MessageTooLarge {
                size: payload.len(),
                max: max_size,
            })?;
        let mut buf = Vec::with_capacity(4usize.saturating_add(payload.len()));
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Read the length prefix from a 4-byte buffer.
    pub fn read_frame_len(header: &[u8; 4]) -> usize {
        u32::from_le_bytes(*header) as usize
    }
}
