//! Checkpoint persistence for crash recovery.
//!
//! A checkpoint is the `(height, last_hash)` pair of a committed chain head.
//! It is the only recovery state persisted besides the block log: on boot
//! the ledger loads the checkpoint, fetches the referenced block from the
//! block store and replays the blocks committed after it.
//!
//! Two stores are provided:
//!
//! | Store | Backing |
//! |-------|---------|
//! | [`FileCheckpointStore`]   | one JSON file per node identity, replaced atomically |
//! | [`MemoryCheckpointStore`] | in-process, with failure injection for tests |

pub mod error;
pub mod file;
pub mod memory;

pub use {
    error::SnapshotError,
    file::FileCheckpointStore,
    memory::MemoryCheckpointStore,
};

use {
    async_trait::async_trait,
    ogp_crypto::Hash,
    serde::{Deserialize, Serialize},
};

/// The persisted recovery point of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Index of the chain head when the checkpoint was taken.
    pub height: u64,
    /// Hash of that head block.
    pub last_hash: Hash,
}

/// Durable storage for a node's single current checkpoint.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Durably replace the stored checkpoint.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), SnapshotError>;

    /// Load the stored checkpoint.
    ///
    /// Returns `None` when nothing was saved or the record is unreadable;
    /// a corrupt record is treated exactly like a missing one.
    async fn load(&self) -> Option<Checkpoint>;
}
