//! In-memory checkpoint store.

use {
    crate::{Checkpoint, CheckpointStore, SnapshotError},
    async_trait::async_trait,
    parking_lot::Mutex,
    std::sync::atomic::{AtomicBool, Ordering},
};

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    current: Mutex<Option<Checkpoint>>,
    fail_saves: AtomicBool,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            current: Mutex::new(Some(checkpoint)),
            fail_saves: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `save` fail with an I/O error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), SnapshotError> {
        if self.fail_saves.load(Ordering::Relaxed) {
            return Err(SnapshotError::Io(std::io::Error::other(
                "checkpoint store unavailable",
            )));
        }
        *self.current.lock() = Some(*checkpoint);
        Ok(())
    }

    async fn load(&self) -> Option<Checkpoint> {
        *self.current.lock()
    }
}
