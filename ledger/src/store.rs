//! Durable block storage.
//!
//! The chain writes every committed block through a [`BlockStore`] and
//! reads them back only during recovery.

use {
    crate::{block::Block, error::StorageError},
    async_trait::async_trait,
    log::*,
    ogp_crypto::Hash,
    parking_lot::Mutex,
    std::{
        path::{Path, PathBuf},
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    tokio::{fs, io::AsyncWriteExt},
};

#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Durably persist a committed block.
    async fn write_block(&self, block: &Block) -> Result<(), StorageError>;

    /// Look up a block by hash.
    async fn fetch_block(&self, hash: &Hash) -> Result<Option<Block>, StorageError>;

    /// All persisted blocks with `index >= from_height`, in index order.
    async fn list_blocks(&self, from_height: u64) -> Result<Vec<Block>, StorageError>;
}

// -- In-memory store --

/// Block store kept in memory, with failure injection for tests.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: Mutex<Vec<Block>>,
    unavailable: AtomicBool,
    failing_writes: AtomicUsize,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every operation fails with [`StorageError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Fail the next `count` writes.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.lock().is_empty()
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StorageError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn write_block(&self, block: &Block) -> Result<(), StorageError> {
        self.check_available()?;
        let injected = self
            .failing_writes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::Unavailable("injected write failure".into()));
        }
        self.blocks.lock().push(block.clone());
        Ok(())
    }

    async fn fetch_block(&self, hash: &Hash) -> Result<Option<Block>, StorageError> {
        self.check_available()?;
        Ok(self
            .blocks
            .lock()
            .iter()
            .find(|block| block.hash() == hash)
            .cloned())
    }

    async fn list_blocks(&self, from_height: u64) -> Result<Vec<Block>, StorageError> {
        self.check_available()?;
        let mut blocks: Vec<Block> = self
            .blocks
            .lock()
            .iter()
            .filter(|block| block.index() >= from_height)
            .cloned()
            .collect();
        blocks.sort_by_key(Block::index);
        Ok(blocks)
    }
}

// -- Append-only file store --

/// Block log with one JSON-encoded block per line.
///
/// A torn trailing line left by a crash mid-append is skipped on read.
#[derive(Debug, Clone)]
pub struct FileBlockStore {
    path: PathBuf,
}

impl FileBlockStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<Block>, StorageError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut blocks = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Block>(line) {
                Ok(block) => blocks.push(block),
                Err(e) => warn!(
                    "skipping unreadable block at {}:{}: {e}",
                    self.path.display(),
                    lineno.saturating_add(1)
                ),
            }
        }
        Ok(blocks)
    }
}

#[async_trait]
impl BlockStore for FileBlockStore {
    async fn write_block(&self, block: &Block) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(block)?;
        line.push(b'\n');
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn fetch_block(&self, hash: &Hash) -> Result<Option<Block>, StorageError> {
        Ok(self
            .read_all()
            .await?
            .into_iter()
            .find(|block| block.hash() == hash))
    }

    async fn list_blocks(&self, from_height: u64) -> Result<Vec<Block>, StorageError> {
        let mut blocks: Vec<Block> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|block| block.index() >= from_height)
            .collect();
        blocks.sort_by_key(Block::index);
        Ok(blocks)
    }
}
