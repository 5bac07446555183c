//! File-backed checkpoint store.
//!
//! The checkpoint lives at `<dir>/<node_id>.checkpoint.json`. Saves write a
//! sibling `.tmp` file, fsync it and rename it over the record, so a crash
//! mid-save leaves either the old or the new checkpoint on disk.

use {
    crate::{Checkpoint, CheckpointStore, SnapshotError},
    async_trait::async_trait,
    log::*,
    std::path::{Path, PathBuf},
    tokio::{fs, io::AsyncWriteExt},
};

#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    /// Store for `node_id` under `dir`. The directory is created on first save.
    pub fn new<P: AsRef<Path>>(dir: P, node_id: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{node_id}.checkpoint.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), SnapshotError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let data = serde_json::to_vec(checkpoint)?;
        let tmp_path = self.tmp_path();
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, &self.path).await?;
        debug!(
            "saved checkpoint height={} hash={} to {}",
            checkpoint.height,
            checkpoint.last_hash.short(),
            self.path.display()
        );
        Ok(())
    }

    async fn load(&self) -> Option<Checkpoint> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("checkpoint {} unreadable: {e}", self.path.display());
                return None;
            }
        };
        match serde_json::from_slice(&data) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                warn!("checkpoint {} corrupt, ignoring: {e}", self.path.display());
                None
            }
        }
    }
}
