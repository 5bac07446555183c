use thiserror::Error;

/// Errors from saving a checkpoint.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}
