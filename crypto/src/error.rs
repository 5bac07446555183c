//! Error types for signing and canonical serialization.

use thiserror::Error;

/// Problems with signing key material.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// `sign` was called without a private key.
    #[error("no private key supplied")]
    MissingPrivateKey,

    /// The seed could not be turned into an Ed25519 secret key.
    #[error("invalid Ed25519 seed")]
    InvalidSeed,
}

/// Errors from the crypto layer.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The value could not be canonically serialized.
    #[error("canonical serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
