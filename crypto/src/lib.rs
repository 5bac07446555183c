//! OGP Ledger cryptographic primitives
//!
//! Every consensus artifact in the ledger is authenticated with the two
//! primitives defined here:
//!
//! - **SHA3-512** content hashing ([`hash`], [`hashv`], [`hash_canonical`]),
//!   used for block hashes, Merkle nodes and consensus message digests.
//! - **Ed25519** signatures ([`sign`], [`verify`]), used for transaction
//!   authorization and validator votes.
//!
//! Structured values are signed and hashed over their *canonical*
//! serialization ([`canonical_bytes`]): compact JSON with struct fields in
//! declaration order. Types that are signed must not contain `HashMap`s;
//! use `BTreeMap` so that key order is stable across nodes.

mod bytes;
pub mod error;
pub mod hash;
pub mod signature;

pub use {
    error::{CryptoError, KeyError},
    hash::{hash, hash_canonical, hashv, Hash, HASH_BYTES},
    signature::{
        sign, verify, verify_bytes, Keypair, PublicKey, Signature, PUBLIC_KEY_BYTES,
        SIGNATURE_BYTES,
    },
};

use serde::Serialize;

/// Canonical byte encoding of `value` for hashing and signing.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CryptoError> {
    serde_json::to_vec(value).map_err(CryptoError::Serialization)
}
