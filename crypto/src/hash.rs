//! SHA3-512 content hashing.

use {
    crate::{bytes::impl_hex_bytes, canonical_bytes, CryptoError},
    serde::Serialize,
    sha3::{Digest, Sha3_512},
};

/// Size of a SHA3-512 digest in bytes.
pub const HASH_BYTES: usize = 64;

/// A SHA3-512 digest.
///
/// `Hash::default()` is the all-zero hash, used as the genesis block's
/// previous hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_BYTES]);

impl_hex_bytes!(Hash, HASH_BYTES);

/// Hash a single byte slice.
pub fn hash(data: &[u8]) -> Hash {
    hashv(&[data])
}

/// Hash the concatenation of several byte slices without allocating.
pub fn hashv(vals: &[&[u8]]) -> Hash {
    let mut hasher = Sha3_512::new();
    for val in vals {
        hasher.update(val);
    }
    let mut out = [0u8; HASH_BYTES];
    out.copy_from_slice(&hasher.finalize());
    Hash(out)
}

/// Hash the canonical serialization of `value`.
pub fn hash_canonical<T: Serialize + ?Sized>(value: &T) -> Result<Hash, CryptoError> {
    Ok(hash(&canonical_bytes(value)?))
}
