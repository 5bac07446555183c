//! Ed25519 keys and signatures.

use {
    crate::{bytes::impl_hex_bytes, canonical_bytes, CryptoError, KeyError},
    ed25519_dalek::{Signer, Verifier},
    rand0_7::rngs::OsRng,
    serde::Serialize,
};

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_BYTES: usize = 64;
/// Size of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_BYTES: usize = 32;

/// A detached Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature([u8; SIGNATURE_BYTES]);

impl_hex_bytes!(Signature, SIGNATURE_BYTES);

/// An Ed25519 verifying key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; PUBLIC_KEY_BYTES]);

impl_hex_bytes!(PublicKey, PUBLIC_KEY_BYTES);

/// An Ed25519 signing keypair.
pub struct Keypair(ed25519_dalek::Keypair);

impl Keypair {
    /// Generate a fresh keypair from the OS entropy source.
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        Self(ed25519_dalek::Keypair::generate(&mut csprng))
    }

    /// Derive a keypair deterministically from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, KeyError> {
        let secret =
            ed25519_dalek::SecretKey::from_bytes(seed).map_err(|_| KeyError::InvalidSeed)?;
        let public = ed25519_dalek::PublicKey::from(&secret);
        Ok(Self(ed25519_dalek::Keypair { secret, public }))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.public.to_bytes())
    }

    /// Sign raw bytes. Ed25519 signing is deterministic.
    pub fn sign_bytes(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keypair({})", self.public_key().short())
    }
}

/// Sign the canonical serialization of `message`.
///
/// Fails with [`KeyError::MissingPrivateKey`] when no keypair is supplied.
pub fn sign<T: Serialize + ?Sized>(
    message: &T,
    keypair: Option<&Keypair>,
) -> Result<Signature, CryptoError> {
    let keypair = keypair.ok_or(KeyError::MissingPrivateKey)?;
    let bytes = canonical_bytes(message)?;
    Ok(keypair.sign_bytes(&bytes))
}

/// Check a signature over the canonical serialization of `message`.
///
/// Never fails loudly: malformed keys, malformed signatures and values that
/// cannot be serialized all verify as `false`.
pub fn verify<T: Serialize + ?Sized>(
    message: &T,
    signature: &Signature,
    public_key: &PublicKey,
) -> bool {
    let Ok(bytes) = canonical_bytes(message) else {
        return false;
    };
    verify_bytes(&bytes, signature, public_key)
}

/// Check a signature over raw bytes.
pub fn verify_bytes(message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
    let Ok(public_key) = ed25519_dalek::PublicKey::from_bytes(&public_key.0) else {
        return false;
    };
    let Ok(signature) = ed25519_dalek::Signature::try_from(&signature.0[..]) else {
        return false;
    };
    public_key.verify(message, &signature).is_ok()
}
