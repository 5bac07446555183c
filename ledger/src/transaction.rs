//! Ledger transactions.

use {
    ogp_crypto::{sign, verify, CryptoError, Keypair, PublicKey, Signature},
    serde::{Deserialize, Serialize},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    /// Issue new units to `to`.
    Mint,
    /// Move units from `from` to `to`.
    Transfer,
}

/// Signature authorizing a transaction, with the key that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSignature {
    pub public_key: PublicKey,
    pub signature: Signature,
}

/// A client transaction awaiting inclusion in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub kind: TxKind,
    pub from: String,
    pub to: String,
    /// Signed so that negative amounts can be represented and rejected.
    pub amount: i64,
    /// Client-chosen uniquifier; identical transfers need distinct nonces.
    pub nonce: u64,
    pub signature: Option<TxSignature>,
}

/// The part of a transaction covered by its signature.
#[derive(Serialize)]
struct SigningPayload<'a> {
    kind: TxKind,
    from: &'a str,
    to: &'a str,
    amount: i64,
    nonce: u64,
}

impl Transaction {
    /// Unsigned mint of `amount` from `issuer` to `to`.
    pub fn mint(issuer: &str, to: &str, amount: i64, nonce: u64) -> Self {
        Self {
            kind: TxKind::Mint,
            from: issuer.to_string(),
            to: to.to_string(),
            amount,
            nonce,
            signature: None,
        }
    }

    /// Unsigned transfer of `amount` from `from` to `to`.
    pub fn transfer(from: &str, to: &str, amount: i64, nonce: u64) -> Self {
        Self {
            kind: TxKind::Transfer,
            from: from.to_string(),
            to: to.to_string(),
            amount,
            nonce,
            signature: None,
        }
    }

    fn payload(&self) -> SigningPayload<'_> {
        SigningPayload {
            kind: self.kind,
            from: &self.from,
            to: &self.to,
            amount: self.amount,
            nonce: self.nonce,
        }
    }

    /// Attach a signature by `keypair`, replacing any existing one.
    pub fn signed(mut self, keypair: &Keypair) -> Result<Self, CryptoError> {
        let signature = sign(&self.payload(), Some(keypair))?;
        self.signature = Some(TxSignature {
            public_key: keypair.public_key(),
            signature,
        });
        Ok(self)
    }

    /// Full Ed25519 check of the attached signature. Unsigned is invalid.
    pub fn verify_signature(&self) -> bool {
        let Some(sig) = &self.signature else {
            return false;
        };
        verify(&self.payload(), &sig.signature, &sig.public_key)
    }
}
