//! Sealed blocks.
//!
//! A block's hash covers its header only: index, timestamp, view, sequence,
//! previous hash and Merkle root. Transactions are committed to through the
//! Merkle root; validator signatures are over the hash itself, so they are
//! excluded from it.

use {
    crate::transaction::Transaction,
    ogp_crypto::{hashv, verify_bytes, CryptoError, Hash, PublicKey, Signature},
    ogp_merkle_tree::compute_root_of,
    serde::{Deserialize, Serialize},
    std::collections::HashSet,
};

/// The hashed portion of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub index: u64,
    /// Unix milliseconds, chosen by the proposing leader.
    pub timestamp: u64,
    pub view: u64,
    pub seq: u64,
    pub previous_hash: Hash,
    pub merkle_root: Hash,
}

impl BlockHeader {
    /// Deterministic block hash over the fixed-width header layout.
    pub fn hash(&self) -> Hash {
        hashv(&[
            &self.index.to_le_bytes(),
            &self.timestamp.to_le_bytes(),
            &self.view.to_le_bytes(),
            &self.seq.to_le_bytes(),
            self.previous_hash.as_ref(),
            self.merkle_root.as_ref(),
        ])
    }
}

/// A validator's signature over a block hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusSignature {
    pub validator_id: String,
    pub signature: Signature,
    pub public_key: PublicKey,
}

/// What a leader proposes: a header plus the batch it commits to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCandidate {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl BlockCandidate {
    /// The value validators agree on: the hash the sealed block will carry.
    pub fn digest(&self) -> Hash {
        self.header.hash()
    }

    /// Root recomputed from the carried transactions.
    pub fn computed_merkle_root(&self) -> Result<Hash, CryptoError> {
        compute_root_of(&self.transactions)
    }
}

/// An immutable, sealed block.
///
/// Fields are only reachable through accessors; nothing can change a block
/// after [`Block::new`] computes its Merkle root and hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    header: BlockHeader,
    transactions: Vec<Transaction>,
    consensus_signatures: Vec<ConsensusSignature>,
    hash: Hash,
}

impl Block {
    pub fn new(
        index: u64,
        transactions: &[Transaction],
        previous_hash: Hash,
        consensus_signatures: Vec<ConsensusSignature>,
        view: u64,
        seq: u64,
        timestamp: u64,
    ) -> Result<Self, CryptoError> {
        let transactions = transactions.to_vec();
        let header = BlockHeader {
            index,
            timestamp,
            view,
            seq,
            previous_hash,
            merkle_root: compute_root_of(&transactions)?,
        };
        Ok(Self {
            hash: header.hash(),
            header,
            transactions,
            consensus_signatures,
        })
    }

    /// The genesis block; identical on every node.
    pub fn genesis() -> Self {
        let header = BlockHeader {
            index: 0,
            timestamp: 0,
            view: 0,
            seq: 0,
            previous_hash: Hash::default(),
            merkle_root: ogp_merkle_tree::empty_root(),
        };
        Self {
            hash: header.hash(),
            header,
            transactions: Vec::new(),
            consensus_signatures: Vec::new(),
        }
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn index(&self) -> u64 {
        self.header.index
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    pub fn view(&self) -> u64 {
        self.header.view
    }

    pub fn seq(&self) -> u64 {
        self.header.seq
    }

    pub fn previous_hash(&self) -> &Hash {
        &self.header.previous_hash
    }

    pub fn merkle_root(&self) -> &Hash {
        &self.header.merkle_root
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn consensus_signatures(&self) -> &[ConsensusSignature] {
        &self.consensus_signatures
    }

    /// Whether the stored hash matches the header.
    pub fn verify_hash(&self) -> bool {
        self.header.hash() == self.hash
    }

    /// Whether both the Merkle root and the hash match their inputs.
    pub fn verify_integrity(&self) -> bool {
        let merkle_ok = compute_root_of(&self.transactions)
            .map(|root| root == self.header.merkle_root)
            .unwrap_or(false);
        merkle_ok && self.verify_hash()
    }

    /// True iff this block points at `prev` and its own hash is intact.
    pub fn validate_link(&self, prev: &Block) -> bool {
        self.header.previous_hash == prev.hash && self.verify_hash()
    }

    /// Number of distinct validators whose signature over the block hash verifies.
    pub fn valid_signature_count(&self) -> usize {
        let mut counted = HashSet::new();
        self.consensus_signatures
            .iter()
            .filter(|sig| verify_bytes(self.hash.as_ref(), &sig.signature, &sig.public_key))
            .filter(|sig| counted.insert(sig.validator_id.as_str()))
            .count()
    }

    /// True iff at least `quorum` distinct validators signed this block.
    pub fn verify_signatures(&self, quorum: usize) -> bool {
        self.valid_signature_count() >= quorum
    }

    /// Full Ed25519 check of every transaction; `Err` carries the first bad index.
    pub fn verify_transaction_signatures(&self) -> Result<(), usize> {
        match self.transactions.iter().position(|tx| !tx.verify_signature()) {
            Some(index) => Err(index),
            None => Ok(()),
        }
    }

    /// Copy of this block with a different previous hash but the old stored hash.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn with_tampered_previous_hash(&self, previous_hash: Hash) -> Self {
        let mut tampered = self.clone();
        tampered.header.previous_hash = previous_hash;
        tampered
    }

    /// Copy of this block with one transaction's amount rewritten in place.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn with_tampered_amount(&self, tx_index: usize, amount: i64) -> Self {
        let mut tampered = self.clone();
        if let Some(tx) = tampered.transactions.get_mut(tx_index) {
            tx.amount = amount;
        }
        tampered
    }
}
