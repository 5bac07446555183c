//! Merkle roots over ordered transaction lists.
//!
//! Leaves are SHA3-512 hashes of each item's canonical bytes; each parent is
//! `hash(left || right)`. When a level has an odd number of nodes the last
//! node is paired with itself. An empty list has the fixed root
//! `hash(b"EMPTY")`.
//!
//! Every node hashes the root into its blocks, so these rules are part of
//! the consensus protocol: two nodes disagreeing on the odd-node rule would
//! never agree on a block.

use {
    ogp_crypto::{canonical_bytes, hash, hashv, CryptoError, Hash},
    serde::Serialize,
};

/// Reserved input hashed to produce the root of an empty list.
pub const EMPTY_SENTINEL: &[u8] = b"EMPTY";

/// Root of an empty leaf list.
pub fn empty_root() -> Hash {
    hash(EMPTY_SENTINEL)
}

/// Merkle root over already-serialized leaves.
pub fn compute_root<T: AsRef<[u8]>>(leaves: &[T]) -> Hash {
    MerkleTree::new(leaves).root()
}

/// Merkle root over the canonical serialization of each item.
pub fn compute_root_of<T: Serialize>(items: &[T]) -> Result<Hash, CryptoError> {
    Ok(MerkleTree::from_items(items)?.root())
}

/// Which side of its parent a proof sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// One step of an inclusion proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofNode {
    pub sibling: Hash,
    pub side: Side,
}

/// A fully materialized Merkle tree.
///
/// `levels[0]` holds the leaf hashes; the last level holds the root.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    /// Build a tree from serialized leaves.
    pub fn new<T: AsRef<[u8]>>(leaves: &[T]) -> Self {
        Self::from_leaf_hashes(leaves.iter().map(|leaf| hash(leaf.as_ref())).collect())
    }

    /// Build a tree from the canonical serialization of each item.
    pub fn from_items<T: Serialize>(items: &[T]) -> Result<Self, CryptoError> {
        let leaves = items
            .iter()
            .map(|item| canonical_bytes(item).map(|bytes| hash(&bytes)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_leaf_hashes(leaves))
    }

    fn from_leaf_hashes(leaves: Vec<Hash>) -> Self {
        let mut levels = vec![leaves];
        while let Some(level) = levels.last().filter(|level| level.len() > 1) {
            let next = level
                .chunks(2)
                .map(|pair| {
                    let left = &pair[0];
                    let right = pair.get(1).unwrap_or(left);
                    hashv(&[left.as_ref(), right.as_ref()])
                })
                .collect();
            levels.push(next);
        }
        Self { levels }
    }

    pub fn root(&self) -> Hash {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_else(empty_root)
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Inclusion proof for the leaf at `index`, bottom-up.
    pub fn proof(&self, index: usize) -> Option<Vec<ProofNode>> {
        if index >= self.leaf_count() {
            return None;
        }
        let mut path = Vec::with_capacity(self.levels.len());
        let mut idx = index;
        for level in &self.levels[..self.levels.len().saturating_sub(1)] {
            let node = if idx % 2 == 0 {
                // Odd tail pairs with itself.
                let sibling = level.get(idx.saturating_add(1)).unwrap_or(&level[idx]);
                ProofNode {
                    sibling: *sibling,
                    side: Side::Right,
                }
            } else {
                ProofNode {
                    sibling: level[idx.saturating_sub(1)],
                    side: Side::Left,
                }
            };
            path.push(node);
            idx /= 2;
        }
        Some(path)
    }
}

/// Check that `leaf` is included under `root` via `proof`.
pub fn verify_proof(leaf: &Hash, proof: &[ProofNode], root: &Hash) -> bool {
    let computed = proof.iter().fold(*leaf, |acc, node| match node.side {
        Side::Right => hashv(&[acc.as_ref(), node.sibling.as_ref()]),
        Side::Left => hashv(&[node.sibling.as_ref(), acc.as_ref()]),
    });
    computed == *root
}
