//! The permissioned validator set.
//!
//! Order is significant: it is the order given at construction and every
//! node must be configured with the same order, since leader selection
//! indexes into it.

use {
    ogp_crypto::PublicKey,
    std::collections::HashMap,
};

/// A single validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorInfo {
    pub id: String,
    pub public_key: PublicKey,
}

/// An ordered set of validators.
#[derive(Debug, Clone, Default)]
pub struct ValidatorSet {
    validators: Vec<ValidatorInfo>,
    /// Fast lookup from id to index in `validators`.
    index: HashMap<String, usize>,
}

impl ValidatorSet {
    /// Build a set from `(id, public_key)` pairs. A repeated id keeps its
    /// first position.
    pub fn new(validators: Vec<(String, PublicKey)>) -> Self {
        let mut infos = Vec::with_capacity(validators.len());
        let mut index = HashMap::with_capacity(validators.len());
        for (id, public_key) in validators {
            if index.contains_key(&id) {
                continue;
            }
            index.insert(id.clone(), infos.len());
            infos.push(ValidatorInfo { id, public_key });
        }
        Self {
            validators: infos,
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ValidatorInfo> {
        self.validators.get(index)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&ValidatorInfo> {
        self.index.get(id).and_then(|&i| self.validators.get(i))
    }

    pub fn public_key_of(&self, id: &str) -> Option<&PublicKey> {
        self.get_by_id(id).map(|v| &v.public_key)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Matching messages needed to advance a phase with the current set size.
    pub fn quorum(&self) -> usize {
        crate::types::quorum(self.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidatorInfo> {
        self.validators.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.validators.iter().map(|v| v.id.clone()).collect()
    }
}
