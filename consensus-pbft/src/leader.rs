//! Leader selection.
//!
//! Round-robin over the validator set in construction order:
//! `leader(view) = validators[view mod n]`. No randomness and no stake
//! weighting, so every correct node agrees on the leader of any view.

use crate::validator_set::{ValidatorInfo, ValidatorSet};

/// The leader of `view`, or `None` for an empty set.
pub fn leader_for_view(validator_set: &ValidatorSet, view: u64) -> Option<&ValidatorInfo> {
    let n = u64::try_from(validator_set.len()).ok()?;
    let position = view.checked_rem(n)?;
    validator_set.get(usize::try_from(position).ok()?)
}

/// Check if `id` leads `view`.
pub fn is_leader(validator_set: &ValidatorSet, id: &str, view: u64) -> bool {
    leader_for_view(validator_set, view).is_some_and(|leader| leader.id == id)
}
