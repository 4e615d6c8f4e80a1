/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The set of consensus nodes and their voting weights.

use std::{collections::HashMap, slice};

use super::data_types::{ReplicaIndex, TotalWeight, Weight};
use super::crypto_primitives::VerifyingKey;

/// Stores the identities of the consensus nodes and their voting weights.
///
/// ## Ordering of consensus nodes
///
/// `ValidatorSet` internally maintains the list of consensus nodes in ascending order of their
/// `VerifyingKey`s. The [`ReplicaIndex`] of a node is its position in this order, so indices are
/// stable across replicas that agree on the set.
///
/// ## Limits to total weight
///
/// Users must make sure that the total weight of the validator set does not exceed `u128::MAX/2`.
#[derive(Clone, PartialEq)]
pub struct ValidatorSet {
    // The verifying keys of consensus nodes are included here in ascending order.
    validators: Vec<VerifyingKey>,
    weights: HashMap<VerifyingKey, Weight>,
}

impl Default for ValidatorSet {
    // Create an empty validator set.
    fn default() -> Self {
        ValidatorSet::new()
    }
}

impl ValidatorSet {
    /// Create an empty validator set.
    pub fn new() -> ValidatorSet {
        Self {
            validators: Vec::new(),
            weights: HashMap::new(),
        }
    }

    /// Put a `validator` with the specified `weight` into the validator set, placing it in a
    /// position that preserves the [ordering of consensus nodes](Self#ordering-of-consensus-nodes).
    ///
    /// If `validator` already exists in the validator set, this function updates its weight instead.
    pub fn put(&mut self, validator: &VerifyingKey, weight: Weight) {
        if !self.contains(validator) {
            let validator_bytes = validator.to_bytes();
            let insert_pos = self
                .validators
                .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
                .unwrap_err();
            self.validators.insert(insert_pos, *validator);
        }

        self.weights.insert(*validator, weight);
    }

    /// Remove `validator` from the validator set, if it actually is in the validator set.
    ///
    /// If a validator is removed, its `VerifyingKey` is returned together with its weight in the
    /// validator set before the removal.
    pub fn remove(&mut self, validator: &VerifyingKey) -> Option<(VerifyingKey, Weight)> {
        let validator_bytes = validator.to_bytes();
        if let Ok(pos) = self
            .validators
            .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
        {
            self.validators.remove(pos);
            self.weights.remove_entry(validator)
        } else {
            None
        }
    }

    /// Get the weight of the specified `validator` inside the validator set.
    pub fn weight(&self, validator: &VerifyingKey) -> Option<&Weight> {
        self.weights.get(validator)
    }

    /// Get the weight of the consensus node at `index`.
    pub fn weight_of_index(&self, index: ReplicaIndex) -> Option<Weight> {
        self.by_index(index).and_then(|v| self.weights.get(v)).copied()
    }

    /// Get the sum of the weights of all of the consensus nodes inside the validator set.
    pub fn total_weight(&self) -> TotalWeight {
        let mut total_weight = TotalWeight::new(0);
        for weight in self.weights.values() {
            total_weight += *weight
        }
        total_weight
    }

    /// Check whether the validator set contains `validator`.
    pub fn contains(&self, validator: &VerifyingKey) -> bool {
        self.weights.contains_key(validator)
    }

    /// Get an iterator through the consensus nodes' verifying keys which walks through them in
    /// ascending order.
    pub fn validators(&self) -> slice::Iter<VerifyingKey> {
        self.validators.iter()
    }

    /// Get a vector containing each consensus node and its weight, in ascending order of the
    /// nodes' verifying keys.
    pub fn validators_and_weights(&self) -> Vec<(VerifyingKey, Weight)> {
        self.validators()
            .map(|v| (*v, *self.weight(v).unwrap()))
            .collect()
    }

    /// Get the number of consensus nodes currently in the validator set.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Check whether the validator set is empty (i.e., `self.len() == 0`).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the [`ReplicaIndex`] of the given `validator` in the
    /// [sorted order](Self#ordering-of-consensus-nodes) of `VerifyingKey`s in the validator set,
    /// if it is actually in the validator set.
    pub fn position(&self, validator: &VerifyingKey) -> Option<ReplicaIndex> {
        let validator_bytes = validator.to_bytes();
        match self
            .validators
            .binary_search_by(|v| v.to_bytes().cmp(&validator_bytes))
        {
            Ok(pos) => Some(ReplicaIndex::new(pos as u64)),
            Err(_) => None,
        }
    }

    /// Get the verifying key of the consensus node at `index`, if the index is in range.
    pub fn by_index(&self, index: ReplicaIndex) -> Option<&VerifyingKey> {
        self.validators.get(index.int() as usize)
    }

    /// Compute the total weight that a set of distinct-sender votes must match or exceed (`>=`) in
    /// order to count as a quorum under this validator set.
    ///
    /// The quorum threshold of a validator set with total weight `W` is `W*2/3 + 1` (integer
    /// division), the weighted generalization of `2f+1` out of `3f+1` equally-weighted nodes. This
    /// threshold guarantees that two conflicting quorums cannot form while less than a third of the
    /// total weight is Byzantine.
    pub fn quorum(&self) -> TotalWeight {
        const TOTAL_WEIGHT_OVERFLOW: &str =
            "Validator set weight exceeds u128::MAX/2. Read the itemdoc for `ValidatorSet`.";

        TotalWeight::new(
            (self
                .total_weight()
                .int()
                .checked_mul(2)
                .expect(TOTAL_WEIGHT_OVERFLOW)
                / 3)
                + 1,
        )
    }

    /// The maximum number of faulty consensus nodes that the protocol tolerates under this
    /// validator set, i.e., `(N - 1) / 3`.
    pub fn max_faulty(&self) -> u64 {
        (self.len().saturating_sub(1) / 3) as u64
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    use super::*;

    fn set_of(n: usize, weight: u64) -> ValidatorSet {
        let mut csprg = OsRng {};
        let mut vs = ValidatorSet::new();
        for _ in 0..n {
            vs.put(
                &SigningKey::generate(&mut csprg).verifying_key(),
                Weight::new(weight),
            );
        }
        vs
    }

    #[test]
    fn quorum_of_four_equally_weighted_nodes_is_three() {
        let vs = set_of(4, 1);
        assert_eq!(vs.quorum(), TotalWeight::new(3));
        assert_eq!(vs.max_faulty(), 1);
    }

    #[test]
    fn quorum_of_seven_equally_weighted_nodes_is_five() {
        let vs = set_of(7, 1);
        assert_eq!(vs.quorum(), TotalWeight::new(5));
        assert_eq!(vs.max_faulty(), 2);
    }

    #[test]
    fn quorum_scales_with_weights() {
        let vs = set_of(4, 10);
        assert_eq!(vs.quorum(), TotalWeight::new(27));
    }

    #[test]
    fn positions_follow_ascending_key_order() {
        let vs = set_of(4, 1);
        let keys: Vec<_> = vs.validators().copied().collect();
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(vs.position(key), Some(ReplicaIndex::new(i as u64)));
            assert_eq!(vs.by_index(ReplicaIndex::new(i as u64)), Some(key));
        }
        assert!(vs.by_index(ReplicaIndex::new(4)).is_none());
    }
}
