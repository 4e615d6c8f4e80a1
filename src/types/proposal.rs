/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'proposal' type, its signature shares, and their methods.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::crypto_primitives::{empty_hash, Signature, Verifier};
use crate::types::data_types::{
    CryptoHash, ProposalData, ProposalIndex, ReplicaIndex, SignatureBytes, TotalWeight, ViewNumber,
};
use crate::types::validator_set::ValidatorSet;

/// The voting phase that a [`SignatureShare`] or a vote message belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub enum Phase {
    Prepare,
    Commit,
}

/// A single consensus node's signature over the canonical vote bytes
/// `(view, index, hash, phase)`.
///
/// Shares are collected from vote messages. A set of distinct-sender shares with quorum weight is
/// the transferable evidence that a proposal was prepared (or committed) at the recorded view:
/// view changes carry prepare shares to prove precommitted state, and committed proposals carry
/// commit shares as their seal.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureShare {
    pub replica: ReplicaIndex,
    pub view: ViewNumber,
    pub phase: Phase,
    pub signature: SignatureBytes,
}

impl SignatureShare {
    /// The bytes that the share's signature is expected to cover for a proposal with the given
    /// `index` and `hash`.
    pub fn signed_bytes(&self, index: ProposalIndex, hash: &CryptoHash) -> Vec<u8> {
        (self.view, index, *hash, self.phase).try_to_vec().unwrap()
    }

    /// Verify this share against the key of the consensus node it claims to come from.
    pub fn verify(
        &self,
        index: ProposalIndex,
        hash: &CryptoHash,
        validator_set: &ValidatorSet,
    ) -> bool {
        let Some(key) = validator_set.by_index(self.replica) else {
            return false;
        };
        let signature = Signature::from_bytes(&self.signature.bytes());
        key.verify(&self.signed_bytes(index, hash), &signature).is_ok()
    }
}

/// A candidate block to be agreed upon at a given index.
///
/// `data` may be absent (a "data-less proposal") when only commitment metadata is needed, e.g.,
/// inside view change messages. `signatures` accumulates [`SignatureShare`]s: prepare shares while
/// the proposal sits in the precommit cache, commit shares once it is sealed for the ledger.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Proposal {
    pub index: ProposalIndex,
    pub hash: CryptoHash,
    pub data: Option<ProposalData>,
    pub signatures: Vec<SignatureShare>,
}

impl Proposal {
    /// Create a new proposal carrying `data`.
    pub fn new(index: ProposalIndex, hash: CryptoHash, data: ProposalData) -> Proposal {
        Proposal {
            index,
            hash,
            data: Some(data),
            signatures: Vec::new(),
        }
    }

    /// The proposal that every replica starts from before anything has been committed: index 0
    /// with the [`empty_hash`].
    pub fn genesis() -> Proposal {
        Proposal {
            index: ProposalIndex::new(0),
            hash: empty_hash(),
            data: None,
            signatures: Vec::new(),
        }
    }

    /// An empty-block proposal for `index`, reissued by the new view protocol for indices that no
    /// replica prepared a proposal for.
    pub fn empty(index: ProposalIndex) -> Proposal {
        Proposal {
            index,
            hash: empty_hash(),
            data: None,
            signatures: Vec::new(),
        }
    }

    /// Whether this proposal is an empty block.
    pub fn is_empty_block(&self) -> bool {
        self.hash == empty_hash()
    }

    /// A copy of this proposal with `data` stripped, keeping index, hash and signature shares.
    pub fn without_data(&self) -> Proposal {
        Proposal {
            index: self.index,
            hash: self.hash,
            data: None,
            signatures: self.signatures.clone(),
        }
    }

    /// The view this proposal's signature shares vouch for, if it carries any.
    ///
    /// Shares for one proposal are always collected at a single (index, view), so the first
    /// share's view is the stated view of the whole set.
    pub fn certified_view(&self) -> Option<ViewNumber> {
        self.signatures.first().map(|share| share.view)
    }

    /// Sum the weight of the distinct senders among this proposal's signature shares, counting
    /// only shares that verify against `validator_set`, agree on [`certified_view`](Self::certified_view),
    /// and match `phases`.
    pub fn certified_weight(&self, validator_set: &ValidatorSet, phases: &[Phase]) -> TotalWeight {
        let mut total = TotalWeight::new(0);
        let mut counted: Vec<ReplicaIndex> = Vec::new();
        let Some(view) = self.certified_view() else {
            return total;
        };
        for share in &self.signatures {
            if share.view != view
                || !phases.contains(&share.phase)
                || counted.contains(&share.replica)
            {
                continue;
            }
            if !share.verify(self.index, &self.hash, validator_set) {
                continue;
            }
            if let Some(weight) = validator_set.weight_of_index(share.replica) {
                counted.push(share.replica);
                total += weight;
            }
        }
        total
    }
}
