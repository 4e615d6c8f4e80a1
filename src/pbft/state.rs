/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The authoritative source of information about the local replica's position in the protocol:
//! the current view, the tentatively-advanced view during a view change, the highest committed
//! proposal, the validator set, and the deterministic leader assignment derived from them.
//!
//! `ConsensusState` is a cloneable handle over shared state. All quorum and ordering decisions in
//! the crate resolve through it. Primitive fields are atomics so that the ingress poller and the
//! log sync client can take lock-free snapshots; the validator set and committed proposal sit
//! behind mutexes and change rarely (per commit or per ledger config change). Mutations only ever
//! happen on the worker thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::types::crypto_primitives::VerifyingKey;
use crate::types::data_types::{ProposalIndex, ReplicaIndex, TotalWeight, ViewNumber};
use crate::types::proposal::Proposal;
use crate::types::validator_set::ValidatorSet;

#[derive(Clone)]
pub(crate) struct ConsensusState {
    inner: Arc<Inner>,
}

struct Inner {
    my_key: VerifyingKey,
    water_mark_window: u64,
    view: AtomicU64,
    to_view: AtomicU64,
    committed_index: AtomicU64,
    committed_proposal: Mutex<Proposal>,
    validator_set: Mutex<ValidatorSet>,
}

impl ConsensusState {
    pub(crate) fn new(
        my_key: VerifyingKey,
        validator_set: ValidatorSet,
        committed_proposal: Proposal,
        water_mark_window: u64,
    ) -> ConsensusState {
        ConsensusState {
            inner: Arc::new(Inner {
                my_key,
                water_mark_window,
                view: AtomicU64::new(ViewNumber::init().int()),
                to_view: AtomicU64::new(ViewNumber::init().int()),
                committed_index: AtomicU64::new(committed_proposal.index.int()),
                committed_proposal: Mutex::new(committed_proposal),
                validator_set: Mutex::new(validator_set),
            }),
        }
    }

    /// The current active view.
    pub(crate) fn view(&self) -> ViewNumber {
        ViewNumber::new(self.inner.view.load(Ordering::SeqCst))
    }

    /// The tentatively-advanced view during a view change. Always `>= view()`.
    pub(crate) fn to_view(&self) -> ViewNumber {
        ViewNumber::new(self.inner.to_view.load(Ordering::SeqCst))
    }

    /// Enter `view`. The current view never decreases.
    pub(crate) fn set_view(&self, view: ViewNumber) {
        self.inner.view.fetch_max(view.int(), Ordering::SeqCst);
    }

    pub(crate) fn set_to_view(&self, to_view: ViewNumber) {
        self.inner.to_view.store(to_view.int(), Ordering::SeqCst);
    }

    pub(crate) fn inc_to_view(&self, delta: u64) {
        self.inner.to_view.fetch_add(delta, Ordering::SeqCst);
    }

    /// The highest index for which a quorum-certified, ledger-acknowledged commit exists.
    pub(crate) fn committed_index(&self) -> ProposalIndex {
        ProposalIndex::new(self.inner.committed_index.load(Ordering::SeqCst))
    }

    /// The next index to decide: `committed_index() + 1`.
    pub(crate) fn progressed_index(&self) -> ProposalIndex {
        self.committed_index() + 1
    }

    /// The exclusive upper bound on indices the engine accepts messages for. Bounds cache memory.
    pub(crate) fn high_water_mark(&self) -> ProposalIndex {
        self.progressed_index() + self.inner.water_mark_window
    }

    /// The local replica's highest committed proposal (data-less).
    pub(crate) fn committed_proposal(&self) -> Proposal {
        self.inner.committed_proposal.lock().unwrap().clone()
    }

    /// Record `proposal` as the highest committed proposal. Regressions are ignored: the committed
    /// index is monotonically non-decreasing.
    pub(crate) fn set_committed_proposal(&self, proposal: Proposal) {
        let mut committed = self.inner.committed_proposal.lock().unwrap();
        if proposal.index > committed.index {
            self.inner
                .committed_index
                .store(proposal.index.int(), Ordering::SeqCst);
            *committed = proposal.without_data();
        }
    }

    /// The verifying key that identifies the local node.
    pub(crate) fn node_id(&self) -> VerifyingKey {
        self.inner.my_key
    }

    /// The local node's index in the current validator set, if it is a consensus node.
    pub(crate) fn node_index(&self) -> Option<ReplicaIndex> {
        self.inner
            .validator_set
            .lock()
            .unwrap()
            .position(&self.inner.my_key)
    }

    /// Whether the local node is in the current validator set.
    pub(crate) fn is_consensus_node(&self) -> bool {
        self.node_index().is_some()
    }

    /// A snapshot of the current validator set.
    pub(crate) fn validator_set(&self) -> ValidatorSet {
        self.inner.validator_set.lock().unwrap().clone()
    }

    /// Replace the validator set, e.g., after the ledger reports a config change.
    pub(crate) fn reset_validator_set(&self, validator_set: ValidatorSet) {
        *self.inner.validator_set.lock().unwrap() = validator_set;
    }

    /// The deterministic leader assignment: `leader(index, view) = (index + view) mod N`.
    pub(crate) fn leader_at(&self, index: ProposalIndex, view: ViewNumber) -> ReplicaIndex {
        let n = self.inner.validator_set.lock().unwrap().len() as u64;
        ReplicaIndex::new((index.int().wrapping_add(view.int())) % n.max(1))
    }

    /// The leader of `index` under the current view.
    pub(crate) fn leader_index(&self, index: ProposalIndex) -> ReplicaIndex {
        self.leader_at(index, self.view())
    }

    /// The node that leads once the in-progress view change completes:
    /// `leader(progressed_index, to_view)`.
    pub(crate) fn leader_after_view_change(&self) -> ReplicaIndex {
        self.leader_at(self.progressed_index(), self.to_view())
    }

    /// The minimum distinct-sender weight for a quorum under the current validator set.
    pub(crate) fn min_required_quorum(&self) -> TotalWeight {
        self.inner.validator_set.lock().unwrap().quorum()
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    use crate::types::data_types::Weight;

    use super::*;

    fn state_of(n: usize) -> ConsensusState {
        let mut csprg = OsRng {};
        let keys: Vec<VerifyingKey> = (0..n)
            .map(|_| SigningKey::generate(&mut csprg).verifying_key())
            .collect();
        let mut vs = ValidatorSet::new();
        for key in &keys {
            vs.put(key, Weight::new(1));
        }
        ConsensusState::new(keys[0], vs, Proposal::genesis(), 10)
    }

    #[test]
    fn leader_rotates_with_index_and_view() {
        let state = state_of(4);
        assert_eq!(
            state.leader_at(ProposalIndex::new(1), ViewNumber::new(0)),
            ReplicaIndex::new(1)
        );
        assert_eq!(
            state.leader_at(ProposalIndex::new(1), ViewNumber::new(1)),
            ReplicaIndex::new(2)
        );
        assert_eq!(
            state.leader_at(ProposalIndex::new(3), ViewNumber::new(2)),
            ReplicaIndex::new(1)
        );
    }

    #[test]
    fn water_marks_follow_the_committed_index() {
        let state = state_of(4);
        assert_eq!(state.progressed_index(), ProposalIndex::new(1));
        assert_eq!(state.high_water_mark(), ProposalIndex::new(11));

        let mut committed = Proposal::genesis();
        committed.index = ProposalIndex::new(5);
        state.set_committed_proposal(committed);
        assert_eq!(state.committed_index(), ProposalIndex::new(5));
        assert_eq!(state.progressed_index(), ProposalIndex::new(6));
        assert_eq!(state.high_water_mark(), ProposalIndex::new(16));
    }

    #[test]
    fn committed_index_never_regresses() {
        let state = state_of(4);
        let mut committed = Proposal::genesis();
        committed.index = ProposalIndex::new(5);
        state.set_committed_proposal(committed);

        let mut stale = Proposal::genesis();
        stale.index = ProposalIndex::new(3);
        state.set_committed_proposal(stale);
        assert_eq!(state.committed_index(), ProposalIndex::new(5));
    }

    #[test]
    fn view_is_monotonically_non_decreasing() {
        let state = state_of(4);
        state.set_view(ViewNumber::new(4));
        state.set_view(ViewNumber::new(2));
        assert_eq!(state.view(), ViewNumber::new(4));
    }
}
