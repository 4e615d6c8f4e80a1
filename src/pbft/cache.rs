/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-(index, view) voting caches, quorum detection, and view change aggregation.
//!
//! The `CacheProcessor` is owned by the worker thread and is the only place where votes are
//! counted. It enforces the voting invariants that the protocol's safety rests on:
//!
//! - At most one pre-prepare is stored per (index, view); the first received wins, and later
//!   conflicting ones are evidence of an equivocating leader.
//! - Votes are deduplicated by sender, so a sender's weight is summed at most once per
//!   (index, view).
//! - A proposal that reached prepare-quorum at some view is recorded in the precommit cache and
//!   only ever overwritten by a prepare-quorum at a strictly higher view. The precommit cache is
//!   what view changes carry across leader failures, so this rule is what prevents a new leader
//!   from regressing a decision that might already have committed somewhere.
//!
//! Quorum checks return the messages the caller should broadcast or the proposal it should hand
//! to ledger storage; the cache itself never performs IO.

use std::collections::BTreeMap;

use crate::messages::{NewView, PrePrepare, ViewChange, Vote};
use crate::pbft::state::ConsensusState;
use crate::types::crypto_primitives::Keypair;
use crate::types::data_types::{
    CryptoHash, ProposalIndex, ReplicaIndex, TotalWeight, ViewNumber,
};
use crate::types::proposal::{Phase, Proposal};
use crate::types::validator_set::ValidatorSet;

/// A proposal that reached prepare-quorum at [`view`](Self::view). Survives view changes until the
/// index commits.
pub(crate) struct PrecommitEntry {
    pub(crate) view: ViewNumber,
    pub(crate) proposal: Proposal,
}

type VoteMap = BTreeMap<ProposalIndex, BTreeMap<ViewNumber, BTreeMap<ReplicaIndex, Vote>>>;

pub(crate) struct CacheProcessor {
    pre_prepares: BTreeMap<ProposalIndex, BTreeMap<ViewNumber, PrePrepare>>,
    prepares: VoteMap,
    commits: VoteMap,
    view_changes: BTreeMap<ViewNumber, BTreeMap<ReplicaIndex, ViewChange>>,
    precommits: BTreeMap<ProposalIndex, PrecommitEntry>,
    // Highest index handed to ledger storage and not yet acknowledged. Keeps the commit pipeline
    // strictly in index order.
    dispatched: Option<ProposalIndex>,
}

impl CacheProcessor {
    pub(crate) fn new() -> CacheProcessor {
        CacheProcessor {
            pre_prepares: BTreeMap::new(),
            prepares: BTreeMap::new(),
            commits: BTreeMap::new(),
            view_changes: BTreeMap::new(),
            precommits: BTreeMap::new(),
            dispatched: None,
        }
    }

    /* ↓↓↓ Inserts ↓↓↓ */

    /// Cache `msg` at its (index, view) if the slot is vacant or holds an identical proposal.
    ///
    /// Returns `false` if the slot already holds a pre-prepare with a different hash, which is
    /// evidence of an equivocating leader; the conflicting message is not stored.
    pub(crate) fn add_pre_prepare_cache(&mut self, msg: PrePrepare) -> bool {
        let slot = self
            .pre_prepares
            .entry(msg.index)
            .or_default()
            .entry(msg.view);
        match slot {
            std::collections::btree_map::Entry::Vacant(vacant) => {
                vacant.insert(msg);
                true
            }
            std::collections::btree_map::Entry::Occupied(occupied) => {
                occupied.get().proposal.hash == msg.proposal.hash
            }
        }
    }

    /// Cache a prepare vote, ignoring duplicates by sender.
    pub(crate) fn add_prepare_cache(&mut self, vote: Vote) {
        self.prepares
            .entry(vote.index)
            .or_default()
            .entry(vote.view)
            .or_default()
            .entry(vote.generated_from)
            .or_insert(vote);
    }

    /// Cache a commit vote, ignoring duplicates by sender.
    pub(crate) fn add_commit_req(&mut self, vote: Vote) {
        self.commits
            .entry(vote.index)
            .or_default()
            .entry(vote.view)
            .or_default()
            .entry(vote.generated_from)
            .or_insert(vote);
    }

    /// Cache a view change, ignoring duplicates by sender.
    pub(crate) fn add_view_change_req(&mut self, msg: ViewChange) {
        self.view_changes
            .entry(msg.view)
            .or_default()
            .entry(msg.generated_from)
            .or_insert(msg);
    }

    /* ↓↓↓ Lookups ↓↓↓ */

    /// Whether a pre-prepare with identical (index, view, hash) is cached.
    pub(crate) fn exist_pre_prepare(&self, msg: &PrePrepare) -> bool {
        self.pre_prepares
            .get(&msg.index)
            .and_then(|views| views.get(&msg.view))
            .is_some_and(|cached| cached.proposal.hash == msg.proposal.hash)
    }

    /// Whether accepting `msg` would regress a precommitted decision: the precommit cache holds a
    /// different hash for `msg.index`, certified at a view at or above `msg.view`.
    pub(crate) fn conflict_with_precommit_req(&self, msg: &PrePrepare) -> bool {
        self.precommits.get(&msg.index).is_some_and(|entry| {
            entry.proposal.hash != msg.proposal.hash && entry.view >= msg.view
        })
    }

    /// Whether the cached pre-prepare at (index, view) carries a different hash than `hash`.
    pub(crate) fn conflict_with_processed_req(
        &self,
        index: ProposalIndex,
        view: ViewNumber,
        hash: &CryptoHash,
    ) -> bool {
        self.pre_prepares
            .get(&index)
            .and_then(|views| views.get(&view))
            .is_some_and(|cached| cached.proposal.hash != *hash)
    }

    /// The precommit cache entry for `index` if it carries full data under the given hash. Used to
    /// serve prepared-proposal sync requests.
    pub(crate) fn precommit_with_data(
        &self,
        index: ProposalIndex,
        hash: &CryptoHash,
    ) -> Option<Proposal> {
        self.precommits
            .get(&index)
            .filter(|entry| entry.proposal.hash == *hash && entry.proposal.data.is_some())
            .map(|entry| entry.proposal.clone())
    }

    /// A snapshot of the precommit cache with proposal data stripped, for inclusion in view change
    /// messages.
    pub(crate) fn pre_commit_caches_without_data(&self) -> Vec<Proposal> {
        self.precommits
            .values()
            .map(|entry| entry.proposal.without_data())
            .collect()
    }

    /// If the precommit cache holds full data for `pre`'s proposal, splice it in and return true.
    pub(crate) fn try_to_fill_proposal(&self, pre: &mut PrePrepare) -> bool {
        match self.precommits.get(&pre.index) {
            Some(entry)
                if entry.proposal.hash == pre.proposal.hash && entry.proposal.data.is_some() =>
            {
                pre.proposal.data = entry.proposal.data.clone();
                true
            }
            _ => false,
        }
    }

    /// Verify the signature chain asserting that `proposal` reached prepare-quorum at its stated
    /// view: distinct-sender shares over the proposal's (index, hash), all at one view, with
    /// weight at least the quorum threshold. Commit shares are accepted as well since a
    /// commit-quorum is strictly stronger evidence.
    pub(crate) fn check_precommit_msg(
        &self,
        proposal: &Proposal,
        validator_set: &ValidatorSet,
    ) -> bool {
        if proposal.signatures.is_empty() {
            return false;
        }
        proposal.certified_weight(validator_set, &[Phase::Prepare, Phase::Commit])
            >= validator_set.quorum()
    }

    /// Whether `proposal` conflicts with the local precommit cache: same index and certified view,
    /// different hash.
    pub(crate) fn conflicts_with_local_precommit(&self, proposal: &Proposal) -> bool {
        match (self.precommits.get(&proposal.index), proposal.certified_view()) {
            (Some(entry), Some(view)) => {
                entry.view == view && entry.proposal.hash != proposal.hash
            }
            _ => false,
        }
    }

    /// The summed weight of the distinct senders cached in the view change slot for `view`.
    pub(crate) fn view_change_weight(
        &self,
        view: ViewNumber,
        validator_set: &ValidatorSet,
    ) -> TotalWeight {
        let mut total = TotalWeight::new(0);
        if let Some(senders) = self.view_changes.get(&view) {
            for replica in senders.keys() {
                if let Some(weight) = validator_set.weight_of_index(*replica) {
                    total += weight;
                }
            }
        }
        total
    }

    /* ↓↓↓ Quorum-driven phase transitions ↓↓↓ */

    /// For each (index, view) where prepare weight reached quorum and the matching pre-prepare is
    /// cached: record the proposal in the precommit cache (overwriting only with a strictly higher
    /// view), cache the local commit vote, and return it for broadcast.
    pub(crate) fn check_and_pre_commit(
        &mut self,
        state: &ConsensusState,
        keypair: &Keypair,
    ) -> Vec<Vote> {
        let Some(my_index) = state.node_index() else {
            return Vec::new();
        };
        let validator_set = state.validator_set();
        let quorum = validator_set.quorum();

        let mut reached: Vec<(ProposalIndex, ViewNumber, CryptoHash)> = Vec::new();
        for (index, views) in &self.prepares {
            if *index < state.progressed_index() {
                continue;
            }
            for (view, votes) in views {
                let Some(pre) = self
                    .pre_prepares
                    .get(index)
                    .and_then(|views| views.get(view))
                else {
                    continue;
                };
                let already_voted = self
                    .commits
                    .get(index)
                    .and_then(|views| views.get(view))
                    .is_some_and(|votes| votes.contains_key(&my_index));
                if already_voted {
                    continue;
                }
                let weight = vote_weight(votes, &pre.proposal.hash, &validator_set);
                if weight >= quorum {
                    reached.push((*index, *view, pre.proposal.hash));
                }
            }
        }

        let mut commit_votes = Vec::new();
        for (index, view, hash) in reached {
            // Seal the prepared proposal with the prepare shares that certify it.
            let shares = self.prepares[&index][&view]
                .values()
                .filter(|vote| vote.proposal_hash == hash)
                .map(Vote::as_share)
                .collect::<Vec<_>>();
            let mut proposal = self.pre_prepares[&index][&view].proposal.clone();
            proposal.signatures = shares;

            let replace = match self.precommits.get(&index) {
                None => true,
                Some(entry) => view > entry.view,
            };
            if replace {
                self.precommits
                    .insert(index, PrecommitEntry { view, proposal });
            }

            let commit = Vote::new(keypair, view, index, hash, Phase::Commit, my_index);
            self.add_commit_req(commit.clone());
            commit_votes.push(commit);
        }
        commit_votes
    }

    /// If commit weight reached quorum for the next index to decide, seal the proposal with its
    /// commit shares and return it for ledger dispatch.
    ///
    /// Only the proposal at exactly `progressed_index` is ever returned, and never before the
    /// previous dispatch was acknowledged: commits reach the ledger strictly in index order.
    pub(crate) fn check_and_commit(&mut self, state: &ConsensusState) -> Option<Proposal> {
        let index = state.progressed_index();
        if self.dispatched.is_some_and(|dispatched| index <= dispatched) {
            return None;
        }
        let validator_set = state.validator_set();
        let quorum = validator_set.quorum();

        let views = self.commits.get(&index)?;
        for (view, votes) in views {
            let Some(pre) = self
                .pre_prepares
                .get(&index)
                .and_then(|views| views.get(view))
            else {
                continue;
            };
            let weight = vote_weight(votes, &pre.proposal.hash, &validator_set);
            if weight < quorum {
                continue;
            }

            let mut proposal = pre.proposal.clone();
            proposal.signatures = votes
                .values()
                .filter(|vote| vote.proposal_hash == pre.proposal.hash)
                .map(Vote::as_share)
                .collect();
            self.dispatched = Some(index);
            return Some(proposal);
        }
        None
    }

    /// Record that `index` was handed to ledger storage outside the voting path (log sync
    /// catch-up), so the voting path does not dispatch it again.
    pub(crate) fn mark_dispatched(&mut self, index: ProposalIndex) {
        self.dispatched = Some(self.dispatched.map_or(index, |d| d.max(index)));
    }

    /// The next index that may be handed to ledger storage.
    pub(crate) fn next_dispatch_index(&self, state: &ConsensusState) -> ProposalIndex {
        match self.dispatched {
            Some(dispatched) => (dispatched + 1).max(state.progressed_index()),
            None => state.progressed_index(),
        }
    }

    /// If the view change slot for `to_view` holds a quorum and the local node leads after the
    /// view change, construct the new view message.
    ///
    /// Returns `None` while any aggregated view change claims a committed index ahead of ours:
    /// the caller must log-sync first, otherwise the reissued pre-prepares would propose below the
    /// quorum's committed state.
    pub(crate) fn check_and_try_into_new_view(
        &mut self,
        state: &ConsensusState,
        keypair: &Keypair,
    ) -> Option<NewView> {
        let to_view = state.to_view();
        if to_view <= state.view() {
            return None;
        }
        let my_index = state.node_index()?;
        if state.leader_after_view_change() != my_index {
            return None;
        }
        let validator_set = state.validator_set();
        if self.view_change_weight(to_view, &validator_set) < validator_set.quorum() {
            return None;
        }

        let senders = self.view_changes.get(&to_view)?;
        if senders
            .values()
            .any(|vc| vc.committed_proposal.index > state.committed_index())
        {
            return None;
        }

        let view_change_list: Vec<ViewChange> = senders.values().cloned().collect();
        let pre_prepares = select_new_view_proposals(&view_change_list)
            .into_iter()
            .map(|(index, prepared)| {
                let proposal = match prepared {
                    Some(proposal) => proposal,
                    None => Proposal::empty(index),
                };
                PrePrepare::new(keypair, to_view, my_index, proposal)
            })
            .collect();

        Some(NewView::new(
            keypair,
            to_view,
            my_index,
            view_change_list,
            pre_prepares,
        ))
    }

    /* ↓↓↓ Expiry ↓↓↓ */

    /// Purge view change entries for views below `to_view` and from nodes that are no longer in
    /// the validator set.
    pub(crate) fn remove_invalid_view_change(&mut self, state: &ConsensusState) {
        let to_view = state.to_view();
        let validator_set = state.validator_set();
        self.view_changes.retain(|view, senders| {
            if *view < to_view {
                return false;
            }
            senders.retain(|replica, _| validator_set.by_index(*replica).is_some());
            !senders.is_empty()
        });
    }

    /// Discard voting caches for indices at or below `committed_index - retain_window`.
    pub(crate) fn clear_expired_cache(&mut self, state: &ConsensusState, retain_window: u64) {
        let committed = state.committed_index();
        if committed.int() < retain_window {
            return;
        }
        let keep_from = committed.saturating_sub(retain_window) + 1;
        self.pre_prepares = self.pre_prepares.split_off(&keep_from);
        self.prepares = self.prepares.split_off(&keep_from);
        self.commits = self.commits.split_off(&keep_from);
    }

    /// Drop precommit entries for indices at or below the finalized `index`, and reopen the
    /// dispatch pipeline.
    pub(crate) fn on_checkpoint_finalized(&mut self, index: ProposalIndex) {
        self.precommits.retain(|i, _| *i > index);
    }

    /// Seed the precommit cache from proposals recovered from the durable commit log on startup.
    pub(crate) fn seed_precommits(&mut self, proposals: Vec<Proposal>) {
        for proposal in proposals {
            let view = proposal.certified_view().unwrap_or(ViewNumber::init());
            self.precommits
                .insert(proposal.index, PrecommitEntry { view, proposal });
        }
    }
}

/// Sum the weight of distinct senders among `votes` that vote for `hash`.
fn vote_weight(
    votes: &BTreeMap<ReplicaIndex, Vote>,
    hash: &CryptoHash,
    validator_set: &ValidatorSet,
) -> TotalWeight {
    let mut total = TotalWeight::new(0);
    for (replica, vote) in votes {
        if vote.proposal_hash != *hash {
            continue;
        }
        if let Some(weight) = validator_set.weight_of_index(*replica) {
            total += weight;
        }
    }
    total
}

/// The deterministic pre-prepare selection that a new view reissues, derived purely from the
/// aggregated view changes so that every replica computes the same list.
///
/// For every index from the quorum's highest committed index (exclusive) up to its highest
/// prepared index (or just the next undecided index when nothing was prepared), pick the
/// prepared proposal certified at the highest view, breaking ties towards the lexicographically
/// smallest hash. Indices nobody prepared get `None`, which the caller turns into an empty block.
pub(crate) fn select_new_view_proposals(
    view_changes: &[ViewChange],
) -> Vec<(ProposalIndex, Option<Proposal>)> {
    let Some(base) = view_changes
        .iter()
        .map(|vc| vc.committed_proposal.index)
        .max()
    else {
        return Vec::new();
    };
    let upper = view_changes
        .iter()
        .flat_map(|vc| vc.prepared_proposals.iter().map(|p| p.index))
        .max()
        .map_or(base + 1, |max_prepared| max_prepared.max(base + 1));

    let mut selections = Vec::new();
    let mut index = base + 1;
    while index <= upper {
        let mut best: Option<&Proposal> = None;
        for prepared in view_changes
            .iter()
            .flat_map(|vc| vc.prepared_proposals.iter())
            .filter(|p| p.index == index)
        {
            best = match best {
                None => Some(prepared),
                Some(current) => {
                    let current_view = current.certified_view();
                    let candidate_view = prepared.certified_view();
                    if candidate_view > current_view
                        || (candidate_view == current_view && prepared.hash < current.hash)
                    {
                        Some(prepared)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        selections.push((index, best.cloned()));
        index += 1;
    }
    selections
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    use crate::types::crypto_primitives::{empty_hash, sha256};
    use crate::types::data_types::{ProposalData, Weight};

    use super::*;

    struct Cluster {
        keypairs: Vec<Keypair>,
        states: Vec<ConsensusState>,
    }

    impl Cluster {
        // A cluster of `n` equally weighted nodes. `states[i]` and `keypairs[i]` belong to the
        // node with replica index `i`.
        fn new(n: usize) -> Cluster {
            let mut csprg = OsRng {};
            let mut keypairs: Vec<Keypair> = (0..n)
                .map(|_| Keypair::new(SigningKey::generate(&mut csprg)))
                .collect();
            keypairs.sort_by_key(|kp| kp.public().to_bytes());

            let mut validator_set = ValidatorSet::new();
            for keypair in &keypairs {
                validator_set.put(&keypair.public(), Weight::new(1));
            }
            let states = keypairs
                .iter()
                .map(|kp| {
                    ConsensusState::new(
                        kp.public(),
                        validator_set.clone(),
                        Proposal::genesis(),
                        10,
                    )
                })
                .collect();
            Cluster { keypairs, states }
        }

        fn validator_set(&self) -> ValidatorSet {
            self.states[0].validator_set()
        }

        fn pre_prepare(&self, leader: usize, index: u64, view: u64, payload: &[u8]) -> PrePrepare {
            let proposal = Proposal::new(
                ProposalIndex::new(index),
                sha256(payload),
                ProposalData::new(payload.to_vec()),
            );
            PrePrepare::new(
                &self.keypairs[leader],
                ViewNumber::new(view),
                ReplicaIndex::new(leader as u64),
                proposal,
            )
        }

        fn vote(&self, sender: usize, index: u64, view: u64, payload: &[u8], phase: Phase) -> Vote {
            Vote::new(
                &self.keypairs[sender],
                ViewNumber::new(view),
                ProposalIndex::new(index),
                sha256(payload),
                phase,
                ReplicaIndex::new(sender as u64),
            )
        }
    }

    #[test]
    fn prepare_quorum_produces_one_commit_vote_and_a_precommit_entry() {
        let cluster = Cluster::new(4);
        let mut cache = CacheProcessor::new();
        let state = &cluster.states[0];

        assert!(cache.add_pre_prepare_cache(cluster.pre_prepare(1, 1, 0, b"block")));
        cache.add_prepare_cache(cluster.vote(0, 1, 0, b"block", Phase::Prepare));
        cache.add_prepare_cache(cluster.vote(1, 1, 0, b"block", Phase::Prepare));
        assert!(cache.check_and_pre_commit(state, &cluster.keypairs[0]).is_empty());

        cache.add_prepare_cache(cluster.vote(2, 1, 0, b"block", Phase::Prepare));
        let commits = cache.check_and_pre_commit(state, &cluster.keypairs[0]);
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].phase, Phase::Commit);
        assert_eq!(commits[0].index, ProposalIndex::new(1));

        let entry = cache
            .precommit_with_data(ProposalIndex::new(1), &sha256(b"block"))
            .unwrap();
        assert_eq!(entry.signatures.len(), 3);
        assert!(cache.check_precommit_msg(&entry, &cluster.validator_set()));

        // Re-checking is a no-op: the local commit vote was already cast.
        assert!(cache.check_and_pre_commit(state, &cluster.keypairs[0]).is_empty());
    }

    #[test]
    fn duplicate_votes_from_one_sender_are_counted_once() {
        let cluster = Cluster::new(4);
        let mut cache = CacheProcessor::new();
        let state = &cluster.states[0];

        assert!(cache.add_pre_prepare_cache(cluster.pre_prepare(1, 1, 0, b"block")));
        for _ in 0..5 {
            cache.add_prepare_cache(cluster.vote(1, 1, 0, b"block", Phase::Prepare));
            cache.add_prepare_cache(cluster.vote(2, 1, 0, b"block", Phase::Prepare));
        }
        assert!(cache.check_and_pre_commit(state, &cluster.keypairs[0]).is_empty());
    }

    #[test]
    fn first_received_pre_prepare_wins() {
        let cluster = Cluster::new(4);
        let mut cache = CacheProcessor::new();

        assert!(cache.add_pre_prepare_cache(cluster.pre_prepare(1, 1, 0, b"first")));
        // The same message again is idempotent.
        assert!(cache.add_pre_prepare_cache(cluster.pre_prepare(1, 1, 0, b"first")));
        // An equivocating proposal at the same (index, view) is refused.
        assert!(!cache.add_pre_prepare_cache(cluster.pre_prepare(1, 1, 0, b"second")));
        assert!(cache.exist_pre_prepare(&cluster.pre_prepare(1, 1, 0, b"first")));
        assert!(!cache.exist_pre_prepare(&cluster.pre_prepare(1, 1, 0, b"second")));
    }

    #[test]
    fn precommit_entry_is_only_overwritten_by_a_higher_view() {
        let cluster = Cluster::new(4);
        let mut cache = CacheProcessor::new();
        let state = &cluster.states[0];

        assert!(cache.add_pre_prepare_cache(cluster.pre_prepare(1, 1, 0, b"one")));
        for sender in 0..3 {
            cache.add_prepare_cache(cluster.vote(sender, 1, 0, b"one", Phase::Prepare));
        }
        let _ = cache.check_and_pre_commit(state, &cluster.keypairs[0]);

        // A pre-prepare for the same index with a different hash at a lower-or-equal view
        // conflicts with the precommitted decision.
        let conflicting = cluster.pre_prepare(1, 1, 0, b"two");
        assert!(cache.conflict_with_precommit_req(&conflicting));

        // At a strictly higher view the same hash may be re-certified, overwriting the entry.
        assert!(cache.add_pre_prepare_cache(cluster.pre_prepare(2, 1, 1, b"one")));
        for sender in 0..3 {
            cache.add_prepare_cache(cluster.vote(sender, 1, 1, b"one", Phase::Prepare));
        }
        let _ = cache.check_and_pre_commit(state, &cluster.keypairs[0]);
        let entry = cache
            .precommit_with_data(ProposalIndex::new(1), &sha256(b"one"))
            .unwrap();
        assert_eq!(entry.certified_view(), Some(ViewNumber::new(1)));
    }

    #[test]
    fn commit_quorum_dispatches_only_the_progressed_index_once() {
        let cluster = Cluster::new(4);
        let mut cache = CacheProcessor::new();
        let state = &cluster.states[0];

        // Commit-quorum for index 2 first: nothing dispatches while index 1 is undecided.
        assert!(cache.add_pre_prepare_cache(cluster.pre_prepare(2, 2, 0, b"two")));
        for sender in 0..3 {
            cache.add_commit_req(cluster.vote(sender, 2, 0, b"two", Phase::Commit));
        }
        assert!(cache.check_and_commit(state).is_none());

        assert!(cache.add_pre_prepare_cache(cluster.pre_prepare(1, 1, 0, b"one")));
        for sender in 0..3 {
            cache.add_commit_req(cluster.vote(sender, 1, 0, b"one", Phase::Commit));
        }
        let sealed = cache.check_and_commit(state).unwrap();
        assert_eq!(sealed.index, ProposalIndex::new(1));
        assert_eq!(sealed.signatures.len(), 3);

        // Not dispatched again until the checkpoint acknowledgement advances the committed index.
        assert!(cache.check_and_commit(state).is_none());
        let mut committed = Proposal::genesis();
        committed.index = ProposalIndex::new(1);
        state.set_committed_proposal(committed);
        cache.on_checkpoint_finalized(ProposalIndex::new(1));
        let sealed = cache.check_and_commit(state).unwrap();
        assert_eq!(sealed.index, ProposalIndex::new(2));
    }

    #[test]
    fn insufficient_or_forged_shares_fail_the_precommit_check() {
        let cluster = Cluster::new(4);
        let cache = CacheProcessor::new();
        let validator_set = cluster.validator_set();

        let mut proposal = Proposal::new(
            ProposalIndex::new(1),
            sha256(b"block"),
            ProposalData::new(b"block".to_vec()),
        );
        assert!(!cache.check_precommit_msg(&proposal, &validator_set));

        // Two valid shares: below quorum.
        proposal.signatures = (0..2)
            .map(|sender| cluster.vote(sender, 1, 0, b"block", Phase::Prepare).as_share())
            .collect();
        assert!(!cache.check_precommit_msg(&proposal, &validator_set));

        // Three shares, but one signed by a key outside the validator set.
        let outsider = Keypair::new(SigningKey::generate(&mut OsRng {}));
        let mut forged = Vote::new(
            &outsider,
            ViewNumber::new(0),
            ProposalIndex::new(1),
            sha256(b"block"),
            Phase::Prepare,
            ReplicaIndex::new(3),
        )
        .as_share();
        forged.replica = ReplicaIndex::new(3);
        let mut shares: Vec<_> = (0..2)
            .map(|sender| cluster.vote(sender, 1, 0, b"block", Phase::Prepare).as_share())
            .collect();
        shares.push(forged);
        proposal.signatures = shares;
        assert!(!cache.check_precommit_msg(&proposal, &validator_set));

        // Three genuine shares: quorum.
        proposal.signatures = (0..3)
            .map(|sender| cluster.vote(sender, 1, 0, b"block", Phase::Prepare).as_share())
            .collect();
        assert!(cache.check_precommit_msg(&proposal, &validator_set));
    }

    #[test]
    fn new_view_selection_prefers_the_highest_certified_view_then_the_smallest_hash() {
        let cluster = Cluster::new(4);

        let prepared_at = |payload: &[u8], view: u64| {
            let mut proposal = Proposal::new(
                ProposalIndex::new(1),
                sha256(payload),
                ProposalData::new(payload.to_vec()),
            )
            .without_data();
            proposal.signatures = (0..3)
                .map(|sender| cluster.vote(sender, 1, view, payload, Phase::Prepare).as_share())
                .collect();
            proposal
        };

        let vc = |sender: usize, prepared: Vec<Proposal>| {
            ViewChange::new(
                &cluster.keypairs[sender],
                ViewNumber::new(1),
                ReplicaIndex::new(sender as u64),
                Proposal::genesis(),
                prepared,
            )
        };

        // Higher certified view wins.
        let view_changes = vec![
            vc(1, vec![prepared_at(b"older", 0)]),
            vc(2, vec![prepared_at(b"newer", 1)]),
            vc(3, Vec::new()),
        ];
        let selections = select_new_view_proposals(&view_changes);
        assert_eq!(selections.len(), 1);
        assert_eq!(selections[0].0, ProposalIndex::new(1));
        assert_eq!(selections[0].1.as_ref().unwrap().hash, sha256(b"newer"));

        // Equal views tie-break towards the lexicographically smallest hash.
        let a = prepared_at(b"a", 1);
        let b = prepared_at(b"b", 1);
        let smaller = a.hash.min(b.hash);
        let view_changes = vec![vc(1, vec![a]), vc(2, vec![b]), vc(3, Vec::new())];
        let selections = select_new_view_proposals(&view_changes);
        assert_eq!(selections[0].1.as_ref().unwrap().hash, smaller);
    }

    #[test]
    fn new_view_without_prepared_proposals_reissues_an_empty_block() {
        let cluster = Cluster::new(4);
        let mut cache = CacheProcessor::new();

        // Node 2 leads view 1 for index 1: leader(1, 1) = 2.
        let state = &cluster.states[2];
        state.inc_to_view(1);

        for sender in [0usize, 1, 3] {
            cache.add_view_change_req(ViewChange::new(
                &cluster.keypairs[sender],
                ViewNumber::new(1),
                ReplicaIndex::new(sender as u64),
                Proposal::genesis(),
                Vec::new(),
            ));
        }
        let new_view = cache
            .check_and_try_into_new_view(state, &cluster.keypairs[2])
            .unwrap();
        assert_eq!(new_view.view, ViewNumber::new(1));
        assert_eq!(new_view.pre_prepares.len(), 1);
        assert_eq!(new_view.pre_prepares[0].index, ProposalIndex::new(1));
        assert_eq!(new_view.pre_prepares[0].proposal.hash, empty_hash());

        // A non-leader with the same caches must not form a new view.
        let state = &cluster.states[1];
        state.inc_to_view(1);
        assert!(cache
            .check_and_try_into_new_view(state, &cluster.keypairs[1])
            .is_none());
    }

    #[test]
    fn new_view_waits_for_catch_up_when_the_quorum_is_ahead() {
        let cluster = Cluster::new(4);
        let mut cache = CacheProcessor::new();
        let state = &cluster.states[2];
        state.inc_to_view(1);

        let mut ahead = Proposal::genesis();
        ahead.index = ProposalIndex::new(3);
        for sender in [0usize, 1, 3] {
            cache.add_view_change_req(ViewChange::new(
                &cluster.keypairs[sender],
                ViewNumber::new(1),
                ReplicaIndex::new(sender as u64),
                ahead.clone(),
                Vec::new(),
            ));
        }
        assert!(cache
            .check_and_try_into_new_view(state, &cluster.keypairs[2])
            .is_none());
    }

    #[test]
    fn expired_cache_entries_are_discarded() {
        let cluster = Cluster::new(4);
        let mut cache = CacheProcessor::new();
        let state = &cluster.states[0];

        for index in 1..=6 {
            assert!(cache.add_pre_prepare_cache(cluster.pre_prepare(
                (index % 4) as usize,
                index,
                0,
                b"block",
            )));
        }
        let mut committed = Proposal::genesis();
        committed.index = ProposalIndex::new(6);
        state.set_committed_proposal(committed);

        cache.clear_expired_cache(state, 2);
        assert!(!cache.exist_pre_prepare(&cluster.pre_prepare(0, 4, 0, b"block")));
        assert!(cache.exist_pre_prepare(&cluster.pre_prepare(1, 5, 0, b"block")));
        assert!(cache.exist_pre_prepare(&cluster.pre_prepare(2, 6, 0, b"block")));
    }

    #[test]
    fn invalid_view_changes_are_purged() {
        let cluster = Cluster::new(4);
        let mut cache = CacheProcessor::new();
        let state = &cluster.states[0];

        cache.add_view_change_req(ViewChange::new(
            &cluster.keypairs[1],
            ViewNumber::new(1),
            ReplicaIndex::new(1),
            Proposal::genesis(),
            Vec::new(),
        ));
        cache.add_view_change_req(ViewChange::new(
            &cluster.keypairs[2],
            ViewNumber::new(2),
            ReplicaIndex::new(2),
            Proposal::genesis(),
            Vec::new(),
        ));

        state.inc_to_view(2);
        cache.remove_invalid_view_change(state);
        assert_eq!(
            cache.view_change_weight(ViewNumber::new(1), &cluster.validator_set()),
            TotalWeight::new(0)
        );
        assert_eq!(
            cache.view_change_weight(ViewNumber::new(2), &cluster.validator_set()),
            TotalWeight::new(1)
        );
    }

}
