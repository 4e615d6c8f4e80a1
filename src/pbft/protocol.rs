/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The worker thread that drives the consensus state machine.
//!
//! A single thread owns the [`CacheProcessor`] and executes every phase handler, so no cache
//! mutation ever races. Each iteration of the worker loop pops one [`WorkerTask`] from the message
//! queue (blocking up to `pop_wait`), handles it, checks the view change timer, and sweeps expired
//! cache entries.
//!
//! ## Phase flow
//!
//! A pre-prepare from the leader of its (index, view) is verified by the external validator (the
//! result re-enters through the queue), cached, and answered with a broadcast prepare vote. Quorum
//! of prepares moves the proposal into the precommit cache and broadcasts the commit vote; quorum
//! of commits seals the proposal and hands it to ledger storage. Only the ledger's
//! acknowledgement advances the committed index.
//!
//! ## View changes
//!
//! When the timer fires, the replica advances its target view, broadcasts a view change carrying
//! its committed proposal and its precommit cache (data stripped), and the leader of the target
//! view aggregates a quorum into a new view message that reissues pre-prepares for every
//! unfinished index. Receivers re-run the deterministic selection to validate the reissued list
//! before re-entering the phase handlers under the new view.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use threadpool::ThreadPool;

use crate::config::Configuration;
use crate::events::*;
use crate::log_sync::SyncRequest;
use crate::messages::{
    CommittedProposalRequest, CommittedProposalResponse, ConsensusMessage, NewView, PrePrepare,
    PreparedProposalRequest, PreparedProposalResponse, SignedMessage, ViewChange, Vote,
};
use crate::msg_queue::{MsgQueue, WorkerTask};
use crate::networking::network::Network;
use crate::networking::sending::SenderHandle;
use crate::pbft::cache::{select_new_view_proposals, CacheProcessor};
use crate::pbft::state::ConsensusState;
use crate::replica::SubmitError;
use crate::storage::{CommittedLog, FatalError, KVStore, LedgerConfig, StorageCommand};
use crate::timer::ViewChangeTimer;
use crate::types::crypto_primitives::{empty_hash, Keypair};
use crate::types::data_types::{ProposalIndex, ReplicaIndex, TotalWeight, ViewNumber};
use crate::types::proposal::{Phase, Proposal};
use crate::validator::{spawn_verification, BlockValidator, ProposalValidator};

// Upper bound on the number of proposals served in one committed-proposal sync response.
const MAX_SYNC_BATCH: u64 = 64;

pub(crate) struct Pbft<N: Network, K: KVStore> {
    state: ConsensusState,
    cache: CacheProcessor,
    keypair: Keypair,
    sender: SenderHandle<N>,
    msg_queue: Arc<MsgQueue>,
    storage: Sender<StorageCommand>,
    commit_log: CommittedLog<K>,
    sync_requests: Sender<SyncRequest>,
    validator: Arc<dyn ProposalValidator>,
    block_validator: BlockValidator,
    verify_pool: ThreadPool,
    timer: ViewChangeTimer,
    event_publisher: Option<Sender<Event>>,
    configuration: Configuration,
    // Pre-prepares whose proposals are out at the external validator, keyed by (index, view) so
    // that results outlived by a view change are discarded.
    pending_verifications: HashMap<(ProposalIndex, ViewNumber), PrePrepare>,
    // Highest committed index a catch-up request is in flight for.
    syncing_to: Option<ProposalIndex>,
    fatal: Option<FatalError>,
}

impl<N: Network, K: KVStore> Pbft<N, K> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        state: ConsensusState,
        cache: CacheProcessor,
        keypair: Keypair,
        sender: SenderHandle<N>,
        msg_queue: Arc<MsgQueue>,
        storage: Sender<StorageCommand>,
        commit_log: CommittedLog<K>,
        sync_requests: Sender<SyncRequest>,
        validator: Arc<dyn ProposalValidator>,
        verify_pool: ThreadPool,
        event_publisher: Option<Sender<Event>>,
        configuration: Configuration,
    ) -> Pbft<N, K> {
        let block_validator =
            BlockValidator::new(state.clone(), validator.clone(), verify_pool.clone());
        let timer = ViewChangeTimer::new(
            configuration.consensus_timeout,
            configuration.change_cycle_cap,
        );
        Pbft {
            state,
            cache,
            keypair,
            sender,
            msg_queue,
            storage,
            commit_log,
            sync_requests,
            validator,
            block_validator,
            verify_pool,
            timer,
            event_publisher,
            configuration,
            pending_verifications: HashMap::new(),
            syncing_to: None,
            fatal: None,
        }
    }

    /// Start the worker thread.
    pub(crate) fn start(mut self, shutdown_signal: Receiver<()>) -> JoinHandle<()> {
        thread::Builder::new()
            .name("worker".to_string())
            .spawn(move || loop {
                match shutdown_signal.try_recv() {
                    Ok(()) => return,
                    Err(TryRecvError::Empty) => (),
                    Err(TryRecvError::Disconnected) => {
                        panic!("Worker thread disconnected from main thread")
                    }
                }

                if let Some(task) = self.msg_queue.try_pop(self.configuration.pop_wait) {
                    self.handle_task(task);
                }
                if self.timer.expired() {
                    self.on_timeout();
                }
                self.cache
                    .clear_expired_cache(&self.state, self.configuration.retain_window);
            })
            .unwrap()
    }

    fn handle_task(&mut self, task: WorkerTask) {
        if self.fatal.is_some() {
            // The engine stopped accepting new work; only the view change timer keeps running.
            if let WorkerTask::Submit { result_back, .. } = task {
                result_back(Err(SubmitError::Stopped));
            }
            return;
        }

        match task {
            WorkerTask::Remote(_, msg) => self.handle_msg(msg),
            WorkerTask::Submit {
                proposal,
                result_back,
            } => self.on_submit(proposal, result_back),
            WorkerTask::VerifyResult {
                index,
                view,
                verified,
            } => self.on_verify_result(index, view, verified),
            WorkerTask::FilledPrePrepare(pre_prepare) => {
                self.handle_pre_prepare(pre_prepare, false, true)
            }
            WorkerTask::SyncedCommitted(proposals) => self.on_synced_committed(proposals),
            WorkerTask::CheckpointFinalized {
                proposal,
                ledger_config,
            } => self.on_checkpoint_finalized(proposal, ledger_config),
            WorkerTask::Fatal(err) => self.enter_fatal(err),
        }
    }

    fn handle_msg(&mut self, msg: ConsensusMessage) {
        match msg {
            ConsensusMessage::PrePrepare(pre_prepare) => {
                self.handle_pre_prepare(pre_prepare, true, false)
            }
            ConsensusMessage::Vote(vote) => self.handle_vote(vote),
            ConsensusMessage::ViewChange(view_change) => self.handle_view_change(view_change),
            ConsensusMessage::NewView(new_view) => self.handle_new_view(new_view),
            ConsensusMessage::CommittedProposalRequest(request) => {
                self.on_committed_proposal_request(request)
            }
            ConsensusMessage::PreparedProposalRequest(request) => {
                self.on_prepared_proposal_request(request)
            }
            // Responses are routed to the log sync client by the poller.
            ConsensusMessage::CommittedProposalResponse(_)
            | ConsensusMessage::PreparedProposalResponse(_) => (),
        }
    }

    /* ↓↓↓ The three-phase voting protocol ↓↓↓ */

    fn handle_pre_prepare(&mut self, msg: PrePrepare, need_verify: bool, from_new_view: bool) {
        if !self.check_msg_state(msg.index, msg.view, msg.generated_from) {
            return;
        }
        if self.cache.exist_pre_prepare(&msg) {
            return;
        }
        if self.cache.conflict_with_precommit_req(&msg) {
            log::warn!(
                "rejecting pre-prepare at index {} view {}: conflicts with a precommitted decision",
                msg.index,
                msg.view
            );
            return;
        }

        if !from_new_view {
            let expected_leader = self.state.leader_at(msg.index, msg.view);
            if msg.generated_from != expected_leader {
                log::warn!(
                    "rejecting pre-prepare at index {} view {}: sender {} is not leader {}",
                    msg.index,
                    msg.view,
                    msg.generated_from,
                    expected_leader
                );
                return;
            }
            if !self.signature_is_correct(&msg, msg.generated_from) {
                log::warn!("rejecting pre-prepare with an invalid signature");
                return;
            }
        }

        if need_verify {
            self.pending_verifications
                .insert((msg.index, msg.view), msg.clone());
            spawn_verification(
                &self.verify_pool,
                self.validator.clone(),
                msg.proposal.clone(),
                msg.index,
                msg.view,
                self.msg_queue.clone(),
            );
            return;
        }

        let Some(my_index) = self.state.node_index() else {
            return;
        };
        if !self.cache.add_pre_prepare_cache(msg.clone()) {
            log::warn!(
                "equivocating pre-prepare at index {} view {} from {}",
                msg.index,
                msg.view,
                msg.generated_from
            );
            return;
        }
        if msg.generated_from != my_index {
            Event::ReceiveProposal(ReceiveProposalEvent {
                timestamp: SystemTime::now(),
                origin: msg.generated_from,
                pre_prepare: msg.clone(),
            })
            .publish(&self.event_publisher);
        }

        let prepare = Vote::new(
            &self.keypair,
            msg.view,
            msg.index,
            msg.proposal.hash,
            Phase::Prepare,
            my_index,
        );
        self.sender
            .broadcast(&ConsensusMessage::Vote(prepare.clone()));
        Event::Vote(VoteEvent {
            timestamp: SystemTime::now(),
            vote: prepare.clone(),
        })
        .publish(&self.event_publisher);
        self.cache.add_prepare_cache(prepare);

        self.try_pre_commit();
    }

    fn handle_vote(&mut self, vote: Vote) {
        if !self.check_msg_state(vote.index, vote.view, vote.generated_from) {
            return;
        }
        if Some(vote.generated_from) == self.state.node_index() {
            log::trace!("dropping own vote received over the network");
            return;
        }
        if self
            .cache
            .conflict_with_processed_req(vote.index, vote.view, &vote.proposal_hash)
        {
            log::warn!(
                "rejecting {:?} vote at index {} view {} from {}: conflicts with the cached \
                 pre-prepare",
                vote.phase,
                vote.index,
                vote.view,
                vote.generated_from
            );
            return;
        }
        if !self.signature_is_correct(&vote, vote.generated_from) {
            log::warn!("rejecting vote with an invalid signature");
            return;
        }

        Event::ReceiveVote(ReceiveVoteEvent {
            timestamp: SystemTime::now(),
            origin: vote.generated_from,
            vote: vote.clone(),
        })
        .publish(&self.event_publisher);

        match vote.phase {
            Phase::Prepare => {
                self.cache.add_prepare_cache(vote);
                self.try_pre_commit();
            }
            Phase::Commit => {
                self.cache.add_commit_req(vote);
                self.try_commit();
            }
        }
    }

    // Broadcast any commit votes that new prepare-quorums produced, then try to advance the
    // commit pipeline (the local commit vote may have completed a quorum).
    fn try_pre_commit(&mut self) {
        let commit_votes = self.cache.check_and_pre_commit(&self.state, &self.keypair);
        for vote in commit_votes {
            self.sender.broadcast(&ConsensusMessage::Vote(vote.clone()));
            Event::Vote(VoteEvent {
                timestamp: SystemTime::now(),
                vote,
            })
            .publish(&self.event_publisher);
        }
        self.try_commit();
    }

    fn try_commit(&mut self) {
        if let Some(proposal) = self.cache.check_and_commit(&self.state) {
            let _ = self.storage.send(StorageCommand::CommitProposal(proposal));
        }
    }

    fn on_verify_result(&mut self, index: ProposalIndex, view: ViewNumber, verified: bool) {
        let Some(pre_prepare) = self.pending_verifications.remove(&(index, view)) else {
            return;
        };
        // Generation check: the result is stale if a view change superseded the pre-prepare.
        if view < self.state.view() {
            return;
        }
        if verified {
            self.handle_pre_prepare(pre_prepare, false, false);
        }
    }

    fn on_submit(
        &mut self,
        proposal: Proposal,
        result_back: Box<dyn FnOnce(Result<(), SubmitError>) + Send>,
    ) {
        let Some(my_index) = self.state.node_index() else {
            result_back(Err(SubmitError::NotConsensusNode));
            return;
        };
        if proposal.index < self.state.progressed_index()
            || proposal.index >= self.state.high_water_mark()
        {
            result_back(Err(SubmitError::IndexOutOfRange));
            return;
        }
        let view = self.state.view();
        if self.state.leader_index(proposal.index) != my_index {
            result_back(Err(SubmitError::NotLeader));
            return;
        }

        let pre_prepare = PrePrepare::new(&self.keypair, view, my_index, proposal);
        result_back(Ok(()));
        Event::Propose(ProposeEvent {
            timestamp: SystemTime::now(),
            pre_prepare: pre_prepare.clone(),
        })
        .publish(&self.event_publisher);
        self.sender
            .broadcast(&ConsensusMessage::PrePrepare(pre_prepare.clone()));
        // The local proposal was built by our own block builder; no external verification round.
        self.handle_pre_prepare(pre_prepare, false, false);
    }

    /* ↓↓↓ View changes ↓↓↓ */

    fn on_timeout(&mut self) {
        if !self.state.is_consensus_node() {
            self.timer.restart();
            return;
        }
        let Some(my_index) = self.state.node_index() else {
            return;
        };

        self.state.inc_to_view(1);
        self.timer.inc_change_cycle();
        self.timer.restart();
        self.syncing_to = None;
        self.cache.remove_invalid_view_change(&self.state);

        Event::ViewTimeout(ViewTimeoutEvent {
            timestamp: SystemTime::now(),
            view: self.state.view(),
            to_view: self.state.to_view(),
        })
        .publish(&self.event_publisher);

        let view_change = ViewChange::new(
            &self.keypair,
            self.state.to_view(),
            my_index,
            self.state.committed_proposal(),
            self.cache.pre_commit_caches_without_data(),
        );
        self.sender
            .broadcast(&ConsensusMessage::ViewChange(view_change.clone()));
        Event::ViewChange(ViewChangeEvent {
            timestamp: SystemTime::now(),
            view_change: view_change.clone(),
        })
        .publish(&self.event_publisher);
        self.cache.add_view_change_req(view_change);

        self.try_new_view();
    }

    fn try_new_view(&mut self) {
        if let Some(new_view) = self.cache.check_and_try_into_new_view(&self.state, &self.keypair)
        {
            self.sender
                .broadcast(&ConsensusMessage::NewView(new_view.clone()));
            Event::NewView(NewViewEvent {
                timestamp: SystemTime::now(),
                new_view: new_view.clone(),
            })
            .publish(&self.event_publisher);
            self.re_handle_pre_prepare_proposals(&new_view);
        }
    }

    fn handle_view_change(&mut self, view_change: ViewChange) {
        if !self.is_valid_view_change(&view_change) {
            return;
        }
        // The sender has committed further than us: recover the gap before a new view forms.
        if view_change.committed_proposal.index > self.state.committed_index() {
            self.trigger_committed_sync(
                view_change.generated_from,
                view_change.committed_proposal.index,
            );
        }

        Event::ReceiveViewChange(ReceiveViewChangeEvent {
            timestamp: SystemTime::now(),
            origin: view_change.generated_from,
            view_change: view_change.clone(),
        })
        .publish(&self.event_publisher);
        self.cache.add_view_change_req(view_change);
        self.try_new_view();
    }

    fn is_valid_view_change(&self, view_change: &ViewChange) -> bool {
        let committed = self.state.committed_proposal();
        if view_change.committed_proposal.index < committed.index {
            log::debug!(
                "invalid view change from {}: committed index {} below ours",
                view_change.generated_from,
                view_change.committed_proposal.index
            );
            return false;
        }
        if view_change.committed_proposal.index == committed.index
            && view_change.committed_proposal.hash != committed.hash
        {
            log::warn!(
                "invalid view change from {}: conflicting committed proposal at index {}",
                view_change.generated_from,
                committed.index
            );
            return false;
        }
        if view_change.view <= self.state.view() {
            log::debug!(
                "invalid view change from {}: view {} not beyond ours",
                view_change.generated_from,
                view_change.view
            );
            return false;
        }
        let validator_set = self.state.validator_set();
        for prepared in &view_change.prepared_proposals {
            if !self.cache.check_precommit_msg(prepared, &validator_set) {
                log::warn!(
                    "invalid view change from {}: unverifiable prepared proposal at index {}",
                    view_change.generated_from,
                    prepared.index
                );
                return false;
            }
            if self.cache.conflicts_with_local_precommit(prepared) {
                log::warn!(
                    "invalid view change from {}: prepared proposal at index {} conflicts with \
                     the local precommit",
                    view_change.generated_from,
                    prepared.index
                );
                return false;
            }
        }
        if !self.signature_is_correct(view_change, view_change.generated_from) {
            log::warn!("invalid view change: bad signature");
            return false;
        }
        true
    }

    fn handle_new_view(&mut self, new_view: NewView) {
        if !self.is_valid_new_view(&new_view) {
            return;
        }
        Event::ReceiveNewView(ReceiveNewViewEvent {
            timestamp: SystemTime::now(),
            origin: new_view.generated_from,
            new_view: new_view.clone(),
        })
        .publish(&self.event_publisher);

        // If the quorum committed further than us, catch up; the reissued pre-prepares above our
        // progressed index will wait in the caches meanwhile.
        if let Some(base) = new_view
            .view_changes
            .iter()
            .map(|vc| vc.committed_proposal.index)
            .max()
        {
            if base > self.state.committed_index() {
                self.trigger_committed_sync(new_view.generated_from, base);
            }
        }

        self.re_handle_pre_prepare_proposals(&new_view);
    }

    fn is_valid_new_view(&self, new_view: &NewView) -> bool {
        if new_view.view <= self.state.view() {
            log::debug!("invalid new view: view {} not beyond ours", new_view.view);
            return false;
        }
        let expected_leader = self
            .state
            .leader_at(self.state.progressed_index(), new_view.view);
        if new_view.generated_from != expected_leader {
            log::warn!(
                "invalid new view: sender {} is not the expected leader {}",
                new_view.generated_from,
                expected_leader
            );
            return false;
        }
        if !self.signature_is_correct(new_view, new_view.generated_from) {
            log::warn!("invalid new view: bad signature");
            return false;
        }

        let validator_set = self.state.validator_set();
        let mut weight = TotalWeight::new(0);
        let mut counted: Vec<ReplicaIndex> = Vec::new();
        for view_change in &new_view.view_changes {
            if view_change.view != new_view.view {
                log::warn!("invalid new view: embedded view change targets a different view");
                return false;
            }
            if !self.is_valid_view_change(view_change) {
                log::warn!("invalid new view: embedded view change fails validation");
                return false;
            }
            if counted.contains(&view_change.generated_from) {
                continue;
            }
            if let Some(w) = validator_set.weight_of_index(view_change.generated_from) {
                counted.push(view_change.generated_from);
                weight += w;
            }
        }
        if weight < self.state.min_required_quorum() {
            log::warn!("invalid new view: justification below quorum");
            return false;
        }

        // The reissued pre-prepares must be exactly the deterministic selection over the
        // aggregated view changes.
        let expected = select_new_view_proposals(&new_view.view_changes);
        if new_view.pre_prepares.len() != expected.len() {
            log::warn!("invalid new view: unexpected pre-prepare list length");
            return false;
        }
        for (pre_prepare, (index, prepared)) in new_view.pre_prepares.iter().zip(expected) {
            let expected_hash = prepared.map_or(empty_hash(), |p| p.hash);
            if pre_prepare.index != index
                || pre_prepare.view != new_view.view
                || pre_prepare.proposal.hash != expected_hash
            {
                log::warn!("invalid new view: pre-prepare list deviates from the selection rule");
                return false;
            }
        }
        true
    }

    fn re_handle_pre_prepare_proposals(&mut self, new_view: &NewView) {
        for pre_prepare in &new_view.pre_prepares {
            let mut pre_prepare = pre_prepare.clone();

            if pre_prepare.proposal.is_empty_block() {
                self.handle_pre_prepare(pre_prepare, false, true);
                continue;
            }
            if self.cache.try_to_fill_proposal(&mut pre_prepare) {
                self.handle_pre_prepare(pre_prepare, false, true);
                continue;
            }

            // The data is not cached locally; recover it from a node whose view change certified
            // the proposal, falling back to the new leader.
            let provider = new_view
                .view_changes
                .iter()
                .find(|vc| {
                    vc.prepared_proposals
                        .iter()
                        .any(|p| p.index == pre_prepare.index && p.hash == pre_prepare.proposal.hash)
                })
                .map(|vc| vc.generated_from)
                .filter(|provider| Some(*provider) != self.state.node_index())
                .unwrap_or(new_view.generated_from);
            let _ = self.sync_requests.send(SyncRequest::PrecommitData {
                from: provider,
                pre_prepare,
            });
        }
        self.reach_new_view(new_view.view);
    }

    fn reach_new_view(&mut self, view: ViewNumber) {
        self.timer.reset_change_cycle();
        self.timer.restart();
        self.state.set_view(view);
        self.state.set_to_view(view + 1);
        Event::StartView(StartViewEvent {
            timestamp: SystemTime::now(),
            view,
        })
        .publish(&self.event_publisher);
    }

    /* ↓↓↓ Log sync ↓↓↓ */

    fn trigger_committed_sync(&mut self, from: ReplicaIndex, target: ProposalIndex) {
        if self.syncing_to.is_some_and(|t| t >= target) {
            return;
        }
        let start = self.state.progressed_index();
        let offset = target - self.state.committed_index();
        self.syncing_to = Some(target);
        let _ = self.sync_requests.send(SyncRequest::CommittedProposals {
            from,
            start,
            offset,
        });
    }

    fn on_committed_proposal_request(&mut self, request: CommittedProposalRequest) {
        if !self.signature_is_correct(&request, request.generated_from) {
            return;
        }
        Event::ReceiveSyncRequest(ReceiveSyncRequestEvent {
            timestamp: SystemTime::now(),
            peer: request.generated_from,
            start: request.start,
            offset: request.offset,
        })
        .publish(&self.event_publisher);

        let proposals = self
            .commit_log
            .proposals_in_range(request.start, request.offset.min(MAX_SYNC_BATCH));
        if proposals.is_empty() {
            return;
        }
        let Some(my_index) = self.state.node_index() else {
            return;
        };
        let count = proposals.len();
        let response = ConsensusMessage::CommittedProposalResponse(CommittedProposalResponse::new(
            &self.keypair,
            proposals,
            my_index,
        ));
        self.sender
            .send_to_index(&self.state, request.generated_from, &response);
        Event::SendSyncResponse(SendSyncResponseEvent {
            timestamp: SystemTime::now(),
            peer: request.generated_from,
            start: request.start,
            proposals: count,
        })
        .publish(&self.event_publisher);
    }

    fn on_prepared_proposal_request(&mut self, request: PreparedProposalRequest) {
        if !self.signature_is_correct(&request, request.generated_from) {
            return;
        }
        let Some(proposal) = self
            .cache
            .precommit_with_data(request.index, &request.proposal_hash)
        else {
            return;
        };
        let Some(my_index) = self.state.node_index() else {
            return;
        };
        let response = ConsensusMessage::PreparedProposalResponse(PreparedProposalResponse::new(
            &self.keypair,
            proposal,
            my_index,
        ));
        self.sender
            .send_to_index(&self.state, request.generated_from, &response);
    }

    fn on_synced_committed(&mut self, proposals: Vec<Proposal>) {
        for proposal in proposals {
            let next = self.cache.next_dispatch_index(&self.state);
            if proposal.index < next {
                continue;
            }
            if proposal.index > next {
                break;
            }
            if !self.block_validator.check(&proposal) {
                break;
            }
            self.cache.mark_dispatched(proposal.index);
            let _ = self.storage.send(StorageCommand::CommitProposal(proposal));
        }
    }

    /* ↓↓↓ Commit pipeline ↓↓↓ */

    fn on_checkpoint_finalized(&mut self, proposal: Proposal, ledger_config: LedgerConfig) {
        let index = proposal.index;
        let hash = proposal.hash;
        self.state.set_committed_proposal(proposal);
        self.cache.on_checkpoint_finalized(index);

        if ledger_config.validator_set != self.state.validator_set() {
            log::info!("consensus node set changed at index {}", index);
            self.state
                .reset_validator_set(ledger_config.validator_set.clone());
        }

        self.timer.reset_change_cycle();
        self.timer.restart();
        if self
            .syncing_to
            .is_some_and(|target| self.state.committed_index() >= target)
        {
            self.syncing_to = None;
        }

        Event::CommitProposal(CommitProposalEvent {
            timestamp: SystemTime::now(),
            index,
            hash,
        })
        .publish(&self.event_publisher);

        // The next index may already hold a commit quorum.
        self.try_commit();
    }

    fn enter_fatal(&mut self, err: FatalError) {
        log::error!("engine entering fatal state: {}", err);
        self.fatal = Some(err);
    }

    /* ↓↓↓ Shared validation ↓↓↓ */

    // Reject messages below the progressed index (silently; they are stale), at or beyond the
    // high water mark (bounding memory, and evidence that the quorum is ahead of us), or from a
    // view below ours.
    fn check_msg_state(&mut self, index: ProposalIndex, view: ViewNumber, origin: ReplicaIndex) -> bool {
        if index < self.state.progressed_index() {
            return false;
        }
        if index >= self.state.high_water_mark() {
            self.trigger_committed_sync(origin, index.saturating_sub(1));
            return false;
        }
        if view < self.state.view() {
            return false;
        }
        true
    }

    fn signature_is_correct<M: SignedMessage>(&self, msg: &M, from: ReplicaIndex) -> bool {
        self.state
            .validator_set()
            .by_index(from)
            .is_some_and(|pk| msg.is_correct(pk))
    }
}
