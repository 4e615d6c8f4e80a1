/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that build and start a replica, as well as [the type](Replica) which keeps the
//! replica alive.
//!
//! This crate replicates a totally-ordered log of proposals across a known set of processes. In
//! our terminology these processes are 'replicas'; the replicas that vote in consensus are
//! 'consensus nodes', and each is uniquely identified by an Ed25519 public key. Replicas outside
//! the consensus node set may still run the engine to follow committed state, but their messages
//! are ignored by consensus nodes.
//!
//! ## Building a replica
//!
//! Collect the externally-provided pieces in a [`ReplicaSpec`]: the signing key, a
//! [`Network`](crate::networking::Network) provider, a [`KVStore`](crate::storage::KVStore) for
//! durable checkpoints, the external [`Ledger`](crate::storage::Ledger) and
//! [`ProposalValidator`](crate::validator::ProposalValidator), a
//! [`Configuration`](crate::config::Configuration), and optional event handlers. Then call
//! [`start`](ReplicaSpec::start).
//!
//! Dropping the returned [`Replica`] shuts the engine down: the worker drains its current task,
//! and in-flight asynchronous callbacks observe a closed engine and no-op.

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use threadpool::ThreadPool;

use crate::config::Configuration;
use crate::event_bus::{start_event_bus, EventHandlers, HandlerPtr};
use crate::events::*;
use crate::log_sync::LogSyncClient;
use crate::msg_queue::{MsgQueue, WorkerTask};
use crate::networking::receiving::start_polling;
use crate::networking::sending::SenderHandle;
use crate::networking::Network;
use crate::pbft::cache::CacheProcessor;
use crate::pbft::protocol::Pbft;
use crate::pbft::state::ConsensusState;
use crate::storage::{
    CommittedLog, FinalizeHandler, KVStore, Ledger, LedgerStorage, NotifyHandler,
    ResetConfigHandler, StorageCommand,
};
use crate::types::crypto_primitives::{Keypair, SigningKey};
use crate::types::data_types::{CryptoHash, ProposalData, ProposalIndex, ViewNumber};
use crate::types::proposal::Proposal;
use crate::validator::{BlockValidator, ProposalValidator};

/// Number of threads in the pool that runs asynchronous proposal verification.
const VERIFY_POOL_SIZE: usize = 4;

/// Ways a submitted proposal can be rejected before entering consensus.
#[derive(Debug, PartialEq, Eq)]
pub enum SubmitError {
    /// The local node is not the leader of the proposal's index under the current view.
    NotLeader,
    /// The local node is not in the consensus node set.
    NotConsensusNode,
    /// The proposal's index is already decided or beyond the high water mark.
    IndexOutOfRange,
    /// The engine has stopped.
    Stopped,
}

/// Everything needed to start a replica.
pub struct ReplicaSpec<K: KVStore, N: Network, L: Ledger, V: ProposalValidator> {
    keypair: SigningKey,
    network: N,
    kv_store: K,
    ledger: L,
    proposal_validator: V,
    configuration: Configuration,

    on_commit_proposal: Option<HandlerPtr<CommitProposalEvent>>,
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    on_vote: Option<HandlerPtr<VoteEvent>>,
    on_view_change: Option<HandlerPtr<ViewChangeEvent>>,
    on_new_view: Option<HandlerPtr<NewViewEvent>>,
    on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    on_receive_vote: Option<HandlerPtr<ReceiveVoteEvent>>,
    on_receive_view_change: Option<HandlerPtr<ReceiveViewChangeEvent>>,
    on_receive_new_view: Option<HandlerPtr<ReceiveNewViewEvent>>,
    on_start_view: Option<HandlerPtr<StartViewEvent>>,
    on_view_timeout: Option<HandlerPtr<ViewTimeoutEvent>>,
    on_receive_sync_request: Option<HandlerPtr<ReceiveSyncRequestEvent>>,
    on_send_sync_response: Option<HandlerPtr<SendSyncResponseEvent>>,

    on_finalize: Option<FinalizeHandler>,
    on_reset_config: Option<ResetConfigHandler>,
    on_notify: Option<NotifyHandler>,
}

impl<K: KVStore, N: Network, L: Ledger, V: ProposalValidator> ReplicaSpec<K, N, L, V> {
    pub fn new(
        keypair: SigningKey,
        network: N,
        kv_store: K,
        ledger: L,
        proposal_validator: V,
        configuration: Configuration,
    ) -> ReplicaSpec<K, N, L, V> {
        ReplicaSpec {
            keypair,
            network,
            kv_store,
            ledger,
            proposal_validator,
            configuration,
            on_commit_proposal: None,
            on_propose: None,
            on_vote: None,
            on_view_change: None,
            on_new_view: None,
            on_receive_proposal: None,
            on_receive_vote: None,
            on_receive_view_change: None,
            on_receive_new_view: None,
            on_start_view: None,
            on_view_timeout: None,
            on_receive_sync_request: None,
            on_send_sync_response: None,
            on_finalize: None,
            on_reset_config: None,
            on_notify: None,
        }
    }

    pub fn on_commit_proposal(
        mut self,
        handler: impl Fn(&CommitProposalEvent) + Send + 'static,
    ) -> Self {
        self.on_commit_proposal = Some(Box::new(handler));
        self
    }

    pub fn on_propose(mut self, handler: impl Fn(&ProposeEvent) + Send + 'static) -> Self {
        self.on_propose = Some(Box::new(handler));
        self
    }

    pub fn on_vote(mut self, handler: impl Fn(&VoteEvent) + Send + 'static) -> Self {
        self.on_vote = Some(Box::new(handler));
        self
    }

    pub fn on_view_change(mut self, handler: impl Fn(&ViewChangeEvent) + Send + 'static) -> Self {
        self.on_view_change = Some(Box::new(handler));
        self
    }

    pub fn on_new_view(mut self, handler: impl Fn(&NewViewEvent) + Send + 'static) -> Self {
        self.on_new_view = Some(Box::new(handler));
        self
    }

    pub fn on_receive_proposal(
        mut self,
        handler: impl Fn(&ReceiveProposalEvent) + Send + 'static,
    ) -> Self {
        self.on_receive_proposal = Some(Box::new(handler));
        self
    }

    pub fn on_receive_vote(
        mut self,
        handler: impl Fn(&ReceiveVoteEvent) + Send + 'static,
    ) -> Self {
        self.on_receive_vote = Some(Box::new(handler));
        self
    }

    pub fn on_receive_view_change(
        mut self,
        handler: impl Fn(&ReceiveViewChangeEvent) + Send + 'static,
    ) -> Self {
        self.on_receive_view_change = Some(Box::new(handler));
        self
    }

    pub fn on_receive_new_view(
        mut self,
        handler: impl Fn(&ReceiveNewViewEvent) + Send + 'static,
    ) -> Self {
        self.on_receive_new_view = Some(Box::new(handler));
        self
    }

    pub fn on_start_view(mut self, handler: impl Fn(&StartViewEvent) + Send + 'static) -> Self {
        self.on_start_view = Some(Box::new(handler));
        self
    }

    pub fn on_view_timeout(
        mut self,
        handler: impl Fn(&ViewTimeoutEvent) + Send + 'static,
    ) -> Self {
        self.on_view_timeout = Some(Box::new(handler));
        self
    }

    pub fn on_receive_sync_request(
        mut self,
        handler: impl Fn(&ReceiveSyncRequestEvent) + Send + 'static,
    ) -> Self {
        self.on_receive_sync_request = Some(Box::new(handler));
        self
    }

    pub fn on_send_sync_response(
        mut self,
        handler: impl Fn(&SendSyncResponseEvent) + Send + 'static,
    ) -> Self {
        self.on_send_sync_response = Some(Box::new(handler));
        self
    }

    /// Register a handler fired with the ledger's configuration after every finalized checkpoint.
    pub fn on_finalize(mut self, handler: impl Fn(&crate::storage::LedgerConfig) + Send + 'static) -> Self {
        self.on_finalize = Some(Box::new(handler));
        self
    }

    /// Register a handler fired when a finalized checkpoint changed the consensus node set.
    pub fn on_reset_config(
        mut self,
        handler: impl Fn(&crate::storage::LedgerConfig) + Send + 'static,
    ) -> Self {
        self.on_reset_config = Some(Box::new(handler));
        self
    }

    /// Register a handler fired with every executed proposal, for downstream consumers.
    pub fn on_notify(mut self, handler: impl Fn(&Proposal) + Send + 'static) -> Self {
        self.on_notify = Some(Box::new(handler));
        self
    }

    /// Start the replica: recover durable state, wire the threads up, and begin participating in
    /// consensus.
    ///
    /// # Panics
    ///
    /// Panics if the external ledger cannot report its configuration, since a replica cannot make
    /// any decision without knowing the consensus node set.
    pub fn start(mut self) -> Replica {
        let keypair = Keypair::new(self.keypair);
        let my_key = keypair.public();
        let configuration = self.configuration.clone();

        let ledger_config = self
            .ledger
            .config()
            .expect("Could not read the initial configuration from the ledger.");

        // Recover the committed frontier: the durable commit log may be ahead of the ledger if we
        // stopped between committing and executing.
        let commit_log = CommittedLog::new(self.kv_store.clone());
        let stable_index = ledger_config.latest_index;
        let committed_index = commit_log.max_committed_proposal_index().max(stable_index);
        let committed_proposal = commit_log
            .proposal(committed_index)
            .or_else(|| self.ledger.block(committed_index).ok().flatten())
            .map(|p| p.without_data())
            .unwrap_or_else(Proposal::genesis);

        let state = ConsensusState::new(
            my_key,
            ledger_config.validator_set.clone(),
            committed_proposal,
            configuration.water_mark_window,
        );
        let msg_queue = Arc::new(MsgQueue::new(configuration.msg_queue_capacity));
        let proposal_validator: Arc<dyn ProposalValidator> = Arc::new(self.proposal_validator);
        let verify_pool = ThreadPool::with_name("verify".to_string(), VERIFY_POOL_SIZE);

        // Event bus, started only if any handler is registered or event logging is enabled.
        let event_handlers = EventHandlers::new(
            configuration.log_events,
            self.on_commit_proposal.take(),
            self.on_propose.take(),
            self.on_vote.take(),
            self.on_view_change.take(),
            self.on_new_view.take(),
            self.on_receive_proposal.take(),
            self.on_receive_vote.take(),
            self.on_receive_view_change.take(),
            self.on_receive_new_view.take(),
            self.on_start_view.take(),
            self.on_view_timeout.take(),
            self.on_receive_sync_request.take(),
            self.on_send_sync_response.take(),
        );
        let (event_publisher, event_bus, event_bus_shutdown) = if event_handlers.is_empty() {
            (None, None, None)
        } else {
            let (event_publisher, event_subscriber) = mpsc::channel();
            let (shutdown, shutdown_receiver) = mpsc::channel();
            let event_bus = start_event_bus(event_handlers, event_subscriber, shutdown_receiver);
            (Some(event_publisher), Some(event_bus), Some(shutdown))
        };

        self.network
            .init_validator_set(ledger_config.validator_set.clone());

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, sync_responses) = start_polling(
            self.network.clone(),
            state.clone(),
            msg_queue.clone(),
            poller_shutdown_receiver,
        );

        let (storage_sender, storage_receiver) = mpsc::channel();
        let ledger_storage = LedgerStorage::new(
            self.kv_store.clone(),
            self.ledger,
            storage_receiver,
            msg_queue.clone(),
            self.on_finalize.take(),
            self.on_reset_config.take(),
            self.on_notify.take(),
            configuration.retain_window,
        );
        let storage = ledger_storage.start();

        let (sync_request_sender, sync_request_receiver) = mpsc::channel();
        let log_sync_client = LogSyncClient::new(
            keypair.clone(),
            state.clone(),
            sync_request_receiver,
            sync_responses,
            SenderHandle::new(self.network.clone()),
            msg_queue.clone(),
            configuration.max_sync_retries,
            configuration.sync_response_timeout,
        )
        .start();

        // Seed the precommit cache from the durable commit log and re-drive execution of
        // proposals that were committed by consensus but not yet executed by the ledger.
        let mut cache = CacheProcessor::new();
        let recovered = commit_log.load_state(stable_index);
        if let Some(last) = recovered.last() {
            cache.mark_dispatched(last.index);
        }
        cache.seed_precommits(recovered.clone());
        for proposal in recovered {
            let _ = storage_sender.send(StorageCommand::CommitProposal(proposal));
        }

        let block_validator = BlockValidator::new(
            state.clone(),
            proposal_validator.clone(),
            verify_pool.clone(),
        );

        let pbft = Pbft::new(
            state.clone(),
            cache,
            keypair,
            SenderHandle::new(self.network),
            msg_queue.clone(),
            storage_sender,
            commit_log,
            sync_request_sender,
            proposal_validator,
            verify_pool,
            event_publisher,
            configuration,
        );
        let (worker_shutdown, worker_shutdown_receiver) = mpsc::channel();
        let worker = pbft.start(worker_shutdown_receiver);

        Replica {
            state,
            msg_queue,
            block_validator,
            worker: Some(worker),
            worker_shutdown,
            storage: Some(storage),
            log_sync_client: Some(log_sync_client),
            poller: Some(poller),
            poller_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// A handle that keeps a running replica alive. Dropping it shuts the replica down.
pub struct Replica {
    state: ConsensusState,
    msg_queue: Arc<MsgQueue>,
    block_validator: BlockValidator,
    worker: Option<JoinHandle<()>>,
    worker_shutdown: Sender<()>,
    storage: Option<JoinHandle<()>>,
    log_sync_client: Option<JoinHandle<()>>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl Replica {
    /// Submit a candidate block for consensus at `index`. The local node must lead `index` under
    /// the current view; otherwise `on_submitted` observes [`SubmitError::NotLeader`].
    ///
    /// `on_submitted` observing `Ok(())` means the proposal was accepted and broadcast, not that
    /// it has committed; commitment is observable through the
    /// [commit event](crate::events::CommitProposalEvent) or a ledger handler.
    pub fn submit_proposal(
        &self,
        data: ProposalData,
        index: ProposalIndex,
        hash: CryptoHash,
        on_submitted: impl FnOnce(Result<(), SubmitError>) + Send + 'static,
    ) {
        self.msg_queue.push(WorkerTask::Submit {
            proposal: Proposal::new(index, hash, data),
            result_back: Box::new(on_submitted),
        });
    }

    /// The current active view.
    pub fn view(&self) -> ViewNumber {
        self.state.view()
    }

    /// The highest committed (and ledger-acknowledged) index.
    pub fn committed_index(&self) -> ProposalIndex {
        self.state.committed_index()
    }

    /// The validator façade that external sync modules use to check blocks arriving outside of
    /// consensus.
    pub fn block_validator(&self) -> &BlockValidator {
        &self.block_validator
    }
}

impl Drop for Replica {
    fn drop(&mut self) {
        // The order of thread shutdown matters: the worker holds the senders that the ledger
        // storage and log sync client threads block on, so it goes down first and the others
        // observe their channels closing. The poller must outlive the log sync client, which
        // consumes its response channel.
        let _ = self.worker_shutdown.send(());
        let _ = self.worker.take().unwrap().join();

        let _ = self.storage.take().unwrap().join();
        let _ = self.log_sync_client.take().unwrap().join();

        let _ = self.poller_shutdown.send(());
        let _ = self.poller.take().unwrap().join();

        if let Some(shutdown) = &self.event_bus_shutdown {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }
    }
}
