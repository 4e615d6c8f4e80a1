/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Durable checkpointing of committed proposals, and their execution by the external ledger.
//!
//! ## Pluggable persistence
//!
//! Like networking, persistence is pluggable: the library user provides an implementation of
//! [`KVStore`], and the engine stores committed proposals in the `pbftCommitDB` key space together
//! with the scalar `max_committed_proposal`. On startup, [`CommittedLog::load_state`] replays the
//! entries above the ledger's persisted head to seed the precommit cache and re-drive execution of
//! proposals that were committed by consensus but not yet executed when the process stopped.
//!
//! ## The checkpoint pipeline
//!
//! [`LedgerStorage`] runs its own thread and consumes [`StorageCommand`]s strictly in order, which
//! gives the ledger an in-order, at-most-once view of commits. Per proposal it:
//! 1. Durably records the proposal (idempotently: replaying an identical (index, hash) is a no-op,
//!    a different hash is a fatal inconsistency), then
//! 2. Hands the proposal to the external [`Ledger`] for execution, retrying transient failures
//!    with bounded backoff, and on acknowledgement fires the finalize / reset-config / notify
//!    handlers, garbage-collects stable entries, and posts
//!    [`WorkerTask::CheckpointFinalized`](crate::msg_queue::WorkerTask) back to the worker.
//!
//! Only that acknowledgement advances the engine's committed index. Permanent ledger failures and
//! state regressions are surfaced as [`FatalError`]s, which stop the engine.

use std::fmt::{self, Display, Formatter};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::msg_queue::{MsgQueue, WorkerTask};
use crate::types::data_types::ProposalIndex;
use crate::types::proposal::Proposal;
use crate::types::validator_set::ValidatorSet;

/// The key space under which committed proposals are stored, keyed by index.
pub const COMMIT_DB: [u8; 13] = *b"pbftCommitDB/";

/// The key under which the highest durably committed index is stored.
pub const MAX_COMMITTED_PROPOSAL: [u8; 22] = *b"max_committed_proposal";

pub(crate) fn proposal_key(index: ProposalIndex) -> Vec<u8> {
    let mut key = COMMIT_DB.to_vec();
    key.extend_from_slice(&index.to_le_bytes());
    key
}

/* ↓↓↓ Pluggable persistence ↓↓↓ */

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;

    fn write(&mut self, wb: Self::WriteBatch);
    fn clear(&mut self);
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /* ↓↓↓ Committed proposals ↓↓↓ */

    fn committed_proposal(
        &self,
        index: ProposalIndex,
    ) -> Result<Option<Proposal>, KVGetError> {
        if let Some(bytes) = self.get(&proposal_key(index)) {
            Ok(Some(Proposal::deserialize(&mut &*bytes).map_err(|err| {
                KVGetError::DeserializeValueError {
                    key: Key::CommittedProposal { index },
                    source: err,
                }
            })?))
        } else {
            Ok(None)
        }
    }

    /* ↓↓↓ Max committed proposal ↓↓↓ */

    fn max_committed_proposal_index(&self) -> Result<ProposalIndex, KVGetError> {
        if let Some(bytes) = self.get(&MAX_COMMITTED_PROPOSAL) {
            ProposalIndex::deserialize(&mut &*bytes).map_err(|err| {
                KVGetError::DeserializeValueError {
                    key: Key::MaxCommittedProposal,
                    source: err,
                }
            })
        } else {
            Ok(ProposalIndex::new(0))
        }
    }
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

/// Error when trying to read a value corresponding to a given key from the
/// [key value store][KVStore].
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError { key: Key, source: std::io::Error },
}

#[derive(Debug)]
pub enum Key {
    CommittedProposal { index: ProposalIndex },
    MaxCommittedProposal,
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self {
            Key::CommittedProposal { index } => {
                write!(f, "Committed Proposal at index {}", index)
            }
            Key::MaxCommittedProposal => write!(f, "Max Committed Proposal"),
        }
    }
}

/* ↓↓↓ The external ledger ↓↓↓ */

/// The external ledger that executes and persists committed proposals.
///
/// Implementations are driven from the ledger storage thread only, so calls are serialized.
pub trait Ledger: Send + 'static {
    /// Execute `proposal` and persist the resulting block, returning the ledger's configuration
    /// after the commit. Re-committing a proposal at or below the persisted head must be a no-op
    /// that returns the current configuration.
    fn commit_block(&mut self, proposal: &Proposal) -> Result<LedgerConfig, LedgerError>;

    /// Get the block persisted at `index`, if any.
    fn block(&self, index: ProposalIndex) -> Result<Option<Proposal>, LedgerError>;

    /// The ledger's current configuration.
    fn config(&self) -> Result<LedgerConfig, LedgerError>;
}

/// The ledger's view of chain parameters that consensus depends on.
#[derive(Clone)]
pub struct LedgerConfig {
    /// The consensus node set and weights in force after the latest block.
    pub validator_set: ValidatorSet,
    /// The index of the latest executed and persisted block.
    pub latest_index: ProposalIndex,
}

/// Failures reported by [`Ledger`] implementations.
#[derive(Debug)]
pub enum LedgerError {
    /// The operation may succeed if retried.
    Transient(String),
    /// The operation will not succeed no matter how often it is retried.
    Permanent(String),
}

/// Unrecoverable conditions that stop the engine.
#[derive(Debug)]
pub enum FatalError {
    /// The ledger permanently failed to execute a committed proposal.
    LedgerFailure(String),
    /// The ledger reported a head below an index the engine knows to be committed.
    StateRegression {
        ledger: ProposalIndex,
        committed: ProposalIndex,
    },
    /// The durable store holds a different proposal under an index that was replayed.
    InconsistentCommit { index: ProposalIndex },
}

impl Display for FatalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::LedgerFailure(msg) => write!(f, "ledger permanently failed: {}", msg),
            FatalError::StateRegression { ledger, committed } => write!(
                f,
                "ledger head {} is below the known committed index {}",
                ledger, committed
            ),
            FatalError::InconsistentCommit { index } => write!(
                f,
                "a conflicting proposal is durably stored at committed index {}",
                index
            ),
        }
    }
}

/* ↓↓↓ Read side ↓↓↓ */

/// Read-only handle over the durable commit log. Cheap to clone; used by the worker to serve
/// committed-proposal sync requests and to recover state on startup.
#[derive(Clone)]
pub(crate) struct CommittedLog<K: KVStore> {
    kv: K,
}

impl<K: KVStore> CommittedLog<K> {
    pub(crate) fn new(kv: K) -> CommittedLog<K> {
        CommittedLog { kv }
    }

    pub(crate) fn max_committed_proposal_index(&self) -> ProposalIndex {
        self.kv
            .max_committed_proposal_index()
            .unwrap_or(ProposalIndex::new(0))
    }

    pub(crate) fn proposal(&self, index: ProposalIndex) -> Option<Proposal> {
        self.kv.committed_proposal(index).ok().flatten()
    }

    /// The committed proposals in `[start, start + offset)`, stopping at the first gap.
    pub(crate) fn proposals_in_range(&self, start: ProposalIndex, offset: u64) -> Vec<Proposal> {
        let mut proposals = Vec::new();
        for i in 0..offset {
            match self.proposal(start + i) {
                Some(proposal) => proposals.push(proposal),
                None => break,
            }
        }
        proposals
    }

    /// Read the proposals with index greater than `stable_index` from the durable store. Called
    /// once on startup to seed the precommit cache and re-drive unexecuted checkpoints.
    pub(crate) fn load_state(&self, stable_index: ProposalIndex) -> Vec<Proposal> {
        let max = self.max_committed_proposal_index();
        let mut proposals = Vec::new();
        let mut index = stable_index + 1;
        while index <= max {
            if let Some(proposal) = self.proposal(index) {
                proposals.push(proposal);
            }
            index += 1;
        }
        proposals
    }
}

/* ↓↓↓ Write side ↓↓↓ */

pub(crate) enum StorageCommand {
    CommitProposal(Proposal),
}

/// Handler fired with the ledger's configuration after every finalized checkpoint.
pub type FinalizeHandler = Box<dyn Fn(&LedgerConfig) + Send>;
/// Handler fired when a finalized checkpoint changed the consensus node set.
pub type ResetConfigHandler = Box<dyn Fn(&LedgerConfig) + Send>;
/// Handler fired with every executed proposal, for downstream consumers.
pub type NotifyHandler = Box<dyn Fn(&Proposal) + Send>;

const LEDGER_RETRIES: u32 = 5;
const LEDGER_BACKOFF_BASE: Duration = Duration::from_millis(100);

pub(crate) struct LedgerStorage<K: KVStore, L: Ledger> {
    kv: K,
    ledger: L,
    commands: Receiver<StorageCommand>,
    msg_queue: Arc<MsgQueue>,
    finalize_handler: Option<FinalizeHandler>,
    reset_config_handler: Option<ResetConfigHandler>,
    notify_handler: Option<NotifyHandler>,
    // Entries this far below the ledger's persisted head stay around to serve committed-proposal
    // sync requests; only older ones are garbage-collected.
    retain_window: u64,
    last_validator_set: Option<ValidatorSet>,
    last_pruned: ProposalIndex,
}

impl<K: KVStore, L: Ledger> LedgerStorage<K, L> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        kv: K,
        ledger: L,
        commands: Receiver<StorageCommand>,
        msg_queue: Arc<MsgQueue>,
        finalize_handler: Option<FinalizeHandler>,
        reset_config_handler: Option<ResetConfigHandler>,
        notify_handler: Option<NotifyHandler>,
        retain_window: u64,
    ) -> LedgerStorage<K, L> {
        LedgerStorage {
            kv,
            ledger,
            commands,
            msg_queue,
            finalize_handler,
            reset_config_handler,
            notify_handler,
            retain_window,
            last_validator_set: None,
            last_pruned: ProposalIndex::new(0),
        }
    }

    /// Start the storage thread. It exits when every command sender has been dropped.
    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("ledger_storage".to_string())
            .spawn(move || {
                while let Ok(StorageCommand::CommitProposal(proposal)) = self.commands.recv() {
                    if let Err(fatal) = self.commit(proposal) {
                        log::error!("ledger storage stopping: {}", fatal);
                        self.msg_queue.push(WorkerTask::Fatal(fatal));
                        return;
                    }
                }
            })
            .unwrap()
    }

    fn commit(&mut self, proposal: Proposal) -> Result<(), FatalError> {
        self.commit_proposal(&proposal)?;
        self.commit_stable_checkpoint(proposal)
    }

    /// Durably record `proposal` under its index and bump `max_committed_proposal`.
    fn commit_proposal(&mut self, proposal: &Proposal) -> Result<(), FatalError> {
        if let Ok(Some(existing)) = self.kv.committed_proposal(proposal.index) {
            if existing.hash == proposal.hash {
                // Replay of an already-committed proposal.
                return Ok(());
            }
            return Err(FatalError::InconsistentCommit {
                index: proposal.index,
            });
        }

        let max = self
            .kv
            .max_committed_proposal_index()
            .unwrap_or(ProposalIndex::new(0))
            .max(proposal.index);

        let mut wb = K::WriteBatch::new();
        wb.set(
            &proposal_key(proposal.index),
            &proposal.try_to_vec().unwrap(),
        );
        wb.set(&MAX_COMMITTED_PROPOSAL, &max.try_to_vec().unwrap());
        self.kv.write(wb);
        Ok(())
    }

    /// Hand `proposal` to the external ledger for execution and block persistence, then fire the
    /// configured handlers and acknowledge the checkpoint to the worker.
    fn commit_stable_checkpoint(&mut self, proposal: Proposal) -> Result<(), FatalError> {
        let mut attempt = 0;
        let config = loop {
            match self.ledger.commit_block(&proposal) {
                Ok(config) => break config,
                Err(LedgerError::Transient(reason)) => {
                    attempt += 1;
                    if attempt > LEDGER_RETRIES {
                        return Err(FatalError::LedgerFailure(reason));
                    }
                    log::warn!(
                        "transient ledger failure committing index {}, retrying: {}",
                        proposal.index,
                        reason
                    );
                    thread::sleep(LEDGER_BACKOFF_BASE * 2u32.pow(attempt - 1));
                }
                Err(LedgerError::Permanent(reason)) => {
                    return Err(FatalError::LedgerFailure(reason));
                }
            }
        };

        if config.latest_index < proposal.index {
            return Err(FatalError::StateRegression {
                ledger: config.latest_index,
                committed: proposal.index,
            });
        }

        if let Some(handler) = &self.finalize_handler {
            handler(&config);
        }
        let validator_set_changed = self
            .last_validator_set
            .as_ref()
            .is_some_and(|last| *last != config.validator_set);
        if validator_set_changed {
            if let Some(handler) = &self.reset_config_handler {
                handler(&config);
            }
        }
        self.last_validator_set = Some(config.validator_set.clone());
        if let Some(handler) = &self.notify_handler {
            handler(&proposal);
        }

        self.remove_stable_checkpoints(config.latest_index);

        self.msg_queue.push(WorkerTask::CheckpointFinalized {
            proposal,
            ledger_config: config,
        });
        Ok(())
    }

    /// Garbage-collect durable entries that have fallen out of the retain window below the
    /// ledger's persisted head.
    fn remove_stable_checkpoints(&mut self, ledger_head: ProposalIndex) {
        let prune_below = ledger_head.saturating_sub(self.retain_window);
        if prune_below <= self.last_pruned {
            return;
        }
        let mut wb = K::WriteBatch::new();
        let mut index = self.last_pruned;
        while index < prune_below {
            wb.delete(&proposal_key(index));
            index += 1;
        }
        self.kv.write(wb);
        self.last_pruned = prune_below;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::mpsc;
    use std::sync::Mutex;

    use crate::types::crypto_primitives::sha256;
    use crate::types::data_types::ProposalData;

    use super::*;

    #[derive(Clone)]
    struct MemKV(Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>);

    impl MemKV {
        fn new() -> MemKV {
            MemKV(Arc::new(Mutex::new(HashMap::new())))
        }
    }

    impl KVGet for MemKV {
        fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
            self.0.lock().unwrap().get(key).cloned()
        }
    }

    impl KVStore for MemKV {
        type WriteBatch = MemWriteBatch;

        fn write(&mut self, wb: MemWriteBatch) {
            let mut map = self.0.lock().unwrap();
            for (key, value) in wb.insertions {
                map.insert(key, value);
            }
            for key in wb.deletions {
                map.remove(&key);
            }
        }

        fn clear(&mut self) {
            self.0.lock().unwrap().clear();
        }
    }

    struct MemWriteBatch {
        insertions: HashMap<Vec<u8>, Vec<u8>>,
        deletions: HashSet<Vec<u8>>,
    }

    impl WriteBatch for MemWriteBatch {
        fn new() -> Self {
            MemWriteBatch {
                insertions: HashMap::new(),
                deletions: HashSet::new(),
            }
        }

        fn set(&mut self, key: &[u8], value: &[u8]) {
            let _ = self.deletions.remove(key);
            self.insertions.insert(key.to_vec(), value.to_vec());
        }

        fn delete(&mut self, key: &[u8]) {
            let _ = self.insertions.remove(key);
            self.deletions.insert(key.to_vec());
        }
    }

    struct NullLedger {
        latest: ProposalIndex,
    }

    impl Ledger for NullLedger {
        fn commit_block(&mut self, proposal: &Proposal) -> Result<LedgerConfig, LedgerError> {
            if proposal.index > self.latest {
                self.latest = proposal.index;
            }
            Ok(LedgerConfig {
                validator_set: ValidatorSet::new(),
                latest_index: self.latest,
            })
        }

        fn block(&self, _index: ProposalIndex) -> Result<Option<Proposal>, LedgerError> {
            Ok(None)
        }

        fn config(&self) -> Result<LedgerConfig, LedgerError> {
            Ok(LedgerConfig {
                validator_set: ValidatorSet::new(),
                latest_index: self.latest,
            })
        }
    }

    fn storage(kv: MemKV) -> (LedgerStorage<MemKV, NullLedger>, mpsc::Sender<StorageCommand>) {
        let (tx, rx) = mpsc::channel();
        let storage = LedgerStorage::new(
            kv,
            NullLedger {
                latest: ProposalIndex::new(0),
            },
            rx,
            Arc::new(MsgQueue::new(16)),
            None,
            None,
            None,
            512,
        );
        (storage, tx)
    }

    fn proposal(index: u64, payload: &[u8]) -> Proposal {
        Proposal::new(
            ProposalIndex::new(index),
            sha256(payload),
            ProposalData::new(payload.to_vec()),
        )
    }

    #[test]
    fn replaying_an_identical_commit_is_a_no_op() {
        let kv = MemKV::new();
        let (mut storage, _tx) = storage(kv.clone());

        storage.commit_proposal(&proposal(1, b"a")).unwrap();
        storage.commit_proposal(&proposal(1, b"a")).unwrap();
        assert_eq!(
            kv.max_committed_proposal_index().unwrap(),
            ProposalIndex::new(1)
        );
    }

    #[test]
    fn replaying_a_conflicting_commit_is_fatal() {
        let kv = MemKV::new();
        let (mut storage, _tx) = storage(kv);

        storage.commit_proposal(&proposal(1, b"a")).unwrap();
        assert!(matches!(
            storage.commit_proposal(&proposal(1, b"b")),
            Err(FatalError::InconsistentCommit { .. })
        ));
    }

    #[test]
    fn load_state_returns_entries_above_the_stable_index() {
        let kv = MemKV::new();
        let (mut storage, _tx) = storage(kv.clone());
        for i in 1..=5 {
            storage.commit_proposal(&proposal(i, &[i as u8])).unwrap();
        }

        let log = CommittedLog::new(kv);
        assert_eq!(log.max_committed_proposal_index(), ProposalIndex::new(5));
        let loaded = log.load_state(ProposalIndex::new(2));
        assert_eq!(
            loaded.iter().map(|p| p.index.int()).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
    }

    #[test]
    fn checkpoint_acknowledgement_reaches_the_worker_queue() {
        let kv = MemKV::new();
        let (tx, rx) = mpsc::channel();
        let queue = Arc::new(MsgQueue::new(16));
        let storage = LedgerStorage::new(
            kv,
            NullLedger {
                latest: ProposalIndex::new(0),
            },
            rx,
            queue.clone(),
            None,
            None,
            None,
            512,
        );
        let handle = storage.start();

        tx.send(StorageCommand::CommitProposal(proposal(1, b"a")))
            .unwrap();
        let task = queue.try_pop(Duration::from_secs(5));
        assert!(matches!(
            task,
            Some(WorkerTask::CheckpointFinalized { proposal, .. })
                if proposal.index == ProposalIndex::new(1)
        ));

        drop(tx);
        handle.join().unwrap();
    }
}
