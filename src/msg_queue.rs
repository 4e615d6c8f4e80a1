/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The bounded FIFO buffer between message ingress and the worker thread.
//!
//! Transport callbacks, the proposal verification pool, the ledger storage thread, and the log
//! sync client are all producers; the single worker thread is the only consumer. Every way of
//! re-entering the worker is a [`WorkerTask`] variant, so that external callbacks never mutate
//! consensus state directly.
//!
//! The queue is bounded. When it is full, the oldest *droppable* entry is discarded to make room
//! and a counter is incremented. View change and new view messages are never dropped (losing one
//! can stall a leader change), and neither are internally-generated tasks.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::messages::{ConsensusMessage, PrePrepare};
use crate::replica::SubmitError;
use crate::storage::{FatalError, LedgerConfig};
use crate::types::crypto_primitives::VerifyingKey;
use crate::types::data_types::{ProposalIndex, ViewNumber};
use crate::types::proposal::Proposal;

/// A unit of work for the worker thread.
pub(crate) enum WorkerTask {
    /// A consensus message received from `origin` over the network.
    Remote(VerifyingKey, ConsensusMessage),

    /// A proposal submitted by the local block builder.
    Submit {
        proposal: Proposal,
        result_back: Box<dyn FnOnce(Result<(), SubmitError>) + Send>,
    },

    /// The outcome of an asynchronous proposal verification for the pre-prepare at
    /// `(index, view)`.
    VerifyResult {
        index: ProposalIndex,
        view: ViewNumber,
        verified: bool,
    },

    /// A new-view pre-prepare whose proposal data the log sync client has recovered.
    FilledPrePrepare(PrePrepare),

    /// Committed proposals recovered by the log sync client during catch-up.
    SyncedCommitted(Vec<Proposal>),

    /// The ledger has durably executed and persisted the proposal.
    CheckpointFinalized {
        proposal: Proposal,
        ledger_config: LedgerConfig,
    },

    /// The ledger storage thread hit an unrecoverable condition.
    Fatal(FatalError),
}

impl WorkerTask {
    // Whether this task may be discarded under queue overflow.
    fn droppable(&self) -> bool {
        match self {
            WorkerTask::Remote(_, msg) => !matches!(
                msg,
                ConsensusMessage::ViewChange(_) | ConsensusMessage::NewView(_)
            ),
            _ => false,
        }
    }
}

/// Bounded multi-producer single-consumer FIFO of [`WorkerTask`]s.
pub(crate) struct MsgQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    capacity: usize,
}

struct Inner {
    tasks: VecDeque<WorkerTask>,
    dropped: u64,
}

impl MsgQueue {
    pub(crate) fn new(capacity: usize) -> MsgQueue {
        MsgQueue {
            inner: Mutex::new(Inner {
                tasks: VecDeque::new(),
                dropped: 0,
            }),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue `task` without blocking.
    ///
    /// If the queue is at capacity, the oldest droppable entry is removed first; if nothing can be
    /// removed, a droppable `task` is itself discarded.
    pub(crate) fn push(&self, task: WorkerTask) {
        let mut inner = self.inner.lock().unwrap();
        if inner.tasks.len() >= self.capacity {
            if let Some(pos) = inner.tasks.iter().position(|t| t.droppable()) {
                inner.tasks.remove(pos);
                inner.dropped += 1;
            } else if task.droppable() {
                inner.dropped += 1;
                return;
            }
        }
        inner.tasks.push_back(task);
        drop(inner);
        self.not_empty.notify_one();
    }

    /// Dequeue the task at the front of the queue, waiting up to `timeout` for one to arrive.
    pub(crate) fn try_pop(&self, timeout: Duration) -> Option<WorkerTask> {
        let mut inner = self.inner.lock().unwrap();
        if inner.tasks.is_empty() {
            let (guard, _) = self
                .not_empty
                .wait_timeout_while(inner, timeout, |inner| inner.tasks.is_empty())
                .unwrap();
            inner = guard;
        }
        inner.tasks.pop_front()
    }

    /// How many messages have been discarded because the queue was full.
    pub(crate) fn dropped_count(&self) -> u64 {
        self.inner.lock().unwrap().dropped
    }
}
