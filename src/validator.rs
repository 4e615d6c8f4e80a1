/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The external proposal validator contract, and the block validator façade built on top of it.
//!
//! Content validity of proposals is not a consensus concern: the engine delegates it to the
//! library user's [`ProposalValidator`]. Verification is asynchronous: the engine runs it on a
//! task pool and the outcome re-enters the worker through the message queue, carrying the
//! (index, view) of the pre-prepare it belongs to so that results arriving after a view change
//! can be discarded.
//!
//! [`BlockValidator`] is the shim that other paths (log sync catch-up, external sync modules) use
//! to check a block arriving outside the voting path: the block must be ahead of the committed
//! index and sealed by a quorum of valid vote signatures.

use std::sync::Arc;

use threadpool::ThreadPool;

use crate::msg_queue::{MsgQueue, WorkerTask};
use crate::pbft::state::ConsensusState;
use crate::types::data_types::{ProposalIndex, ViewNumber};
use crate::types::proposal::{Phase, Proposal};

/// The external validator that checks proposal contents before the engine votes on them.
///
/// Implementations are called from the engine's task pool, possibly concurrently.
pub trait ProposalValidator: Send + Sync + 'static {
    /// Check whether `proposal` is valid to decide at its index. Returning `Ok(false)` or
    /// [`ValidatorError::Permanent`] drops the pre-prepare; [`ValidatorError::Transient`] failures
    /// are retried a bounded number of times.
    fn verify_proposal(&self, proposal: &Proposal) -> Result<bool, ValidatorError>;
}

/// Failures reported by [`ProposalValidator`] implementations.
#[derive(Debug)]
pub enum ValidatorError {
    /// The check may succeed if retried.
    Transient(String),
    /// The check will not succeed no matter how often it is retried.
    Permanent(String),
}

const VERIFY_RETRIES: u32 = 3;

/// Run `validator.verify_proposal` on the pool and post the outcome back onto the worker queue as
/// a [`WorkerTask::VerifyResult`] tagged with the pre-prepare's (index, view).
pub(crate) fn spawn_verification(
    pool: &ThreadPool,
    validator: Arc<dyn ProposalValidator>,
    proposal: Proposal,
    index: ProposalIndex,
    view: ViewNumber,
    msg_queue: Arc<MsgQueue>,
) {
    pool.execute(move || {
        let mut verified = false;
        for attempt in 0..=VERIFY_RETRIES {
            match validator.verify_proposal(&proposal) {
                Ok(result) => {
                    verified = result;
                    if !result {
                        log::warn!("proposal verification failed for index {}", index);
                    }
                    break;
                }
                Err(ValidatorError::Transient(reason)) => {
                    if attempt == VERIFY_RETRIES {
                        log::warn!(
                            "proposal verification for index {} exhausted retries: {}",
                            index,
                            reason
                        );
                    }
                }
                Err(ValidatorError::Permanent(reason)) => {
                    log::warn!(
                        "proposal verification for index {} permanently failed: {}",
                        index,
                        reason
                    );
                    break;
                }
            }
        }
        msg_queue.push(WorkerTask::VerifyResult {
            index,
            view,
            verified,
        });
    });
}

/// Check that `proposal` is ahead of the committed index and sealed with a quorum of valid vote
/// signatures from the current consensus node set.
pub(crate) fn check_sealed_proposal(state: &ConsensusState, proposal: &Proposal) -> bool {
    if proposal.index <= state.committed_index() {
        return false;
    }
    let validator_set = state.validator_set();
    let sealed_weight = proposal.certified_weight(&validator_set, &[Phase::Prepare, Phase::Commit]);
    if sealed_weight < validator_set.quorum() {
        log::warn!(
            "rejecting proposal at index {}: insufficient seal weight",
            proposal.index
        );
        return false;
    }
    true
}

/// Checks blocks that arrive outside the voting path, e.g., streamed by log sync during catch-up
/// or handed in by an external sync module.
pub struct BlockValidator {
    state: ConsensusState,
    validator: Arc<dyn ProposalValidator>,
    pool: ThreadPool,
}

impl BlockValidator {
    pub(crate) fn new(
        state: ConsensusState,
        validator: Arc<dyn ProposalValidator>,
        pool: ThreadPool,
    ) -> BlockValidator {
        BlockValidator {
            state,
            validator,
            pool,
        }
    }

    /// Check the proposal's position and seal. Cheap enough to call from the worker.
    pub(crate) fn check(&self, proposal: &Proposal) -> bool {
        check_sealed_proposal(&self.state, proposal)
    }

    /// Asynchronously run [`check`](Self::check) plus the external content validation, invoking
    /// `on_checked` with the outcome. This is the entry point for external sync modules.
    pub fn async_check_proposal(
        &self,
        proposal: Proposal,
        on_checked: Box<dyn FnOnce(bool) + Send>,
    ) {
        let state = self.state.clone();
        let validator = self.validator.clone();
        self.pool.execute(move || {
            let valid = check_sealed_proposal(&state, &proposal)
                && matches!(validator.verify_proposal(&proposal), Ok(true));
            on_checked(valid);
        });
    }
}
