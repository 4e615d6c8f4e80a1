/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Implements the [`LogSyncClient`], which is responsible for:
//! 1. Sending committed-proposal and prepared-proposal requests on the worker's behalf, and
//! 2. Matching responses against the outstanding request and validating them, and
//! 3. Retrying with exponential backoff, and cancelling requests that progress has overtaken.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::messages::{
    CommittedProposalRequest, ConsensusMessage, PrePrepare, PreparedProposalRequest,
};
use crate::msg_queue::{MsgQueue, WorkerTask};
use crate::networking::network::Network;
use crate::networking::sending::SenderHandle;
use crate::pbft::state::ConsensusState;
use crate::types::crypto_primitives::{Keypair, VerifyingKey};
use crate::types::data_types::{ProposalIndex, ReplicaIndex};

/// Work the worker posts to the log sync client.
pub(crate) enum SyncRequest {
    /// Recover the proposal data behind a new-view pre-prepare from `from`. On success the filled
    /// pre-prepare re-enters the worker as [`WorkerTask::FilledPrePrepare`].
    PrecommitData {
        from: ReplicaIndex,
        pre_prepare: PrePrepare,
    },
    /// Recover the committed proposals in `[start, start + offset)` from `from`. On success the
    /// batch re-enters the worker as [`WorkerTask::SyncedCommitted`].
    CommittedProposals {
        from: ReplicaIndex,
        start: ProposalIndex,
        offset: u64,
    },
}

pub(crate) struct LogSyncClient<N: Network> {
    keypair: Keypair,
    state: ConsensusState,
    requests: Receiver<SyncRequest>,
    responses: Receiver<(VerifyingKey, ConsensusMessage)>,
    sender: SenderHandle<N>,
    msg_queue: Arc<MsgQueue>,
    max_retries: u32,
    response_timeout: Duration,
}

impl<N: Network> LogSyncClient<N> {
    pub(crate) fn new(
        keypair: Keypair,
        state: ConsensusState,
        requests: Receiver<SyncRequest>,
        responses: Receiver<(VerifyingKey, ConsensusMessage)>,
        sender: SenderHandle<N>,
        msg_queue: Arc<MsgQueue>,
        max_retries: u32,
        response_timeout: Duration,
    ) -> LogSyncClient<N> {
        LogSyncClient {
            keypair,
            state,
            requests,
            responses,
            sender,
            msg_queue,
            max_retries,
            response_timeout,
        }
    }

    /// Start the client thread. It exits when the worker's request sender is dropped.
    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("log_sync_client".to_string())
            .spawn(move || {
                while let Ok(request) = self.requests.recv() {
                    self.serve(request);
                }
            })
            .unwrap()
    }

    fn serve(&mut self, request: SyncRequest) {
        for attempt in 0..self.max_retries {
            if self.overtaken(&request) {
                return;
            }
            self.send_request(&request);
            let deadline = Instant::now() + self.response_timeout * 2u32.pow(attempt);
            if self.await_response(&request, deadline) {
                return;
            }
        }
        match &request {
            SyncRequest::PrecommitData { pre_prepare, .. } => log::warn!(
                "giving up on precommit data for index {} after {} attempts",
                pre_prepare.index,
                self.max_retries
            ),
            SyncRequest::CommittedProposals { start, offset, .. } => log::warn!(
                "giving up on committed proposals [{}, {}) after {} attempts",
                start,
                *start + *offset,
                self.max_retries
            ),
        }
    }

    // Whether progress has advanced past what the request would recover.
    fn overtaken(&self, request: &SyncRequest) -> bool {
        let committed = self.state.committed_index();
        match request {
            SyncRequest::PrecommitData { pre_prepare, .. } => committed >= pre_prepare.index,
            SyncRequest::CommittedProposals { start, offset, .. } => {
                *offset == 0 || committed >= *start + (*offset - 1)
            }
        }
    }

    fn send_request(&mut self, request: &SyncRequest) {
        let Some(my_index) = self.state.node_index() else {
            return;
        };
        match request {
            SyncRequest::PrecommitData { from, pre_prepare } => {
                let msg = ConsensusMessage::PreparedProposalRequest(PreparedProposalRequest::new(
                    &self.keypair,
                    pre_prepare.index,
                    pre_prepare.proposal.hash,
                    my_index,
                ));
                self.sender.send_to_index(&self.state, *from, &msg);
            }
            SyncRequest::CommittedProposals {
                from,
                start,
                offset,
            } => {
                let msg = ConsensusMessage::CommittedProposalRequest(CommittedProposalRequest::new(
                    &self.keypair,
                    *start,
                    *offset,
                    my_index,
                ));
                self.sender.send_to_index(&self.state, *from, &msg);
            }
        }
    }

    // Wait until `deadline` for a response that satisfies `request`. Returns whether the request
    // was satisfied.
    fn await_response(&mut self, request: &SyncRequest, deadline: Instant) -> bool {
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            let (_origin, msg) = match self.responses.recv_timeout(remaining) {
                Ok(received) => received,
                Err(RecvTimeoutError::Timeout) => break,
                // The poller is shutting down; there is nothing left to wait for.
                Err(RecvTimeoutError::Disconnected) => return true,
            };

            match (request, msg) {
                (
                    SyncRequest::PrecommitData { pre_prepare, .. },
                    ConsensusMessage::PreparedProposalResponse(response),
                ) => {
                    let matches = response.proposal.index == pre_prepare.index
                        && response.proposal.hash == pre_prepare.proposal.hash
                        && response.proposal.data.is_some();
                    if matches {
                        let mut filled = pre_prepare.clone();
                        filled.proposal.data = response.proposal.data;
                        self.msg_queue.push(WorkerTask::FilledPrePrepare(filled));
                        return true;
                    }
                }
                (
                    SyncRequest::CommittedProposals { start, offset, .. },
                    ConsensusMessage::CommittedProposalResponse(response),
                ) => {
                    let contiguous_from_start = response
                        .proposals
                        .iter()
                        .enumerate()
                        .all(|(i, p)| p.index == *start + i as u64);
                    if !response.proposals.is_empty()
                        && response.proposals.len() as u64 <= *offset
                        && contiguous_from_start
                    {
                        self.msg_queue
                            .push(WorkerTask::SyncedCommitted(response.proposals));
                        return true;
                    }
                }
                // A response for some other, already-settled request; drop it.
                _ => (),
            }
        }
        false
    }
}
