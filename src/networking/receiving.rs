/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The poller thread, which polls the [`Network`] for messages, decodes and filters them, and
//! routes them to their consumers.
//!
//! Routing is by packet type:
//! 1. Log sync responses go to the log sync client thread.
//! 2. Everything else goes into the worker's message queue.
//!
//! Ingress filtering happens here, before anything is enqueued: messages from peers outside the
//! consensus node set are dropped, messages from the local node are dropped (the engine records
//! its own votes directly in-cache, so loopback would double count), and messages whose claimed
//! sender index does not match the key the transport authenticated are dropped as Byzantine
//! evidence. Undecodable messages increment a malformed-message counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::messages::{self, ConsensusMessage};
use crate::msg_queue::{MsgQueue, WorkerTask};
use crate::pbft::state::ConsensusState;
use crate::types::crypto_primitives::VerifyingKey;

use super::network::Network;

/// How many undecodable messages the poller has discarded.
pub(crate) static MALFORMED_MESSAGE_COUNT: AtomicU64 = AtomicU64::new(0);

/// Spawn the poller thread.
///
/// Returns the join handle and the receiving end for log sync responses, which the log sync
/// client consumes.
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    state: ConsensusState,
    msg_queue: Arc<MsgQueue>,
    shutdown_signal: Receiver<()>,
) -> (JoinHandle<()>, Receiver<(VerifyingKey, ConsensusMessage)>) {
    let (to_sync_responses, sync_responses) = mpsc::channel();

    let poller_thread = thread::Builder::new()
        .name("poller".to_string())
        .spawn(move || loop {
            match shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Poller thread disconnected from main thread")
                }
            }

            if let Some((origin, bytes)) = network.recv() {
                route(&state, &msg_queue, &to_sync_responses, origin, &bytes);
            } else {
                thread::yield_now()
            }
        })
        .unwrap();

    (poller_thread, sync_responses)
}

fn route(
    state: &ConsensusState,
    msg_queue: &MsgQueue,
    sync_responses: &Sender<(VerifyingKey, ConsensusMessage)>,
    origin: VerifyingKey,
    bytes: &[u8],
) {
    // The local node's votes are recorded directly in-cache; loopback would double count them.
    if origin == state.node_id() {
        return;
    }
    if !state.is_consensus_node() {
        log::trace!("rejecting message: the local node is not a consensus node");
        return;
    }
    let Some(origin_index) = state.validator_set().position(&origin) else {
        log::trace!("rejecting message from a peer outside the consensus node set");
        return;
    };

    let msg = match messages::decode(bytes) {
        Ok(msg) => msg,
        Err(err) => {
            MALFORMED_MESSAGE_COUNT.fetch_add(1, Ordering::Relaxed);
            log::debug!("dropping undecodable message from {}: {:?}", origin_index, err);
            return;
        }
    };

    // A message claiming to come from a node other than the one the transport authenticated is
    // Byzantine evidence.
    if msg.generated_from() != origin_index {
        log::warn!(
            "dropping message from {} claiming to be from {}",
            origin_index,
            msg.generated_from()
        );
        return;
    }

    match msg {
        ConsensusMessage::CommittedProposalResponse(_)
        | ConsensusMessage::PreparedProposalResponse(_) => {
            let _ = sync_responses.send((origin, msg));
        }
        _ => msg_queue.push(WorkerTask::Remote(origin, msg)),
    }
}
