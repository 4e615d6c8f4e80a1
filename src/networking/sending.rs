/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types for sending messages to the P2P network.

use crate::messages::{self, ConsensusMessage};
use crate::pbft::state::ConsensusState;
use crate::types::crypto_primitives::VerifyingKey;
use crate::types::data_types::ReplicaIndex;

use super::network::Network;

/// A sending end for consensus messages. Encodes messages into their wire envelopes before handing
/// them to the [`Network`] provider.
#[derive(Clone)]
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> SenderHandle<N> {
        SenderHandle { network }
    }

    pub(crate) fn broadcast(&mut self, msg: &ConsensusMessage) {
        self.network.broadcast(messages::encode(msg));
    }

    pub(crate) fn send(&mut self, peer: VerifyingKey, msg: &ConsensusMessage) {
        self.network.send(peer, messages::encode(msg));
    }

    /// Send `msg` to the consensus node at `index` in the current validator set. Silently does
    /// nothing if the index is out of range, e.g., because the validator set changed.
    pub(crate) fn send_to_index(
        &mut self,
        state: &ConsensusState,
        index: ReplicaIndex,
        msg: &ConsensusMessage,
    ) {
        if let Some(peer) = state.validator_set().by_index(index) {
            self.send(*peer, msg);
        }
    }
}
