/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait for pluggable peer-to-peer (P2P) networking.
//!
//! Main trait: [`Network`].

use crate::types::crypto_primitives::VerifyingKey;
use crate::types::validator_set::ValidatorSet;

/// Trait for pluggable peer-to-peer (P2P) networking.
///
/// Messages are opaque byte strings at this layer: the engine encodes and decodes the
/// [wire envelopes](crate::messages) itself, so network providers only route bytes between peers
/// identified by their Ed25519 verifying keys.
pub trait Network: Clone + Send + 'static {
    /// Inform the network provider of the consensus node set on wake-up, e.g., so that it can
    /// establish connections to the peers that matter.
    fn init_validator_set(&mut self, validator_set: ValidatorSet);

    /// Send a message to all peers (including listeners) without blocking.
    fn broadcast(&mut self, message: Vec<u8>);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: VerifyingKey, message: Vec<u8>);

    /// Receive a message from any peer. Returns immediately with a `None` if no message is
    /// available now.
    fn recv(&mut self) -> Option<(VerifyingKey, Vec<u8>)>;
}
