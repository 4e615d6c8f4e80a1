/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable peer-to-peer networking, plus the internal types the engine uses to interact with the
//! network: the [`Network`] trait implemented by library users, the [`SenderHandle`] that encodes
//! outbound messages, and the poller thread that decodes, filters and routes inbound messages.

pub mod network;

pub(crate) mod sending;

pub(crate) mod receiving;

pub use network::Network;
