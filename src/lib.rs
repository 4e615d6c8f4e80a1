/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust implementation of a Practical Byzantine Fault Tolerant (PBFT) consensus engine for
//! permissioned blockchains.
//!
//! The engine drives a deterministic ordering of candidate blocks among a known, weighted set of
//! consensus nodes, tolerating `f` Byzantine faults out of `3f + 1`, and produces a totally-ordered
//! log of committed proposals that an external ledger executes and persists.
//!
//! Everything outside of ordering is pluggable and provided by the library user:
//! - Peer-to-peer transport, through the [`Network`](networking::Network) trait.
//! - Durable storage for consensus checkpoints, through the [`KVStore`](storage::KVStore) trait.
//! - Block execution and persistence, through the [`Ledger`](storage::Ledger) trait.
//! - Proposal content validation, through the
//!   [`ProposalValidator`](validator::ProposalValidator) trait.
//!
//! Assemble these in a [`ReplicaSpec`](replica::ReplicaSpec) and call
//! [`start`](replica::ReplicaSpec::start) to bring up a replica. Submit candidate blocks with
//! [`Replica::submit_proposal`](replica::Replica::submit_proposal), and observe progress through
//! [events](events).

pub mod config;

pub mod events;

pub mod log_sync;

pub mod logging;

pub mod messages;

pub mod networking;

pub mod pbft;

pub mod replica;

pub mod storage;

pub mod types;

pub mod validator;

pub(crate) mod event_bus;

pub(crate) mod msg_queue;

pub(crate) mod timer;

// Re-exports
pub use config::Configuration;
pub use replica::{Replica, ReplicaSpec, SubmitError};
