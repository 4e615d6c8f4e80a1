/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Recovery of missing committed proposals and precommitted state, layered on best-effort
//! transport.
//!
//! Two flows share this protocol:
//!
//! 1. **Precommit data recovery.** A new view reissues pre-prepares for proposals that were
//!    prepared somewhere but whose data the local replica never saw. The worker asks the
//!    [`LogSyncClient`] to fetch the data from the new leader; the filled pre-prepare re-enters
//!    the worker through the message queue.
//! 2. **Committed proposal catch-up.** When a replica sees evidence that the quorum is ahead of it
//!    (a message beyond its high water mark, or a view change carrying a higher committed index),
//!    the worker asks the client to stream the committed proposals it is missing. The recovered,
//!    quorum-sealed proposals re-enter the worker, which replays them into the ledger.
//!
//! The serving side lives in the worker, which owns the precommit cache and a read handle over
//! the durable commit log; see [`crate::pbft::protocol`].
//!
//! Requests are retried at most a configured number of times with exponential backoff, and a
//! request is cancelled as soon as the committed index advances past it.

pub(crate) mod client;

pub(crate) use client::{LogSyncClient, SyncRequest};
