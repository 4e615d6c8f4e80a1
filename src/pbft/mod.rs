/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus subprotocol: the three-phase voting state machine, its message caches, and the
//! view change protocol.
//!
//! # Introduction
//!
//! This module implements Practical Byzantine Fault Tolerance over a known, weighted set of
//! consensus nodes. The protocol decides one proposal per log index through three phases:
//!
//! 1. **PrePrepare**: the leader of the (index, view) broadcasts the candidate proposal.
//! 2. **Prepare**: every node that accepts the pre-prepare broadcasts a prepare vote. A quorum of
//!    prepares ("precommit") locks the proposal for that index; view changes carry the lock
//!    forward so that no later leader can propose something else below the locked view.
//! 3. **Commit**: after precommitting, nodes broadcast commit votes. A quorum of commits makes
//!    the proposal safe to execute, and it is handed to [ledger storage](crate::storage).
//!
//! Quorums are weighted: a set of distinct-sender votes is a quorum when its summed weight reaches
//! `total_weight * 2/3 + 1`, which tolerates strictly less than a third of the total weight being
//! Byzantine (`f` out of `3f + 1` equally weighted nodes).
//!
//! # Leader rotation and view changes
//!
//! The leader of an index is a deterministic function of the index and the current view,
//! `(index + view) mod N`, so a faulty leader is routed around by advancing the view. When the
//! [timer](crate::timer) fires, a replica broadcasts a [view change](crate::messages::ViewChange)
//! carrying everything the next leader must preserve: its highest committed proposal and its
//! precommit cache. The leader of the target view aggregates a quorum of view changes into a
//! [new view](crate::messages::NewView) whose reissued pre-prepares are fully determined by the
//! aggregated view changes, so every receiver re-runs the selection to validate them.

pub(crate) mod cache;

pub(crate) mod protocol;

pub(crate) mod state;
