/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Notifications that are emitted when significant things happen in the local replica.
//!
//! ## Event enum
//!
//! Significant occurrences in the replica include committing a proposal, broadcasting or receiving
//! a protocol message, entering a new view, and serving log sync requests. Each corresponds to a
//! variant of the [event enum](Event), whose inner struct stores information summarizing the
//! occurrence, always including a timestamp taken when the event was emitted.
//!
//! ## Registering event handlers
//!
//! Library users can register event handler closures via [`ReplicaSpec`](crate::replica::ReplicaSpec),
//! which are then called by the [event bus](crate::event_bus) thread when the handler's particular
//! event variant happens. Default handlers that log out events can be enabled in the
//! [configuration](crate::config::Configuration).
//!
//! ## Timing
//!
//! Events are always emitted **after** the corresponding occurrence is completed. For example, the
//! [commit event](CommitProposalEvent) is only emitted after the ledger has acknowledged executing
//! and persisting the proposal.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::messages::{NewView, PrePrepare, ViewChange, Vote};
use crate::types::data_types::{CryptoHash, ProposalIndex, ReplicaIndex, ViewNumber};

/// Enumerates all events defined for this crate.
pub enum Event {
    // The event that changes persistent state.
    CommitProposal(CommitProposalEvent),

    // Events that involve broadcasting a protocol message.
    Propose(ProposeEvent),
    Vote(VoteEvent),
    ViewChange(ViewChangeEvent),
    NewView(NewViewEvent),

    // Events that involve receiving a protocol message.
    ReceiveProposal(ReceiveProposalEvent),
    ReceiveVote(ReceiveVoteEvent),
    ReceiveViewChange(ReceiveViewChangeEvent),
    ReceiveNewView(ReceiveNewViewEvent),

    // Other progress events.
    StartView(StartViewEvent),
    ViewTimeout(ViewTimeoutEvent),

    // Log sync events.
    ReceiveSyncRequest(ReceiveSyncRequestEvent),
    SendSyncResponse(SendSyncResponseEvent),
}

impl Event {
    /// Publishes a given instance of the [`Event`] enum on the event publisher channel (if the
    /// channel is defined).
    pub fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(self);
        }
    }
}

/// A proposal was committed: the ledger acknowledged executing and persisting it, and the
/// committed index advanced.
pub struct CommitProposalEvent {
    pub timestamp: SystemTime,
    pub index: ProposalIndex,
    pub hash: CryptoHash,
}

/// The replica broadcasted a [pre-prepare](crate::messages::PrePrepare) for a proposal it leads.
pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub pre_prepare: PrePrepare,
}

/// The replica broadcasted a [vote](crate::messages::Vote) in the prepare or commit phase.
pub struct VoteEvent {
    pub timestamp: SystemTime,
    pub vote: Vote,
}

/// The replica broadcasted a [view change](crate::messages::ViewChange) after a view timeout.
pub struct ViewChangeEvent {
    pub timestamp: SystemTime,
    pub view_change: ViewChange,
}

/// The replica, as leader after a view change, broadcasted a
/// [new view](crate::messages::NewView).
pub struct NewViewEvent {
    pub timestamp: SystemTime,
    pub new_view: NewView,
}

/// The replica received a [pre-prepare](crate::messages::PrePrepare) that passed validation.
pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: ReplicaIndex,
    pub pre_prepare: PrePrepare,
}

/// The replica received a [vote](crate::messages::Vote) that passed validation.
pub struct ReceiveVoteEvent {
    pub timestamp: SystemTime,
    pub origin: ReplicaIndex,
    pub vote: Vote,
}

/// The replica received a [view change](crate::messages::ViewChange) that passed validation.
pub struct ReceiveViewChangeEvent {
    pub timestamp: SystemTime,
    pub origin: ReplicaIndex,
    pub view_change: ViewChange,
}

/// The replica received a [new view](crate::messages::NewView) that passed validation.
pub struct ReceiveNewViewEvent {
    pub timestamp: SystemTime,
    pub origin: ReplicaIndex,
    pub new_view: NewView,
}

/// The replica entered a new view, either by completing a view change or by accepting a new view
/// message from the new leader.
pub struct StartViewEvent {
    pub timestamp: SystemTime,
    pub view: ViewNumber,
}

/// The view change timer fired and the replica started (or escalated) a view change attempt.
pub struct ViewTimeoutEvent {
    pub timestamp: SystemTime,
    pub view: ViewNumber,
    pub to_view: ViewNumber,
}

/// The replica received a committed-proposal sync request.
pub struct ReceiveSyncRequestEvent {
    pub timestamp: SystemTime,
    pub peer: ReplicaIndex,
    pub start: ProposalIndex,
    pub offset: u64,
}

/// The replica answered a sync request with `proposals` committed proposals.
pub struct SendSyncResponseEvent {
    pub timestamp: SystemTime,
    pub peer: ReplicaIndex,
    pub start: ProposalIndex,
    pub proposals: usize,
}
