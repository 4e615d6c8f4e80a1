/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [config](crate::config::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values
//! are always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following
//! snippet is how a [ReceiveProposal](crate::events::ReceiveProposalEvent) is printed:
//!
//! ```text
//! ReceiveProposal, 1701329264, 2, fNGCJyk, 7, 0
//! ```
//!
//! In the snippet:
//! - The third value is the replica index of the proposal's origin.
//! - The fourth value is the first seven characters of the Base64 encoding of the proposed hash.
//! - The fifth and sixth values are the proposal's index and view.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;
use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const COMMIT_PROPOSAL: &str = "CommitProposal";

pub const PROPOSE: &str = "Propose";
pub const VOTE: &str = "Vote";
pub const VIEW_CHANGE: &str = "ViewChange";
pub const NEW_VIEW: &str = "NewView";

pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";
pub const RECEIVE_VOTE: &str = "ReceiveVote";
pub const RECEIVE_VIEW_CHANGE: &str = "ReceiveViewChange";
pub const RECEIVE_NEW_VIEW: &str = "ReceiveNewView";

pub const START_VIEW: &str = "StartView";
pub const VIEW_TIMEOUT: &str = "ViewTimeout";

pub const RECEIVE_SYNC_REQUEST: &str = "ReceiveSyncRequest";
pub const SEND_SYNC_RESPONSE: &str = "SendSyncResponse";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for CommitProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &CommitProposalEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COMMIT_PROPOSAL,
                secs_since_unix_epoch(event.timestamp),
                event.index,
                first_seven_base64_chars(&event.hash.bytes()),
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.pre_prepare.proposal.hash.bytes()),
                event.pre_prepare.index,
                event.pre_prepare.view,
            )
        };
        Box::new(logger)
    }
}

impl Logger for VoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &VoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {:?}",
                VOTE,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.vote.proposal_hash.bytes()),
                event.vote.index,
                event.vote.view,
                event.vote.phase,
            )
        };
        Box::new(logger)
    }
}

impl Logger for ViewChangeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &ViewChangeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                VIEW_CHANGE,
                secs_since_unix_epoch(event.timestamp),
                event.view_change.view,
                event.view_change.committed_proposal.index,
                event.view_change.prepared_proposals.len(),
            )
        };
        Box::new(logger)
    }
}

impl Logger for NewViewEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &NewViewEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                NEW_VIEW,
                secs_since_unix_epoch(event.timestamp),
                event.new_view.view,
                event.new_view.view_changes.len(),
                event.new_view.pre_prepares.len(),
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &ReceiveProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PROPOSAL,
                secs_since_unix_epoch(event.timestamp),
                event.origin,
                first_seven_base64_chars(&event.pre_prepare.proposal.hash.bytes()),
                event.pre_prepare.index,
                event.pre_prepare.view,
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &ReceiveVoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {:?}",
                RECEIVE_VOTE,
                secs_since_unix_epoch(event.timestamp),
                event.origin,
                first_seven_base64_chars(&event.vote.proposal_hash.bytes()),
                event.vote.index,
                event.vote.phase,
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveViewChangeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &ReceiveViewChangeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_VIEW_CHANGE,
                secs_since_unix_epoch(event.timestamp),
                event.origin,
                event.view_change.view,
                event.view_change.committed_proposal.index,
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveNewViewEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &ReceiveNewViewEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_NEW_VIEW,
                secs_since_unix_epoch(event.timestamp),
                event.origin,
                event.new_view.view,
                event.new_view.pre_prepares.len(),
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartViewEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &StartViewEvent| {
            log::info!(
                "{}, {}, {}",
                START_VIEW,
                secs_since_unix_epoch(event.timestamp),
                event.view,
            )
        };
        Box::new(logger)
    }
}

impl Logger for ViewTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &ViewTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}",
                VIEW_TIMEOUT,
                secs_since_unix_epoch(event.timestamp),
                event.view,
                event.to_view,
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveSyncRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &ReceiveSyncRequestEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_SYNC_REQUEST,
                secs_since_unix_epoch(event.timestamp),
                event.peer,
                event.start,
                event.offset,
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendSyncResponseEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |event: &SendSyncResponseEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SEND_SYNC_RESPONSE,
                secs_since_unix_epoch(event.timestamp),
                event.peer,
                event.start,
                event.proposals,
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first
// 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Event occured before the Unix Epoch.")
        .as_secs()
}
