/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread that receives events emitted by the worker and ledger storage threads and passes them to
//! event handlers.
//!
//! When the thread receives a message containing an [event](crate::events::Event), it triggers the
//! execution of all handlers defined for the contained event type, where the handlers for each
//! event type are stored in [`EventHandlers`].
//!
//! When no handlers are present in a replica's instance of `EventHandlers` this thread is not
//! started.
//!
//! ## Event Handlers
//!
//! A replica's instance of `EventHandlers` contains:
//! 1. The handlers provided upon building the replica via [`ReplicaSpec`](crate::replica::ReplicaSpec),
//!    and
//! 2. If logging is enabled via the replica's [config](crate::config::Configuration), then also
//!    the default logging handlers defined in [logging](crate::logging).

use std::{
    sync::mpsc::{Receiver, TryRecvError},
    thread,
    thread::JoinHandle,
};

use crate::{events::*, logging::Logger};

/// Pointer to a handler closure, parametrised by the argument (for our use case, event) type.
pub type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// Stores the two optional handlers enabled for an event type that implements the [`Logger`]
/// trait, namely one logging handler, defined in [`logging`](crate::logging), and one
/// user-defined handler, passed to [`ReplicaSpec`](crate::replica::ReplicaSpec).
pub(crate) struct HandlerPair<T: Logger> {
    pub(crate) user_defined_handler: Option<HandlerPtr<T>>,
    pub(crate) logging_handler: Option<HandlerPtr<T>>,
}

impl<T: Logger> HandlerPair<T> {
    // Checks if no event handlers are defined for this event.
    fn is_empty(&self) -> bool {
        self.user_defined_handler.is_none() && self.logging_handler.is_none()
    }

    /// Creates a new `HandlerPair` with the user-defined handler, and the default logging handler
    /// if logging is enabled.
    fn new(log: bool, user_defined_handler: Option<HandlerPtr<T>>) -> HandlerPair<T> {
        HandlerPair {
            user_defined_handler,
            logging_handler: if log { Some(T::get_logger()) } else { None },
        }
    }

    fn fire(&self, event: &T) {
        self.user_defined_handler.iter().for_each(|handler| handler(event));
        self.logging_handler.iter().for_each(|handler| handler(event));
    }
}

/// Stores the `HandlerPair` of user-defined and optional logging handlers for each pre-defined
/// event type from [events](crate::events).
pub(crate) struct EventHandlers {
    pub(crate) commit_proposal_handlers: HandlerPair<CommitProposalEvent>,
    pub(crate) propose_handlers: HandlerPair<ProposeEvent>,
    pub(crate) vote_handlers: HandlerPair<VoteEvent>,
    pub(crate) view_change_handlers: HandlerPair<ViewChangeEvent>,
    pub(crate) new_view_handlers: HandlerPair<NewViewEvent>,
    pub(crate) receive_proposal_handlers: HandlerPair<ReceiveProposalEvent>,
    pub(crate) receive_vote_handlers: HandlerPair<ReceiveVoteEvent>,
    pub(crate) receive_view_change_handlers: HandlerPair<ReceiveViewChangeEvent>,
    pub(crate) receive_new_view_handlers: HandlerPair<ReceiveNewViewEvent>,
    pub(crate) start_view_handlers: HandlerPair<StartViewEvent>,
    pub(crate) view_timeout_handlers: HandlerPair<ViewTimeoutEvent>,
    pub(crate) receive_sync_request_handlers: HandlerPair<ReceiveSyncRequestEvent>,
    pub(crate) send_sync_response_handlers: HandlerPair<SendSyncResponseEvent>,
}

impl EventHandlers {
    /// Creates the [handler pairs](HandlerPair) for all pre-defined event types from
    /// [events](crate::events) given the user-defined handlers, and information on whether logging
    /// is enabled.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log: bool,
        commit_proposal_handler: Option<HandlerPtr<CommitProposalEvent>>,
        propose_handler: Option<HandlerPtr<ProposeEvent>>,
        vote_handler: Option<HandlerPtr<VoteEvent>>,
        view_change_handler: Option<HandlerPtr<ViewChangeEvent>>,
        new_view_handler: Option<HandlerPtr<NewViewEvent>>,
        receive_proposal_handler: Option<HandlerPtr<ReceiveProposalEvent>>,
        receive_vote_handler: Option<HandlerPtr<ReceiveVoteEvent>>,
        receive_view_change_handler: Option<HandlerPtr<ReceiveViewChangeEvent>>,
        receive_new_view_handler: Option<HandlerPtr<ReceiveNewViewEvent>>,
        start_view_handler: Option<HandlerPtr<StartViewEvent>>,
        view_timeout_handler: Option<HandlerPtr<ViewTimeoutEvent>>,
        receive_sync_request_handler: Option<HandlerPtr<ReceiveSyncRequestEvent>>,
        send_sync_response_handler: Option<HandlerPtr<SendSyncResponseEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            commit_proposal_handlers: HandlerPair::new(log, commit_proposal_handler),
            propose_handlers: HandlerPair::new(log, propose_handler),
            vote_handlers: HandlerPair::new(log, vote_handler),
            view_change_handlers: HandlerPair::new(log, view_change_handler),
            new_view_handlers: HandlerPair::new(log, new_view_handler),
            receive_proposal_handlers: HandlerPair::new(log, receive_proposal_handler),
            receive_vote_handlers: HandlerPair::new(log, receive_vote_handler),
            receive_view_change_handlers: HandlerPair::new(log, receive_view_change_handler),
            receive_new_view_handlers: HandlerPair::new(log, receive_new_view_handler),
            start_view_handlers: HandlerPair::new(log, start_view_handler),
            view_timeout_handlers: HandlerPair::new(log, view_timeout_handler),
            receive_sync_request_handlers: HandlerPair::new(log, receive_sync_request_handler),
            send_sync_response_handlers: HandlerPair::new(log, send_sync_response_handler),
        }
    }

    /// Checks if no handlers are defined, i.e., neither user-defined handlers were defined nor
    /// logging is enabled.
    pub(crate) fn is_empty(&self) -> bool {
        self.commit_proposal_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.vote_handlers.is_empty()
            && self.view_change_handlers.is_empty()
            && self.new_view_handlers.is_empty()
            && self.receive_proposal_handlers.is_empty()
            && self.receive_vote_handlers.is_empty()
            && self.receive_view_change_handlers.is_empty()
            && self.receive_new_view_handlers.is_empty()
            && self.start_view_handlers.is_empty()
            && self.view_timeout_handlers.is_empty()
            && self.receive_sync_request_handlers.is_empty()
            && self.send_sync_response_handlers.is_empty()
    }

    /// Triggers the execution of each of the two handlers - the user-defined and the logging
    /// handler, if defined - for a given event type from [events](crate::events).
    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::CommitProposal(e) => self.commit_proposal_handlers.fire(&e),
            Event::Propose(e) => self.propose_handlers.fire(&e),
            Event::Vote(e) => self.vote_handlers.fire(&e),
            Event::ViewChange(e) => self.view_change_handlers.fire(&e),
            Event::NewView(e) => self.new_view_handlers.fire(&e),
            Event::ReceiveProposal(e) => self.receive_proposal_handlers.fire(&e),
            Event::ReceiveVote(e) => self.receive_vote_handlers.fire(&e),
            Event::ReceiveViewChange(e) => self.receive_view_change_handlers.fire(&e),
            Event::ReceiveNewView(e) => self.receive_new_view_handlers.fire(&e),
            Event::StartView(e) => self.start_view_handlers.fire(&e),
            Event::ViewTimeout(e) => self.view_timeout_handlers.fire(&e),
            Event::ReceiveSyncRequest(e) => self.receive_sync_request_handlers.fire(&e),
            Event::SendSyncResponse(e) => self.send_sync_response_handlers.fire(&e),
        }
    }
}

/// Starts the event bus thread, which runs an infinite loop until a shutdown signal is received
/// from the parent thread. In each iteration of the loop, the thread checks if it received any
/// event notifications, and if so, then triggers the execution of the handlers defined for the
/// event.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("event_bus".to_string())
        .spawn(move || loop {
            match shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("event_bus thread disconnected from main thread")
                }
            }

            match event_subscriber.try_recv() {
                Ok(event) => event_handlers.fire_handlers(event),
                Err(TryRecvError::Empty) => thread::yield_now(),
                // The publishing threads are shutting down; drain stops here.
                Err(TryRecvError::Disconnected) => return,
            }
        })
        .unwrap()
}
