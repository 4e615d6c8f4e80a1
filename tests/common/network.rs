//! A "mock" (totally local) network for passing wire envelopes between nodes.

use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use pbft_rs::networking::Network;
use pbft_rs::types::crypto_primitives::VerifyingKey;
use pbft_rs::types::validator_set::ValidatorSet;

type Inboxes = Arc<Mutex<HashMap<VerifyingKey, Sender<(VerifyingKey, Vec<u8>)>>>>;

/// A network stub that passes messages to and from nodes using channels.
///
/// The peer map is shared between all stubs of a cluster, so a restarted node can
/// [`rebind`](NetworkStub::rebind) a fresh inbox under its key and receive traffic again.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_verifying_key: VerifyingKey,
    all_peers: Inboxes,
    inbox: Arc<Mutex<Receiver<(VerifyingKey, Vec<u8>)>>>,
}

impl Network for NetworkStub {
    fn init_validator_set(&mut self, _: ValidatorSet) {}

    fn send(&mut self, peer: VerifyingKey, message: Vec<u8>) {
        if let Some(peer) = self.all_peers.lock().unwrap().get(&peer) {
            let _ = peer.send((self.my_verifying_key, message));
        }
    }

    fn broadcast(&mut self, message: Vec<u8>) {
        for (_, peer) in self.all_peers.lock().unwrap().iter() {
            let _ = peer.send((self.my_verifying_key, message.clone()));
        }
    }

    fn recv(&mut self) -> Option<(VerifyingKey, Vec<u8>)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            // The inbox was rebound to a restarted stub; this stub no longer receives.
            Err(TryRecvError::Disconnected) => None,
        }
    }
}

impl NetworkStub {
    /// Replace the inbox registered under `key` with a fresh one and return a stub that reads from
    /// it. Used to bring a restarted node back onto the mock network.
    pub(crate) fn rebind(&self, key: VerifyingKey) -> NetworkStub {
        let (sender, receiver) = mpsc::channel();
        self.all_peers.lock().unwrap().insert(key, sender);
        NetworkStub {
            my_verifying_key: key,
            all_peers: self.all_peers.clone(),
            inbox: Arc::new(Mutex::new(receiver)),
        }
    }
}

/// Create a vector of `NetworkStub`s, connecting the provided set of `peers`.
///
/// `NetworkStub`s feature in the returned vector in the same order as the provided `peers`, i.e.,
/// the i-th network stub is the network stub for the i-th peer.
pub(crate) fn mock_network(peers: impl Iterator<Item = VerifyingKey>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(VerifyingKey, Receiver<(VerifyingKey, Vec<u8>)>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer, sender);

            (peer, receiver)
        })
        .collect();
    let all_peers: Inboxes = Arc::new(Mutex::new(all_peers));

    peer_and_inboxes
        .into_iter()
        .map(|(my_verifying_key, inbox)| NetworkStub {
            my_verifying_key,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}
