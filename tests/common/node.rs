use std::time::Duration;

use ed25519_dalek::SigningKey;
use rand_core::OsRng;

use pbft_rs::config::Configuration;
use pbft_rs::replica::{Replica, ReplicaSpec, SubmitError};
use pbft_rs::types::crypto_primitives::sha256;
use pbft_rs::types::data_types::{ProposalData, ProposalIndex, Weight};
use pbft_rs::types::proposal::Proposal;
use pbft_rs::types::validator_set::ValidatorSet;
use pbft_rs::validator::{ProposalValidator, ValidatorError};

use crate::common::{mem_db::MemDB, mem_ledger::MemLedger, network::NetworkStub};

/// A validator that accepts every proposal. Content validation is outside the engine's scope, so
/// the tests only need the plumbing to run.
pub(crate) struct PassingValidator;

impl ProposalValidator for PassingValidator {
    fn verify_proposal(&self, _proposal: &Proposal) -> Result<bool, ValidatorError> {
        Ok(true)
    }
}

/// A running replica together with the external collaborators the tests observe it through.
pub(crate) struct Node {
    pub(crate) replica: Replica,
    pub(crate) ledger: MemLedger,
}

impl Node {
    pub(crate) fn start(
        keypair: SigningKey,
        network: NetworkStub,
        kv: MemDB,
        ledger: MemLedger,
        configuration: Configuration,
    ) -> Node {
        let replica = ReplicaSpec::new(
            keypair,
            network,
            kv,
            ledger.clone(),
            PassingValidator,
            configuration,
        )
        .start();

        Node { replica, ledger }
    }

    /// Submit a candidate block for `index`, ignoring the submission outcome.
    pub(crate) fn submit(&self, index: u64, payload: &[u8]) {
        self.replica.submit_proposal(
            ProposalData::new(payload.to_vec()),
            ProposalIndex::new(index),
            sha256(payload),
            |_| {},
        );
    }

    /// Submit a candidate block for `index` and return the submission outcome over a channel.
    pub(crate) fn submit_expecting(&self, index: u64, payload: &[u8]) -> Result<(), SubmitError> {
        let (sender, receiver) = std::sync::mpsc::channel();
        self.replica.submit_proposal(
            ProposalData::new(payload.to_vec()),
            ProposalIndex::new(index),
            sha256(payload),
            move |outcome| {
                let _ = sender.send(outcome);
            },
        );
        receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("no submission outcome arrived")
    }

    pub(crate) fn committed_index(&self) -> u64 {
        self.replica.committed_index().int()
    }

    pub(crate) fn ledger_height(&self) -> u64 {
        self.ledger.height()
    }
}

/// Generate `n` signing keys sorted ascending by verifying key bytes, so that the i-th key belongs
/// to the node with replica index i.
pub(crate) fn sorted_keypairs(n: usize) -> Vec<SigningKey> {
    let mut csprg = OsRng {};
    let mut keypairs: Vec<SigningKey> = (0..n).map(|_| SigningKey::generate(&mut csprg)).collect();
    keypairs.sort_by_key(|kp| kp.verifying_key().to_bytes());
    keypairs
}

/// The validator set containing every provided key with weight 1.
pub(crate) fn validator_set_of(keypairs: &[SigningKey]) -> ValidatorSet {
    let mut validator_set = ValidatorSet::new();
    for keypair in keypairs {
        validator_set.put(&keypair.verifying_key(), Weight::new(1));
    }
    validator_set
}
