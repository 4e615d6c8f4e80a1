//! A simple, in-memory implementation of the external [`Ledger`].

use std::sync::{Arc, Mutex};

use pbft_rs::storage::{Ledger, LedgerConfig, LedgerError};
use pbft_rs::types::data_types::ProposalIndex;
use pbft_rs::types::proposal::Proposal;
use pbft_rs::types::validator_set::ValidatorSet;

/// An in-memory ledger that "executes" proposals by appending them to a vector. The proposal at
/// index `i` is stored at position `i - 1`.
#[derive(Clone)]
pub(crate) struct MemLedger {
    blocks: Arc<Mutex<Vec<Proposal>>>,
    validator_set: ValidatorSet,
}

impl MemLedger {
    pub(crate) fn new(validator_set: ValidatorSet) -> MemLedger {
        MemLedger {
            blocks: Arc::new(Mutex::new(Vec::new())),
            validator_set,
        }
    }

    pub(crate) fn height(&self) -> u64 {
        self.blocks.lock().unwrap().len() as u64
    }

    pub(crate) fn block_at(&self, index: u64) -> Option<Proposal> {
        if index == 0 {
            return None;
        }
        self.blocks.lock().unwrap().get((index - 1) as usize).cloned()
    }

    fn config_inner(&self, blocks: &Vec<Proposal>) -> LedgerConfig {
        LedgerConfig {
            validator_set: self.validator_set.clone(),
            latest_index: ProposalIndex::new(blocks.len() as u64),
        }
    }
}

impl Ledger for MemLedger {
    fn commit_block(&mut self, proposal: &Proposal) -> Result<LedgerConfig, LedgerError> {
        let mut blocks = self.blocks.lock().unwrap();
        let height = blocks.len() as u64;
        if proposal.index.int() <= height {
            // Replay of an already-executed proposal.
            return Ok(self.config_inner(&blocks));
        }
        if proposal.index.int() != height + 1 {
            return Err(LedgerError::Transient(format!(
                "proposal {} arrived while the ledger is at height {}",
                proposal.index, height
            )));
        }
        blocks.push(proposal.clone());
        Ok(self.config_inner(&blocks))
    }

    fn block(&self, index: ProposalIndex) -> Result<Option<Proposal>, LedgerError> {
        Ok(self.block_at(index.int()))
    }

    fn config(&self) -> Result<LedgerConfig, LedgerError> {
        let blocks = self.blocks.lock().unwrap();
        Ok(self.config_inner(&blocks))
    }
}
