use std::time::Duration;

use log::LevelFilter;

use pbft_rs::config::Configuration;
use pbft_rs::types::crypto_primitives::empty_hash;

mod common;

use crate::common::{
    logging::setup_logger,
    mem_db::MemDB,
    mem_ledger::MemLedger,
    network::mock_network,
    node::{sorted_keypairs, validator_set_of, Node},
    wait_until,
};

/// When the leader of the next index stays silent, the view change timer drives the cluster into
/// a new view whose leader reissues an empty block for the unfinished index, and consensus commits
/// it. Liveness does not depend on the silent leader.
#[test]
fn view_change_commits_an_empty_block_when_the_leader_is_silent() {
    setup_logger(LevelFilter::Info);

    let keypairs = sorted_keypairs(4);
    let validator_set = validator_set_of(&keypairs);
    let networks = mock_network(keypairs.iter().map(|kp| kp.verifying_key()));
    let configuration = Configuration::builder()
        .consensus_timeout(Duration::from_millis(500))
        .build();
    let nodes: Vec<Node> = keypairs
        .into_iter()
        .zip(networks)
        .map(|(keypair, network)| {
            Node::start(
                keypair,
                network,
                MemDB::new(),
                MemLedger::new(validator_set.clone()),
                configuration.clone(),
            )
        })
        .collect();

    // Nobody submits anything: the leader of index 1 (node 1) is effectively silent. After the
    // consensus timeout every node broadcasts a view change, and the leader of the target view
    // fills index 1 with an empty block.
    wait_until(
        Duration::from_secs(20),
        "every node commits the empty block at index 1",
        || nodes.iter().all(|node| node.committed_index() >= 1),
    );

    for node in &nodes {
        let block = node.ledger.block_at(1).unwrap();
        assert_eq!(block.hash, empty_hash());
        assert!(block.data.is_none());
    }
}
