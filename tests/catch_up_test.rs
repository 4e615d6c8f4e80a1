use std::time::Duration;

use log::LevelFilter;

use pbft_rs::config::Configuration;

mod common;

use crate::common::{
    logging::setup_logger,
    mem_db::MemDB,
    mem_ledger::MemLedger,
    network::mock_network,
    node::{sorted_keypairs, validator_set_of, Node},
    wait_until,
};

fn payload(index: u64) -> Vec<u8> {
    format!("block-{}", index).into_bytes()
}

/// A replica that lost its state rejoins the cluster far behind the quorum. The view changes that
/// the others broadcast carry their committed frontier, which triggers the lagging replica to
/// stream the missed committed proposals through log sync and replay them into its ledger.
#[test]
fn lagging_replica_catches_up_through_log_sync() {
    setup_logger(LevelFilter::Info);

    let keypairs = sorted_keypairs(4);
    let validator_set = validator_set_of(&keypairs);
    let networks = mock_network(keypairs.iter().map(|kp| kp.verifying_key()));
    let configuration = Configuration::builder()
        .consensus_timeout(Duration::from_secs(1))
        .build();

    let mut nodes: Vec<Node> = keypairs
        .iter()
        .zip(&networks)
        .map(|(keypair, network)| {
            Node::start(
                keypair.clone(),
                network.clone(),
                MemDB::new(),
                MemLedger::new(validator_set.clone()),
                configuration.clone(),
            )
        })
        .collect();

    // Commit three proposals; their leaders under view 0 are nodes 1, 2 and 3.
    for index in 1..=3u64 {
        let leader = (index % 4) as usize;
        nodes[leader].submit(index, &payload(index));
        wait_until(
            Duration::from_secs(10),
            &format!("every node commits index {}", index),
            || nodes.iter().all(|node| node.committed_index() >= index),
        );
    }

    // Node 0 loses its disk and rejoins empty. Nothing new is submitted, so the next progress the
    // cluster makes is through view changes, which is exactly what advertises the quorum's
    // committed frontier to the lagging node.
    nodes.remove(0);
    nodes.insert(
        0,
        Node::start(
            keypairs[0].clone(),
            networks[0].rebind(keypairs[0].verifying_key()),
            MemDB::new(),
            MemLedger::new(validator_set.clone()),
            configuration.clone(),
        ),
    );
    assert_eq!(nodes[0].committed_index(), 0);

    wait_until(
        Duration::from_secs(30),
        "the lagging node recovers the committed proposals",
        || nodes[0].committed_index() >= 3,
    );
    for index in 1..=3u64 {
        assert_eq!(
            nodes[0].ledger.block_at(index).unwrap().hash,
            nodes[1].ledger.block_at(index).unwrap().hash,
        );
    }
}
