/*
    A minimal account-based chain replicated by a fixed set of validators.

    Each height is decided in rounds. The round's proposer, fixed by
    (height + round) mod n, broadcasts a block. Validators prevote for it if
    it executes cleanly on their state, or nil otherwise. Once more than 2/3
    of the voting power prevotes the same block, validators lock on it and
    precommit; more than 2/3 of precommits for one block finalizes it. A
    round that fails to gather a quorum times out and the next proposer
    tries, with every timeout growing by half each round.

    Up to f < n/3 of the voting power may be arbitrarily faulty. Honest
    validators never finalize conflicting blocks at the same height.
*/

use std::time::Duration;

use bft_node::common::config::{ConsensusConfig, GenesisAccount, GenesisConfig, NetworkConfig, ValidatorConfig};
use bft_node::common::crypto::{short_hex, Keypair};
use bft_node::execution::Transaction;
use bft_node::network::{start_node, NetworkSimulator, NodeConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const VALIDATORS: u8 = 4;
const TARGET_HEIGHT: u64 = 10;
const CHAIN_ID: &str = "bft-demo";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let keys: Vec<Keypair> = (1..=VALIDATORS).map(|i| Keypair::from_seed(&[i; 32])).collect();
    let alice = Keypair::from_seed(&[0xa1; 32]);
    let bob = Keypair::from_seed(&[0xb0; 32]);

    let genesis = GenesisConfig {
        chain_id: CHAIN_ID.to_string(),
        validators: keys
            .iter()
            .map(|k| ValidatorConfig {
                pubkey: k.pubkey(),
                power: 1,
            })
            .collect(),
        balances: vec![GenesisAccount {
            account: alice.pubkey(),
            balance: 1_000,
        }],
        consensus: ConsensusConfig::default(),
        network: NetworkConfig::default(),
    };

    let (network, inboxes) = NetworkSimulator::new(genesis.network.clone(), keys.len())?;
    let mut nodes = Vec::with_capacity(keys.len());
    for (index, inbox) in inboxes.into_iter().enumerate() {
        let config = NodeConfig {
            index,
            keypair: keys[index].clone(),
            genesis: genesis.clone(),
        };
        nodes.push(start_node(config, network.clone(), inbox)?);
    }
    info!(validators = nodes.len(), chain = CHAIN_ID, "cluster started");

    for nonce in 1..=5 {
        let tx = Transaction::new_signed(&alice, bob.pubkey(), 10 * nonce, nonce, CHAIN_ID);
        let node = &nodes[nonce as usize % nodes.len()];
        match node.submit_transaction(tx).await {
            Ok(hash) => info!(nonce, via = node.index(), tx = %short_hex(&hash), "submitted transfer"),
            Err(e) => warn!(nonce, error = %e, "transfer rejected"),
        }
    }

    while nodes.iter().any(|n| n.finalized_height() < TARGET_HEIGHT && !n.is_finished()) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    for node in &nodes {
        let ledger = node.ledger();
        info!(
            validator = node.index(),
            height = ledger.height(),
            head = %short_hex(&ledger.tip_hash()),
            state = %short_hex(&node.state_commitment()),
            "chain head"
        );
    }
    let stats = network.stats();
    info!(
        sent = stats.sent,
        delivered = stats.delivered,
        dropped = stats.dropped,
        duplicated = stats.duplicated,
        "network"
    );

    for node in nodes {
        node.shutdown().await?;
    }
    Ok(())
}
