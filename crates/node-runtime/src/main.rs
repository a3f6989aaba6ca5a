//! # Basalt Node
//!
//! Entry point. Reads an optional JSON config (first argument), falls back
//! to a single-validator in-memory devnet, and runs the node until SIGINT.

use anyhow::Context;
use node_runtime::{GenesisConfig, GenesisValidator, Node, NodeEvent, NodeKeys, NullNetwork};
use bc_05_execution::{ContractRegistry, NoopVerifier};
use shared_crypto::{derive_address, BlsKeyPair, Ed25519KeyPair};
use shared_types::{ChainParameters, U256};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(serde::Deserialize, Default)]
struct NodeConfigFile {
    #[serde(default)]
    params: Option<ChainParameters>,
    #[serde(default)]
    genesis: Option<GenesisConfig>,
    /// Seed for the devnet validator keys. Real deployments load key files;
    /// the devnet derives them deterministically.
    #[serde(default)]
    key_seed: Option<u64>,
}

fn devnet(seed: u64) -> (ChainParameters, GenesisConfig, NodeKeys) {
    let ed = Ed25519KeyPair::from_seed(seed);
    let bls = BlsKeyPair::from_seed(seed);
    let address = derive_address(&ed.public_key().to_value());

    let mut params = ChainParameters::default();
    params.validator_set_size = 1;
    params.validator_index = 0;

    let genesis = GenesisConfig {
        accounts: vec![(address, U256::from(1_000_000_000_000u64))],
        validators: vec![GenesisValidator {
            address,
            ed25519_pubkey: ed.public_key().to_value(),
            bls_pubkey: bls.public_key().to_value(),
            stake: params.min_validator_stake,
        }],
        timestamp: 1_700_000_000,
    };
    (params, genesis, NodeKeys { ed25519: ed, bls })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config: NodeConfigFile = match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing config {path}"))?
        }
        None => NodeConfigFile::default(),
    };

    let seed = config.key_seed.unwrap_or(0);
    let (default_params, default_genesis, keys) = devnet(seed);
    let params = config.params.unwrap_or(default_params);
    let genesis = config.genesis.unwrap_or(default_genesis);

    info!(chain_id = params.chain_id, block_time_ms = params.block_time_ms, "starting basalt node");

    let node = Node::new(
        params,
        genesis,
        Arc::new(NullNetwork),
        Some(keys),
        Arc::new(NoopVerifier),
        ContractRegistry::with_builtins(),
    )?;

    let (tx, rx) = mpsc::channel::<NodeEvent>(1024);
    let shutdown = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown.send(NodeEvent::Shutdown).await;
        }
    });

    node.run(rx).await
}
