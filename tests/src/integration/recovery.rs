//! Crash-recovery scenarios: a node restarted over the same store must
//! restore the flat cache, reproduce the stored state root, and resume at
//! the next height, and must refuse to run on tampered state.

use crate::common::{address_of, devnet_params, genesis_with, keys, signed_transfer};
use bc_02_storage::{ColumnFamily, KeyValueStore, MemoryStore, WriteBatch};
use bc_05_execution::{ContractRegistry, NoopVerifier};
use node_runtime::{Node, NullNetwork};
use shared_types::Address;
use std::sync::Arc;

fn node_over(store: Arc<dyn KeyValueStore>) -> anyhow::Result<Node> {
    Node::with_store(
        devnet_params(),
        genesis_with(1, &[1_000_000_000_000]),
        store,
        Arc::new(NullNetwork),
        Some(keys(0)),
        Arc::new(NoopVerifier),
        ContractRegistry::with_builtins(),
    )
}

#[test]
fn restart_resumes_at_next_height() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let recipient = Address::from_bytes([0x02; 20]);

    let tip_hash;
    {
        let mut node = node_over(store.clone()).unwrap();
        node.submit_transaction(signed_transfer(100, recipient, 0, 500, 1))
            .unwrap();
        node.produce_block_now().unwrap();
        node.produce_block_now().unwrap();
        node.produce_block_now().unwrap();
        assert_eq!(node.tip().number, 3);
        tip_hash = node.tip().hash();
        // Killed here: the node is dropped without any shutdown dance.
    }

    let mut restarted = node_over(store).unwrap();
    assert_eq!(restarted.tip().number, 3);
    assert_eq!(restarted.tip().hash(), tip_hash);
    assert_eq!(
        restarted.state().account(&recipient).unwrap().balance,
        shared_types::U256::from(500u64)
    );

    // Consensus resumes at height 4.
    restarted.produce_block_now().unwrap();
    assert_eq!(restarted.tip().number, 4);
    assert_eq!(
        restarted.block_by_height(4).unwrap().header.parent_hash,
        tip_hash
    );
}

#[test]
fn restart_refuses_tampered_state() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    {
        let mut node = node_over(store.clone()).unwrap();
        node.produce_block_now().unwrap();
    }

    // Corrupt one account row behind the node's back.
    let rows = store.scan_prefix(ColumnFamily::State, &[0x01]).unwrap();
    let (key, mut value) = rows.into_iter().next().expect("an account row");
    value[8] ^= 0xff; // flip a balance byte
    let mut batch = WriteBatch::new();
    batch.put(ColumnFamily::State, key, value);
    store.commit(batch).unwrap();

    let err = node_over(store).err().expect("startup must fail");
    assert!(
        format!("{err:#}").contains("refusing to run"),
        "unexpected error: {err:#}"
    );
}

#[test]
fn receipts_survive_restart() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let tx = signed_transfer(100, Address::from_bytes([0x02; 20]), 0, 500, 1);
    let tx_hash = tx.hash();
    {
        let mut node = node_over(store.clone()).unwrap();
        node.submit_transaction(tx).unwrap();
        node.produce_block_now().unwrap();
    }
    let restarted = node_over(store).unwrap();
    let receipt = restarted.receipt(&tx_hash).expect("receipt after restart");
    assert!(receipt.success);
    assert_eq!(receipt.block_number, 1);
}
