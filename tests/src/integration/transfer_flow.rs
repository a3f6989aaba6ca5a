//! End-to-end transfer scenarios on a single-validator devnet node:
//! admission through the mempool, block production, execution, and
//! receipt persistence.

use crate::common::{address_of, devnet_params, genesis_with, keys, signed_transfer};
use bc_04_mempool::MempoolError;
use bc_05_execution::{ContractRegistry, NoopVerifier};
use node_runtime::{Node, NullNetwork};
use shared_types::{fees, Address, ChainParameters, U256};
use std::sync::Arc;

fn devnet_node(balances: &[u64]) -> Node {
    Node::new(
        devnet_params(),
        genesis_with(1, balances),
        Arc::new(NullNetwork),
        Some(keys(0)),
        Arc::new(NoopVerifier),
        ContractRegistry::with_builtins(),
    )
    .expect("node construction")
}

#[test]
fn simple_transfer_end_to_end() {
    let mut node = devnet_node(&[1_000_000_000_000]);
    let sender = address_of(100);
    let recipient = Address::from_bytes([0x02; 20]);

    let tx = signed_transfer(100, recipient, 0, 1_000, 1);
    let tx_hash = tx.hash();
    node.submit_transaction(tx).expect("admission");

    node.produce_block_now().expect("block production");

    assert_eq!(node.tip().number, 1);
    let receipt = node.receipt(&tx_hash).expect("receipt persisted");
    assert!(receipt.success);
    assert_eq!(receipt.gas_used, 21_000);
    assert_eq!(receipt.block_number, 1);
    assert_eq!(receipt.block_hash, node.tip().hash());

    let sender_account = node.state().account(&sender).unwrap();
    assert_eq!(sender_account.nonce, 1);
    // Effective price is 1: balance drops by value + gas.
    assert_eq!(
        sender_account.balance,
        U256::from(1_000_000_000_000u64 - 1_000 - 21_000)
    );
    assert_eq!(
        node.state().account(&recipient).unwrap().balance,
        U256::from(1_000u64)
    );

    // The block is retrievable by height and carries the state root the
    // cache reproduces.
    let block = node.block_by_height(1).expect("block by height");
    assert_eq!(block.header.state_root, node.state().committed_root());
    assert_eq!(block.transactions.len(), 1);
    assert!(block.certificate.is_some());
}

#[test]
fn nonce_gap_is_rejected_and_held_nonces_wait() {
    let mut node = devnet_node(&[1_000_000_000_000]);
    let recipient = Address::from_bytes([0x02; 20]);

    // Gap beyond the window of 4: rejected outright.
    let err = node
        .submit_transaction(signed_transfer(100, recipient, 5, 10, 1))
        .unwrap_err();
    assert!(matches!(err, MempoolError::NonceGap { .. }));

    // Nonce 0 is accepted; nonce 2 queues but cannot run before nonce 1.
    node.submit_transaction(signed_transfer(100, recipient, 0, 10, 1))
        .unwrap();
    node.submit_transaction(signed_transfer(100, recipient, 2, 10, 1))
        .unwrap();

    node.produce_block_now().unwrap();
    assert_eq!(node.block_by_height(1).unwrap().transactions.len(), 1);
    assert_eq!(node.state().account(&address_of(100)).unwrap().nonce, 1);

    // Still gapped: the held transaction stays out of block 2.
    node.produce_block_now().unwrap();
    assert_eq!(node.block_by_height(2).unwrap().transactions.len(), 0);

    // Close the gap; both dispatch in nonce order.
    node.submit_transaction(signed_transfer(100, recipient, 1, 10, 1))
        .unwrap();
    node.produce_block_now().unwrap();
    let block = node.block_by_height(3).unwrap();
    assert_eq!(
        block.transactions.iter().map(|t| t.nonce).collect::<Vec<_>>(),
        vec![1, 2]
    );
}

#[test]
fn base_fee_follows_the_adjustment_law() {
    // The literal arithmetic from the protocol rule: target 50M, parent at
    // 75M gas and 1 gwei moves to 1.0625 gwei.
    let mut params = ChainParameters::default();
    params.block_gas_limit = 100_000_000;
    params.elasticity_multiplier = 2;
    params.base_fee_change_denominator = 8;
    assert_eq!(
        fees::next_base_fee(U256::from(1_000_000_000u64), 75_000_000, 100_000_000, &params),
        U256::from(1_062_500_000u64)
    );
    // At target the fee holds; below it decreases.
    assert_eq!(
        fees::next_base_fee(U256::from(1_000_000_000u64), 50_000_000, 100_000_000, &params),
        U256::from(1_000_000_000u64)
    );
    assert!(
        fees::next_base_fee(U256::from(1_000_000_000u64), 10_000_000, 100_000_000, &params)
            < U256::from(1_000_000_000u64)
    );
}

#[test]
fn empty_blocks_are_valid() {
    let mut node = devnet_node(&[1_000_000]);
    node.produce_block_now().unwrap();
    node.produce_block_now().unwrap();
    assert_eq!(node.tip().number, 2);
    let block = node.block_by_height(2).unwrap();
    assert!(block.transactions.is_empty());
    assert_eq!(block.header.gas_used, 0);
}

#[tokio::test]
async fn node_loop_produces_blocks_until_shutdown() {
    let mut params = devnet_params();
    params.block_time_ms = 50;
    let node = Node::new(
        params,
        genesis_with(1, &[1_000_000]),
        Arc::new(NullNetwork),
        Some(keys(0)),
        Arc::new(NoopVerifier),
        ContractRegistry::with_builtins(),
    )
    .unwrap();

    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let handle = tokio::spawn(node.run(rx));
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    tx.send(node_runtime::NodeEvent::Shutdown).await.unwrap();
    handle.await.unwrap().unwrap();
}

#[test]
fn duplicate_submission_is_idempotent() {
    let mut node = devnet_node(&[1_000_000_000]);
    let tx = signed_transfer(100, Address::from_bytes([0x02; 20]), 0, 10, 1);
    node.submit_transaction(tx.clone()).unwrap();
    node.submit_transaction(tx).unwrap();
    node.produce_block_now().unwrap();
    assert_eq!(node.block_by_height(1).unwrap().transactions.len(), 1);
}
