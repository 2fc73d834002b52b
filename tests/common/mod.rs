//! Shared fixtures for the integration tests

#![allow(dead_code)]

use secp256k1::{PublicKey, Secp256k1, SecretKey};
use utxo_ledger::block::genesis_block;
use utxo_ledger::opcode::OP_TRUE;
use utxo_ledger::sighash::SigHashType;
use utxo_ledger::standard::{p2pk_witness, pay_to_pubkey, sign_tx_input};
use utxo_ledger::types::*;

pub fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

pub fn keypair(seed: u8) -> (SecretKey, PublicKey) {
    let secret = SecretKey::from_slice(&[seed; 32]).unwrap();
    let public = PublicKey::from_secret_key(&Secp256k1::new(), &secret);
    (secret, public)
}

/// Genesis whose successor must be signed by `public`.
pub fn signed_genesis(public: &PublicKey) -> Block {
    genesis_block(pay_to_pubkey(public), 1_000)
}

/// Genesis whose successor needs no signature.
pub fn open_genesis() -> Block {
    genesis_block(vec![OP_TRUE], 1_000)
}

pub fn issuance(genesis: &Block, amount: u64, issuance_script: Vec<u8>) -> IssuanceCommitment {
    IssuanceCommitment {
        min_time: 0,
        max_time: u64::MAX,
        initial_block: genesis.hash(),
        amount,
        issuance_script,
        asset_definition: br#"{"name":"A"}"#.to_vec(),
    }
}

/// Issues `amount` units paid to `control_script`.
pub fn issue_tx(genesis: &Block, amount: u64, control_script: Vec<u8>) -> Tx {
    let issuance = issuance(genesis, amount, vec![OP_TRUE]);
    let asset = issuance.asset_id();
    Tx::new(TxData {
        inputs: vec![TxInput::issuance(issuance)],
        outputs: vec![TxOutput::new(asset, amount, control_script)],
        ..TxData::default()
    })
}

/// Spend input for output `index` of `prev`.
pub fn spend_of(prev: &Tx, index: u32) -> TxInput {
    let output = &prev.outputs[index as usize];
    TxInput::spend(
        prev.outpoint(index),
        output.asset_amount,
        output.control_script.clone(),
    )
}

/// Signs every input with `secret` under SIGHASH_ALL.
pub fn sign_all(mut data: TxData, secret: &SecretKey) -> Tx {
    for i in 0..data.inputs.len() {
        let sig = sign_tx_input(secret, &data, i, SigHashType::ALL).unwrap();
        data.inputs[i].signature_script = p2pk_witness(&sig);
    }
    Tx::new(data)
}
