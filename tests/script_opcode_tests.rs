//! Predicate VM and pay-to-contract tests across module boundaries

mod common;

use common::*;
use utxo_ledger::engine::{Engine, ExecutionContext};
use utxo_ledger::error::{FailureReason, ScriptError};
use utxo_ledger::opcode::OP_TRUE;
use utxo_ledger::p2c::{build_p2c, build_p2c_inline, contract_hash, p2c_inline_witness, p2c_witness, parse_p2c};
use utxo_ledger::script::{assemble, disassemble, parse_script};
use utxo_ledger::*;

#[test]
fn test_text_form_round_trip() {
    let programs = [
        "DUP HASH256 0x20{} EQUALVERIFY EVAL",
        "0 5 DUP WHILE SWAP 1ADD SWAP 1SUB DUP ENDWHILE DROP 5 NUMEQUAL",
        "'hello' SIZE 5 NUMEQUALVERIFY 1 IF 2 ELSE 3 ENDIF",
        "-1 16 17 1000 0x4c0100 PUSHDATA2 0x0000",
    ];
    for text in programs {
        let text = text.replace("{}", &"ab".repeat(32));
        let script = assemble(&text).unwrap();
        let rendered = disassemble(&script).unwrap();
        assert_eq!(assemble(&rendered).unwrap(), script, "{rendered}");
    }
}

#[test]
fn test_step_trace_is_deterministic() {
    let params = ConsensusParams::default();
    let predicate = assemble("0 5 DUP WHILE SWAP 1ADD SWAP 1SUB DUP ENDWHILE DROP 5 NUMEQUAL").unwrap();

    let trace = || {
        let mut engine = Engine::new(&params, ExecutionContext::Standalone);
        engine.prepare(0, &[], &predicate).unwrap();
        let mut steps = Vec::new();
        loop {
            let done = engine.step().unwrap();
            steps.push((engine.ops_used(), engine.stack().to_vec()));
            if done {
                break;
            }
        }
        assert!(engine.is_finished());
        steps
    };

    let first = trace();
    assert_eq!(first, trace());
    assert!(first.len() > parse_script(&predicate).unwrap().len());
    assert_eq!(first.last().unwrap().1, vec![vec![1u8]]);
}

#[test]
fn test_budget_bounds_loops() {
    let params = ConsensusParams {
        max_script_ops: 50,
        ..ConsensusParams::default()
    };
    let forever = assemble("1 WHILE 1 ENDWHILE").unwrap();
    let err = utxo_ledger::engine::verify_script(&params, ExecutionContext::Standalone, 0, &[], &forever)
        .unwrap_err();
    assert_eq!(err.kind, ScriptError::BudgetExceeded(50));
}

/// Pays the input's full value to `script`, claiming the output.
fn covenant_body() -> Vec<u8> {
    assemble("AMOUNT ASSET ROT RESERVEOUTPUT").unwrap()
}

#[test]
fn test_p2c_covenant_in_transaction() {
    let validator = Validator::new();
    let genesis = open_genesis();
    let body = covenant_body();
    let recipient = vec![OP_TRUE, OP_TRUE];
    let predicate = build_p2c(&contract_hash(&body), &[recipient.clone()]);
    let parsed = parse_p2c(&predicate).unwrap();
    assert_eq!(parsed.params, vec![recipient.clone()]);

    let mut state = Snapshot::new();
    let funding = issue_tx(&genesis, 25, predicate);
    let asset = funding.outputs[0].asset_amount.asset_id;
    validator.validate_tx(&funding, &state, 0).unwrap();
    validator.apply_tx(&funding, &mut state).unwrap();

    let spend = |to: Vec<u8>| {
        let mut input = spend_of(&funding, 0);
        input.signature_script = p2c_witness(&[], &body);
        Tx::new(TxData {
            inputs: vec![input],
            outputs: vec![TxOutput::new(asset, 25, to)],
            ..TxData::default()
        })
    };

    validator.validate_tx(&spend(recipient), &state, 0).unwrap();

    match validator.validate_tx(&spend(vec![OP_TRUE]), &state, 0) {
        Err(ConsensusError::TxUnauthorized { source, .. }) => {
            assert_eq!(source.kind, ScriptError::Failed(FailureReason::FalseResult));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_two_inputs_cannot_share_one_output() {
    let validator = Validator::new();
    let genesis = open_genesis();
    let body = covenant_body();
    let recipient = vec![OP_TRUE, OP_TRUE];
    let predicate = build_p2c_inline(&body, &[recipient.clone()]);

    let mut state = Snapshot::new();
    let funding = issue_tx(&genesis, 30, predicate.clone());
    let asset = funding.outputs[0].asset_amount.asset_id;
    let split = Tx::new(TxData {
        inputs: vec![spend_of(&funding, 0)],
        outputs: vec![
            TxOutput::new(asset, 15, predicate.clone()),
            TxOutput::new(asset, 15, predicate),
        ],
        ..TxData::default()
    });
    // the split itself breaks the covenant, so it is booked without validation
    for tx in [&funding, &split] {
        validator.apply_tx(tx, &mut state).unwrap();
    }

    let mut inputs = vec![spend_of(&split, 0), spend_of(&split, 1)];
    for input in &mut inputs {
        input.signature_script = p2c_inline_witness(&[]);
    }
    let merged = Tx::new(TxData {
        inputs: inputs.clone(),
        outputs: vec![TxOutput::new(asset, 15, recipient.clone()), TxOutput::new(asset, 15, vec![OP_TRUE])],
        ..TxData::default()
    });
    assert!(matches!(
        validator.validate_tx(&merged, &state, 0),
        Err(ConsensusError::TxUnauthorized { input: 1, .. })
    ));

    let paired = Tx::new(TxData {
        inputs,
        outputs: vec![TxOutput::new(asset, 15, recipient.clone()), TxOutput::new(asset, 15, recipient)],
        ..TxData::default()
    });
    validator.validate_tx(&paired, &state, 0).unwrap();
}
