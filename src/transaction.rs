//! Transaction validation and application
//!
//! A transaction moves through `well-formed → timely → inputs present →
//! authorized → applied`, stopping at the first failed check. Every check
//! runs before the state view is touched; `apply_tx` mutates it only once
//! the inputs are known to be unspent.

use crate::codec::output_commitment;
use crate::config::ConsensusParams;
use crate::constants::*;
use crate::engine::{Engine, ExecutionContext};
use crate::error::{ConsensusError, Result, TxViolation};
use crate::hashing::hash256;
use crate::script::{disassemble_lossy, is_unspendable};
use crate::state::StateView;
use crate::types::{AssetId, InputCommitment, Outpoint, Tx, TxData};
use log::debug;
use std::collections::BTreeMap;

/// Per-asset flows of one transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssetFlow {
    /// Sum of spend inputs
    pub spent: i128,
    /// Sum of issuance inputs
    pub issued: i128,
    /// Some input issues this asset, possibly zero units
    pub issuing: bool,
    /// Sum of outputs, destroyed ones included
    pub output: i128,
}

impl AssetFlow {
    /// Spent value not carried into outputs. Must be zero for plain
    /// transfers and may not be positive for issued assets.
    pub fn balance(&self) -> i128 {
        self.spent - self.output
    }

    pub fn is_issued(&self) -> bool {
        self.issuing
    }
}

/// Totals per asset, keyed in asset order.
pub fn asset_flows(tx: &TxData) -> BTreeMap<AssetId, AssetFlow> {
    let mut flows: BTreeMap<AssetId, AssetFlow> = BTreeMap::new();
    for input in &tx.inputs {
        let flow = flows.entry(input.asset_id()).or_default();
        let amount = i128::from(input.amount());
        match input.commitment {
            InputCommitment::Spend(_) => flow.spent += amount,
            InputCommitment::Issuance(_) => {
                flow.issued += amount;
                flow.issuing = true;
            }
        }
    }
    for output in &tx.outputs {
        let flow = flows.entry(output.asset_amount.asset_id).or_default();
        flow.output += i128::from(output.asset_amount.amount);
    }
    flows
}

/// Structural and balance rules, independent of state and time.
pub fn check_tx_well_formed(tx: &TxData, params: &ConsensusParams) -> Result<()> {
    // 1. Version and counts
    if tx.version != CURRENT_TX_VERSION {
        return Err(TxViolation::UnsupportedVersion(tx.version).into());
    }
    if tx.inputs.is_empty() {
        return Err(TxViolation::NoInputs.into());
    }
    if tx.inputs.len() > params.max_inputs {
        return Err(TxViolation::TooManyInputs(tx.inputs.len()).into());
    }
    if tx.outputs.len() > params.max_outputs {
        return Err(TxViolation::TooManyOutputs(tx.outputs.len()).into());
    }

    // 2. Per-input commitments
    let mut spent: BTreeMap<Outpoint, usize> = BTreeMap::new();
    for (i, input) in tx.inputs.iter().enumerate() {
        if input.amount() > MAX_AMOUNT {
            return Err(TxViolation::InputAmountTooLarge { input: i }.into());
        }
        for script in [input.predicate(), input.signature_script.as_slice()] {
            if script.len() > params.max_script_size {
                return Err(TxViolation::ScriptTooLarge { len: script.len() }.into());
            }
        }
        match &input.commitment {
            InputCommitment::Spend(spend) => {
                if let Some(first) = spent.insert(spend.outpoint, i) {
                    return Err(TxViolation::DuplicateInput {
                        first,
                        second: i,
                        outpoint: spend.outpoint,
                    }
                    .into());
                }
            }
            InputCommitment::Issuance(issuance) => {
                if issuance.min_time > issuance.max_time {
                    return Err(TxViolation::InvalidIssuanceWindow { input: i }.into());
                }
                if let Some(expected) = params.initial_block_hash {
                    if issuance.initial_block != expected {
                        return Err(TxViolation::WrongInitialBlock {
                            input: i,
                            expected,
                            actual: issuance.initial_block,
                        }
                        .into());
                    }
                }
            }
        }
    }

    // 3. Outputs
    let flows = asset_flows(tx);
    for (i, output) in tx.outputs.iter().enumerate() {
        let amount = output.asset_amount.amount;
        if amount > MAX_AMOUNT {
            return Err(TxViolation::OutputAmountTooLarge { output: i }.into());
        }
        if output.control_script.len() > params.max_script_size {
            return Err(TxViolation::ScriptTooLarge {
                len: output.control_script.len(),
            }
            .into());
        }
        let issued = flows
            .get(&output.asset_amount.asset_id)
            .is_some_and(AssetFlow::is_issued);
        if amount == 0 && !issued {
            return Err(TxViolation::ZeroAmountOutput { output: i }.into());
        }
    }

    // 4. Balances
    for (asset, flow) in &flows {
        let balance = flow.balance();
        if flow.is_issued() {
            if balance > 0 {
                return Err(TxViolation::IssuedAssetUnbalanced {
                    asset: *asset,
                    balance,
                }
                .into());
            }
            if -balance > flow.issued {
                return Err(TxViolation::IssuanceExceeded {
                    asset: *asset,
                    excess: -balance - flow.issued,
                }
                .into());
            }
        } else if balance != 0 {
            return Err(TxViolation::UnbalancedAsset {
                asset: *asset,
                balance,
            }
            .into());
        }
    }

    Ok(())
}

/// Time rules against the context `timestamp`. Lock times and issuance
/// windows that have not opened yet make the transaction not yet valid; a
/// closed issuance window makes it invalid for good.
pub fn check_tx_timing(tx: &TxData, timestamp: u64) -> Result<()> {
    if tx.lock_time > timestamp {
        return Err(ConsensusError::TxNotYetValid {
            required: tx.lock_time,
            timestamp,
        });
    }
    for (i, input) in tx.inputs.iter().enumerate() {
        if let InputCommitment::Issuance(issuance) = &input.commitment {
            if issuance.min_time > timestamp {
                return Err(ConsensusError::TxNotYetValid {
                    required: issuance.min_time,
                    timestamp,
                });
            }
            if issuance.max_time < timestamp {
                return Err(TxViolation::IssuanceExpired {
                    input: i,
                    max_time: issuance.max_time,
                    timestamp,
                }
                .into());
            }
        }
    }
    Ok(())
}

/// Every spend must name an unspent output whose commitment matches the
/// asset, amount and predicate it claims.
pub fn check_tx_inputs<S: StateView + ?Sized>(tx: &TxData, state: &S) -> Result<()> {
    for (i, input) in tx.inputs.iter().enumerate() {
        if let InputCommitment::Spend(spend) = &input.commitment {
            let commitment = state
                .utxo(&spend.outpoint)
                .ok_or(ConsensusError::UtxoNotFound {
                    input: i,
                    outpoint: spend.outpoint,
                })?;
            if commitment != output_commitment(&spend.asset_amount, &spend.prev_script) {
                return Err(TxViolation::CommitmentMismatch {
                    input: i,
                    outpoint: spend.outpoint,
                }
                .into());
            }
        }
    }
    Ok(())
}

/// A transaction whose outputs are still unspent has already been applied;
/// replaying it would recreate them.
pub fn check_tx_outputs_fresh<S: StateView + ?Sized>(tx: &Tx, state: &S) -> Result<()> {
    for (i, output) in tx.outputs.iter().enumerate() {
        if is_unspendable(&output.control_script) {
            continue;
        }
        let outpoint = tx.outpoint(i as u32);
        if state.contains_utxo(&outpoint) {
            return Err(TxViolation::OutputExists {
                output: i,
                outpoint,
            }
            .into());
        }
    }
    Ok(())
}

/// Window end of an issuance transaction: the earliest `max_time` among
/// its issuance inputs. `None` for plain transfers.
pub fn issuance_expiry(tx: &TxData) -> Option<u64> {
    tx.inputs
        .iter()
        .filter_map(|input| match &input.commitment {
            InputCommitment::Issuance(issuance) => Some(issuance.max_time),
            InputCommitment::Spend(_) => None,
        })
        .min()
}

/// An issuance transaction applies at most once while its window is open.
pub fn check_issuance_fresh<S: StateView + ?Sized>(tx: &Tx, state: &S) -> Result<()> {
    if issuance_expiry(tx).is_some() && state.issuance_applied(&tx.hash()) {
        return Err(TxViolation::IssuanceReplayed { tx: tx.hash() }.into());
    }
    Ok(())
}

/// Runs every input's witness against its predicate. One engine serves the
/// whole transaction so output reservations are shared between inputs.
pub fn authorize_tx(tx: &TxData, params: &ConsensusParams, timestamp: u64) -> Result<()> {
    let mut engine = Engine::new(params, ExecutionContext::Transaction { tx, timestamp });
    for (i, input) in tx.inputs.iter().enumerate() {
        if let Err(source) = engine.run(i, &input.signature_script, input.predicate()) {
            return Err(ConsensusError::TxUnauthorized {
                input: i,
                source,
                predicate: disassemble_lossy(input.predicate()),
                witness: disassemble_lossy(&input.signature_script),
            });
        }
    }
    Ok(())
}

/// All checks short of application.
pub fn validate_tx<S: StateView + ?Sized>(
    tx: &Tx,
    state: &S,
    params: &ConsensusParams,
    timestamp: u64,
) -> Result<()> {
    let result = check_tx_well_formed(tx, params)
        .and_then(|()| check_tx_timing(tx, timestamp))
        .and_then(|()| check_tx_inputs(tx, state))
        .and_then(|()| check_tx_outputs_fresh(tx, state))
        .and_then(|()| check_issuance_fresh(tx, state))
        .and_then(|()| authorize_tx(tx, params, timestamp));
    if let Err(err) = &result {
        debug!("rejected tx {}: {}", tx.hash(), err);
    }
    result
}

/// Applies a validated transaction: consumes its spends, records
/// definitions and destructions, creates its outputs and books net issuance.
pub fn apply_tx<S: StateView + ?Sized>(tx: &Tx, state: &mut S) -> Result<()> {
    check_tx_inputs(tx, state)?;
    check_tx_outputs_fresh(tx, state)?;
    check_issuance_fresh(tx, state)?;

    for (i, input) in tx.inputs.iter().enumerate() {
        match &input.commitment {
            InputCommitment::Spend(spend) => {
                state
                    .consume_utxo(&spend.outpoint)
                    .ok_or(ConsensusError::UtxoNotFound {
                        input: i,
                        outpoint: spend.outpoint,
                    })?;
            }
            InputCommitment::Issuance(issuance) => {
                if !issuance.asset_definition.is_empty() {
                    state.set_asset_definition(
                        issuance.asset_id(),
                        hash256(&issuance.asset_definition),
                    );
                }
            }
        }
    }

    for (index, output) in tx.outputs.iter().enumerate() {
        let asset_amount = output.asset_amount;
        if is_unspendable(&output.control_script) {
            state.record_destruction(asset_amount.asset_id, asset_amount.amount)?;
        } else {
            state.insert_utxo(tx.outpoint(index as u32), output.commitment())?;
        }
    }

    for (asset, flow) in asset_flows(tx) {
        if flow.is_issued() {
            let net = flow.output - flow.spent;
            let net = u64::try_from(net).map_err(|_| {
                ConsensusError::StateCorruption(format!(
                    "net issuance {} of asset {} out of range",
                    net, asset
                ))
            })?;
            state.record_issuance(asset, net)?;
        }
    }
    if let Some(expires) = issuance_expiry(tx) {
        state.remember_issuance(tx.hash(), expires);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureReason, ScriptError};
    use crate::opcode::{OP_RETURN, OP_TRUE};
    use crate::state::Snapshot;
    use crate::types::{AssetAmount, Hash, IssuanceCommitment, TxInput, TxOutput};

    const ASSET_A: Hash = Hash([0xaa; 32]);
    const ASSET_B: Hash = Hash([0xbb; 32]);

    fn spend(n: u8, asset: AssetId, amount: u64) -> TxInput {
        TxInput::spend(
            Outpoint::new(Hash([n; 32]), 0),
            AssetAmount::new(asset, amount),
            vec![OP_TRUE],
        )
    }

    fn issuance(amount: u64) -> TxInput {
        TxInput::issuance(IssuanceCommitment {
            min_time: 0,
            max_time: 100,
            initial_block: Hash([1; 32]),
            amount,
            issuance_script: vec![OP_TRUE],
            asset_definition: b"{\"name\":\"a\"}".to_vec(),
        })
    }

    fn tx(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Tx {
        Tx::new(TxData {
            inputs,
            outputs,
            ..TxData::default()
        })
    }

    fn state_with(inputs: &[TxInput]) -> Snapshot {
        let mut state = Snapshot::new();
        for input in inputs {
            if let InputCommitment::Spend(spend) = &input.commitment {
                state
                    .insert_utxo(
                        spend.outpoint,
                        output_commitment(&spend.asset_amount, &spend.prev_script),
                    )
                    .unwrap();
            }
        }
        state
    }

    fn violation(result: Result<()>) -> TxViolation {
        match result.unwrap_err() {
            ConsensusError::TxMalformed(violation) => violation,
            other => panic!("expected a malformed tx, got {other}"),
        }
    }

    #[test]
    fn test_balanced_transfer() {
        let params = ConsensusParams::default();
        let t = tx(
            vec![spend(1, ASSET_A, 7), spend(2, ASSET_A, 3)],
            vec![TxOutput::new(ASSET_A, 10, vec![OP_TRUE])],
        );
        check_tx_well_formed(&t, &params).unwrap();
    }

    #[test]
    fn test_no_inputs() {
        let params = ConsensusParams::default();
        let t = tx(vec![], vec![TxOutput::new(ASSET_A, 1, vec![OP_TRUE])]);
        assert_eq!(violation(check_tx_well_formed(&t, &params)), TxViolation::NoInputs);
    }

    #[test]
    fn test_duplicate_input() {
        let params = ConsensusParams::default();
        let t = tx(
            vec![spend(1, ASSET_A, 5), spend(1, ASSET_A, 5)],
            vec![TxOutput::new(ASSET_A, 10, vec![OP_TRUE])],
        );
        assert!(matches!(
            violation(check_tx_well_formed(&t, &params)),
            TxViolation::DuplicateInput { first: 0, second: 1, .. }
        ));
    }

    #[test]
    fn test_overspend_underspend_and_swap() {
        let params = ConsensusParams::default();
        let over = tx(vec![spend(1, ASSET_A, 5)], vec![TxOutput::new(ASSET_A, 6, vec![OP_TRUE])]);
        assert_eq!(
            violation(check_tx_well_formed(&over, &params)),
            TxViolation::UnbalancedAsset { asset: ASSET_A, balance: -1 }
        );

        let under = tx(vec![spend(1, ASSET_A, 5)], vec![TxOutput::new(ASSET_A, 4, vec![OP_TRUE])]);
        assert_eq!(
            violation(check_tx_well_formed(&under, &params)),
            TxViolation::UnbalancedAsset { asset: ASSET_A, balance: 1 }
        );

        let swap = tx(vec![spend(1, ASSET_A, 5)], vec![TxOutput::new(ASSET_B, 5, vec![OP_TRUE])]);
        assert!(matches!(
            violation(check_tx_well_formed(&swap, &params)),
            TxViolation::UnbalancedAsset { .. }
        ));
    }

    #[test]
    fn test_issuance_balances() {
        let params = ConsensusParams::default();
        let input = issuance(100);
        let asset = input.asset_id();

        // partial use of the declared issuance is fine
        let partial = tx(vec![input.clone()], vec![TxOutput::new(asset, 60, vec![OP_TRUE])]);
        check_tx_well_formed(&partial, &params).unwrap();

        let exceeded = tx(vec![input.clone()], vec![TxOutput::new(asset, 101, vec![OP_TRUE])]);
        assert_eq!(
            violation(check_tx_well_formed(&exceeded, &params)),
            TxViolation::IssuanceExceeded { asset, excess: 1 }
        );

        // spent units of an issued asset may not vanish
        let vanish = tx(
            vec![input.clone(), spend(1, asset, 10)],
            vec![TxOutput::new(asset, 5, vec![OP_TRUE])],
        );
        assert_eq!(
            violation(check_tx_well_formed(&vanish, &params)),
            TxViolation::IssuedAssetUnbalanced { asset, balance: 5 }
        );

        // zero-amount output republishing the definition
        let republish = tx(vec![input], vec![TxOutput::new(asset, 0, vec![OP_TRUE])]);
        check_tx_well_formed(&republish, &params).unwrap();
    }

    #[test]
    fn test_zero_amount_output_needs_issuance() {
        let params = ConsensusParams::default();
        let t = tx(
            vec![spend(1, ASSET_A, 5)],
            vec![
                TxOutput::new(ASSET_A, 5, vec![OP_TRUE]),
                TxOutput::new(ASSET_A, 0, vec![OP_TRUE]),
            ],
        );
        assert_eq!(
            violation(check_tx_well_formed(&t, &params)),
            TxViolation::ZeroAmountOutput { output: 1 }
        );
    }

    #[test]
    fn test_initial_block_binding() {
        let params = ConsensusParams::default().with_initial_block(Hash([2; 32]));
        let input = issuance(1);
        let asset = input.asset_id();
        let t = tx(vec![input], vec![TxOutput::new(asset, 1, vec![OP_TRUE])]);
        assert!(matches!(
            violation(check_tx_well_formed(&t, &params)),
            TxViolation::WrongInitialBlock { input: 0, .. }
        ));
    }

    #[test]
    fn test_timing() {
        let mut data = tx(vec![spend(1, ASSET_A, 1)], vec![]).into_data();
        data.lock_time = 50;
        assert_eq!(
            check_tx_timing(&data, 49),
            Err(ConsensusError::TxNotYetValid { required: 50, timestamp: 49 })
        );
        check_tx_timing(&data, 50).unwrap();

        let t = tx(vec![issuance(1)], vec![]);
        check_tx_timing(&t, 100).unwrap();
        assert!(matches!(
            violation(check_tx_timing(&t, 101)),
            TxViolation::IssuanceExpired { input: 0, .. }
        ));
    }

    #[test]
    fn test_inputs_must_be_unspent_and_match() {
        let input = spend(1, ASSET_A, 5);
        let t = tx(vec![input.clone()], vec![TxOutput::new(ASSET_A, 5, vec![OP_TRUE])]);
        let state = state_with(&[input]);
        check_tx_inputs(&t, &state).unwrap();

        assert!(matches!(
            check_tx_inputs(&t, &Snapshot::new()),
            Err(ConsensusError::UtxoNotFound { input: 0, .. })
        ));

        let lying = tx(vec![spend(1, ASSET_A, 6)], vec![TxOutput::new(ASSET_A, 6, vec![OP_TRUE])]);
        assert!(matches!(
            violation(check_tx_inputs(&lying, &state)),
            TxViolation::CommitmentMismatch { input: 0, .. }
        ));
    }

    #[test]
    fn test_unauthorized_input_reports_scripts() {
        let params = ConsensusParams::default();
        let mut input = spend(1, ASSET_A, 5);
        if let InputCommitment::Spend(spend) = &mut input.commitment {
            spend.prev_script = vec![OP_RETURN];
        }
        let t = tx(vec![input], vec![TxOutput::new(ASSET_A, 5, vec![OP_TRUE])]);
        match authorize_tx(&t, &params, 0).unwrap_err() {
            ConsensusError::TxUnauthorized { input, source, predicate, .. } => {
                assert_eq!(input, 0);
                assert_eq!(source.kind, ScriptError::Failed(FailureReason::EarlyReturn));
                assert_eq!(predicate, "RETURN");
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn test_apply_moves_value() {
        let params = ConsensusParams::default();
        let input = spend(1, ASSET_A, 5);
        let t = tx(
            vec![input.clone()],
            vec![
                TxOutput::new(ASSET_A, 3, vec![OP_TRUE]),
                TxOutput::new(ASSET_A, 2, vec![OP_RETURN]),
            ],
        );
        let mut state = state_with(&[input.clone()]);
        validate_tx(&t, &state, &params, 0).unwrap();
        apply_tx(&t, &mut state).unwrap();

        assert!(!state.contains_utxo(input.outpoint().unwrap()));
        assert_eq!(state.utxo(&t.outpoint(0)), Some(t.outputs[0].commitment()));
        assert!(!state.contains_utxo(&t.outpoint(1)));
        assert_eq!(state.destroyed(&ASSET_A), 2);

        // the same spend cannot be applied twice
        let before = state.clone();
        assert!(matches!(
            apply_tx(&t, &mut state),
            Err(ConsensusError::UtxoNotFound { .. })
        ));
        assert_eq!(state, before);
    }

    #[test]
    fn test_apply_books_issuance_and_definition() {
        let input = issuance(100);
        let asset = input.asset_id();
        let t = tx(vec![input], vec![TxOutput::new(asset, 60, vec![OP_TRUE])]);
        let mut state = Snapshot::new();
        apply_tx(&t, &mut state).unwrap();
        assert_eq!(state.issued(&asset), 60);
        assert_eq!(state.asset_definition(&asset), Some(hash256(b"{\"name\":\"a\"}")));
        assert_eq!(state.utxo_count(), 1);
    }

    #[test]
    fn test_issuance_replay_rejected() {
        let params = ConsensusParams::default();
        let input = issuance(10);
        let asset = input.asset_id();
        let t = tx(vec![input], vec![TxOutput::new(asset, 10, vec![OP_TRUE])]);
        let mut state = Snapshot::new();
        validate_tx(&t, &state, &params, 50).unwrap();
        apply_tx(&t, &mut state).unwrap();

        assert!(matches!(
            violation(validate_tx(&t, &state, &params, 50)),
            TxViolation::OutputExists { output: 0, .. }
        ));
        let before = state.clone();
        assert!(apply_tx(&t, &mut state).is_err());
        assert_eq!(state, before);
    }

    #[test]
    fn test_issuance_replay_after_spend_rejected() {
        let params = ConsensusParams::default();
        let input = issuance(10);
        let asset = input.asset_id();
        let issue = tx(vec![input], vec![TxOutput::new(asset, 10, vec![OP_TRUE])]);
        let mut state = Snapshot::new();
        validate_tx(&issue, &state, &params, 50).unwrap();
        apply_tx(&issue, &mut state).unwrap();

        let transfer = tx(
            vec![TxInput::spend(issue.outpoint(0), AssetAmount::new(asset, 10), vec![OP_TRUE])],
            vec![TxOutput::new(asset, 10, vec![OP_TRUE])],
        );
        validate_tx(&transfer, &state, &params, 60).unwrap();
        apply_tx(&transfer, &mut state).unwrap();
        assert!(!state.contains_utxo(&issue.outpoint(0)));
        assert_eq!(state.issuance_count(), 1);

        // the issuance outputs are gone, but the issuance is remembered
        assert_eq!(
            violation(validate_tx(&issue, &state, &params, 70)),
            TxViolation::IssuanceReplayed { tx: issue.hash() }
        );
        let before = state.clone();
        assert!(apply_tx(&issue, &mut state).is_err());
        assert_eq!(state, before);
        assert_eq!(state.issued(&asset), 10);
    }

    #[test]
    fn test_destroyed_issuance_replay_rejected() {
        let params = ConsensusParams::default();
        let input = issuance(4);
        let asset = input.asset_id();
        let burn = tx(vec![input], vec![TxOutput::new(asset, 4, vec![OP_RETURN])]);
        let mut state = Snapshot::new();
        apply_tx(&burn, &mut state).unwrap();
        assert_eq!(issuance_expiry(&burn), Some(100));
        assert!(matches!(
            violation(validate_tx(&burn, &state, &params, 50)),
            TxViolation::IssuanceReplayed { .. }
        ));
        assert_eq!(state.issuance_count(), 1);
    }
}
