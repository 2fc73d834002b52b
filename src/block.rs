//! Block validation and application
//!
//! A header links to its predecessor by hash, height and time, commits to its
//! transactions through the tx root and to the resulting UTXO set through the
//! state root, and is authorized by a witness satisfying the previous
//! block's output script. Applying a block runs each transaction against the
//! state in block order, then checks the state root; a mismatch there means
//! this validator and the block producer disagree about history and is fatal.

use crate::codec::Encodable;
use crate::config::ConsensusParams;
use crate::constants::*;
use crate::engine::{verify_script, ExecutionContext};
use crate::error::{ConsensusError, HeaderViolation, Result};
pub use crate::merkle::tx_merkle_root;
use crate::script::is_unspendable;
use crate::state::StateView;
use crate::transaction::{apply_tx, validate_tx};
use crate::types::{Block, BlockCommitment, BlockHeader, Hash, Tx};
use log::{debug, info, warn};

/// Header rules. `prev` is `None` only for the genesis block.
pub fn validate_block_header(
    header: &BlockHeader,
    prev: Option<&BlockHeader>,
    params: &ConsensusParams,
) -> Result<()> {
    // 1. Version and output script
    if header.version != CURRENT_BLOCK_VERSION {
        return Err(HeaderViolation::UnsupportedVersion(header.version).into());
    }
    if is_unspendable(&header.output_script) {
        return Err(ConsensusError::BlockHeaderInvalid(HeaderViolation::UnspendableOutputScript));
    }

    let prev = match prev {
        Some(prev) => prev,
        None => {
            if header.height != GENESIS_HEIGHT {
                return Err(HeaderViolation::BadGenesisHeight(header.height).into());
            }
            return Ok(());
        }
    };

    // 2. Linkage
    let expected_prev = prev.hash();
    if header.previous_block_hash != expected_prev {
        return Err(HeaderViolation::PreviousHashMismatch {
            expected: expected_prev,
            actual: header.previous_block_hash,
        }
        .into());
    }
    let expected_height = prev
        .height
        .checked_add(1)
        .ok_or(HeaderViolation::HeightExhausted(prev.height))?;
    if header.height != expected_height {
        return Err(HeaderViolation::HeightMismatch {
            expected: expected_height,
            actual: header.height,
        }
        .into());
    }
    if header.timestamp < prev.timestamp {
        return Err(HeaderViolation::TimestampRegressed {
            previous: prev.timestamp,
            actual: header.timestamp,
        }
        .into());
    }

    // 3. Signature under the previous block's output script
    if !params.trust_block_signatures {
        let ctx = ExecutionContext::Block {
            sig_hash: header.hash_for_sig(),
            timestamp: header.timestamp,
        };
        verify_script(params, ctx, 0, &header.signature_script, &prev.output_script)
            .map_err(HeaderViolation::SignatureRejected)?;
    }

    Ok(())
}

/// Stateless block rules: header, size and transaction root.
pub fn validate_block(
    block: &Block,
    prev: Option<&BlockHeader>,
    params: &ConsensusParams,
) -> Result<()> {
    validate_block_header(&block.header, prev, params)?;

    let size = block.encode().len();
    if size > params.max_block_size {
        return Err(HeaderViolation::BlockTooLarge(size).into());
    }

    let tx_root = tx_merkle_root(&block.transactions);
    if tx_root != block.header.tx_root() {
        return Err(HeaderViolation::TxRootMismatch {
            expected: block.header.tx_root(),
            actual: tx_root,
        }
        .into());
    }
    Ok(())
}

/// Validates and applies each transaction in order, then checks the state
/// root. Leaves `state` partially updated on failure; use
/// `validate_and_apply_block` for all-or-nothing application.
pub fn apply_block<S: StateView + ?Sized>(
    block: &Block,
    state: &mut S,
    params: &ConsensusParams,
) -> Result<()> {
    let timestamp = block.header.timestamp;
    state.prune_issuances(timestamp);
    for (index, tx) in block.transactions.iter().enumerate() {
        validate_tx(tx, state, params, timestamp)
            .and_then(|()| apply_tx(tx, state))
            .map_err(|source| ConsensusError::BlockTx {
                index,
                source: Box::new(source),
            })?;
    }

    let actual = state.state_root();
    let expected = block.header.state_root();
    if actual != expected {
        warn!(
            "state root mismatch at height {}: header {}, state {}",
            block.height(),
            expected,
            actual
        );
        return Err(ConsensusError::StateRootMismatch { expected, actual });
    }
    Ok(())
}

/// Full block validation against `state`, applied only if everything passes.
pub fn validate_and_apply_block<S: StateView + Clone>(
    block: &Block,
    prev: Option<&BlockHeader>,
    state: &mut S,
    params: &ConsensusParams,
) -> Result<()> {
    let result = validate_block(block, prev, params).and_then(|()| {
        let mut working = state.clone();
        apply_block(block, &mut working, params)?;
        Ok(working)
    });

    match result {
        Ok(working) => {
            *state = working;
            info!(
                "applied block {} at height {} with {} transactions",
                block.hash(),
                block.height(),
                block.transactions.len()
            );
            Ok(())
        }
        Err(err) => {
            debug!("rejected block at height {}: {}", block.height(), err);
            Err(err)
        }
    }
}

/// The first block: height 1, no transactions, authorizing its successor
/// with `output_script`.
pub fn genesis_block(output_script: Vec<u8>, timestamp: u64) -> Block {
    Block {
        header: BlockHeader {
            version: CURRENT_BLOCK_VERSION,
            height: GENESIS_HEIGHT,
            previous_block_hash: Hash::ZERO,
            commitment: BlockCommitment::default(),
            timestamp,
            signature_script: Vec::new(),
            output_script,
        },
        transactions: Vec::new(),
    }
}

/// Result of assembling a block from candidate transactions.
#[derive(Debug, Clone)]
pub struct BuiltBlock<S> {
    /// Unsigned block; the producer fills in `signature_script`
    pub block: Block,
    /// State after applying the block
    pub state: S,
    /// Candidates left out, with the reason
    pub rejected: Vec<(Tx, ConsensusError)>,
}

/// Assembles the next block on top of `prev`: candidates are validated in
/// order against a copy of `state`, and the ones that fail are left out.
/// The output script carries over from `prev`.
pub fn build_block<S: StateView + Clone>(
    prev: &BlockHeader,
    candidates: Vec<Tx>,
    state: &S,
    timestamp: u64,
    params: &ConsensusParams,
) -> BuiltBlock<S> {
    let timestamp = timestamp.max(prev.timestamp);
    let mut working = state.clone();
    working.prune_issuances(timestamp);
    let mut transactions = Vec::new();
    let mut rejected: Vec<(Tx, ConsensusError)> = Vec::new();
    let mut size = 0;

    for tx in candidates {
        let tx_size = tx.encode().len();
        if size + tx_size > params.max_block_size {
            rejected.push((tx, HeaderViolation::BlockTooLarge(size + tx_size).into()));
            continue;
        }
        let mut attempt = working.clone();
        let result = validate_tx(&tx, &attempt, params, timestamp)
            .and_then(|()| apply_tx(&tx, &mut attempt));
        match result {
            Ok(()) => {
                working = attempt;
                size += tx_size;
                transactions.push(tx);
            }
            Err(err) => rejected.push((tx, err)),
        }
    }

    let header = BlockHeader {
        version: CURRENT_BLOCK_VERSION,
        // a successor of u64::MAX fails header validation as exhausted
        height: prev.height.saturating_add(1),
        previous_block_hash: prev.hash(),
        commitment: BlockCommitment {
            tx_root: tx_merkle_root(&transactions),
            state_root: working.state_root(),
        },
        timestamp,
        signature_script: Vec::new(),
        output_script: prev.output_script.clone(),
    };
    BuiltBlock {
        block: Block {
            header,
            transactions,
        },
        state: working,
        rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ScriptError, TxViolation};
    use crate::opcode::{OP_RETURN, OP_TRUE};
    use crate::sighash::SigHashType;
    use crate::standard::{p2pk_witness, pay_to_pubkey, sign};
    use crate::state::Snapshot;
    use crate::types::{IssuanceCommitment, TxData, TxInput, TxOutput};
    use secp256k1::{PublicKey, Secp256k1, SecretKey};

    fn signer() -> (SecretKey, PublicKey) {
        let secret = SecretKey::from_slice(&[0x11; 32]).unwrap();
        (secret, PublicKey::from_secret_key(&Secp256k1::new(), &secret))
    }

    fn issue(genesis: &Block, amount: u64) -> Tx {
        let issuance = IssuanceCommitment {
            min_time: 0,
            max_time: u64::MAX,
            initial_block: genesis.hash(),
            amount,
            issuance_script: vec![OP_TRUE],
            asset_definition: Vec::new(),
        };
        let asset = issuance.asset_id();
        Tx::new(TxData {
            inputs: vec![TxInput::issuance(issuance)],
            outputs: vec![TxOutput::new(asset, amount, vec![OP_TRUE])],
            ..TxData::default()
        })
    }

    fn signed(mut built: Block, secret: &SecretKey) -> Block {
        let sig = sign(secret, &built.header.hash_for_sig(), SigHashType::ALL);
        built.header.signature_script = p2pk_witness(&sig);
        built
    }

    #[test]
    fn test_genesis_rules() {
        let params = ConsensusParams::default();
        let genesis = genesis_block(vec![OP_TRUE], 0);
        validate_block(&genesis, None, &params).unwrap();

        let mut wrong = genesis.clone();
        wrong.header.height = 2;
        assert_eq!(
            validate_block(&wrong, None, &params),
            Err(ConsensusError::BlockHeaderInvalid(HeaderViolation::BadGenesisHeight(2)))
        );

        let unspendable = genesis_block(vec![OP_RETURN], 0);
        assert_eq!(
            validate_block(&unspendable, None, &params),
            Err(ConsensusError::BlockHeaderInvalid(HeaderViolation::UnspendableOutputScript))
        );
    }

    #[test]
    fn test_signed_block_applies() {
        let params = ConsensusParams::default();
        let (secret, public) = signer();
        let genesis = genesis_block(pay_to_pubkey(&public), 10);
        let mut state = Snapshot::new();

        let built = build_block(&genesis.header, vec![issue(&genesis, 100)], &state, 20, &params);
        assert!(built.rejected.is_empty());
        let block = signed(built.block, &secret);

        validate_and_apply_block(&block, Some(&genesis.header), &mut state, &params).unwrap();
        assert_eq!(state, built.state);
        assert_eq!(state.utxo_count(), 1);
        assert_eq!(state.state_root(), block.header.state_root());
    }

    #[test]
    fn test_header_linkage() {
        let params = ConsensusParams::default();
        let (secret, public) = signer();
        let genesis = genesis_block(pay_to_pubkey(&public), 10);
        let state = Snapshot::new();
        let block = signed(build_block(&genesis.header, vec![], &state, 20, &params).block, &secret);
        validate_block_header(&block.header, Some(&genesis.header), &params).unwrap();

        let mut bad = block.clone();
        bad.header.previous_block_hash = Hash([9; 32]);
        assert!(matches!(
            validate_block_header(&bad.header, Some(&genesis.header), &params),
            Err(ConsensusError::BlockHeaderInvalid(HeaderViolation::PreviousHashMismatch { .. }))
        ));

        let mut bad = block.clone();
        bad.header.height = 3;
        assert!(matches!(
            validate_block_header(&bad.header, Some(&genesis.header), &params),
            Err(ConsensusError::BlockHeaderInvalid(HeaderViolation::HeightMismatch { expected: 2, actual: 3 }))
        ));

        let mut bad = block.clone();
        bad.header.timestamp = 5;
        assert!(matches!(
            validate_block_header(&bad.header, Some(&genesis.header), &params),
            Err(ConsensusError::BlockHeaderInvalid(HeaderViolation::TimestampRegressed { .. }))
        ));

        // no successor at the top of the height range
        let mut last = genesis.header.clone();
        last.height = u64::MAX;
        let next = build_block(&last, vec![], &state, 20, &params).block;
        assert_eq!(
            validate_block_header(&next.header, Some(&last), &params),
            Err(ConsensusError::BlockHeaderInvalid(HeaderViolation::HeightExhausted(u64::MAX)))
        );
    }

    #[test]
    fn test_signature_required_unless_trusted() {
        let params = ConsensusParams::default();
        let (_, public) = signer();
        let genesis = genesis_block(pay_to_pubkey(&public), 0);
        let state = Snapshot::new();
        let other = SecretKey::from_slice(&[0x22; 32]).unwrap();
        let block = signed(build_block(&genesis.header, vec![], &state, 1, &params).block, &other);

        match validate_block_header(&block.header, Some(&genesis.header), &params) {
            Err(ConsensusError::BlockHeaderInvalid(HeaderViolation::SignatureRejected(err))) => {
                assert!(matches!(err.kind, ScriptError::Failed(_)));
            }
            other => panic!("unexpected {other:?}"),
        }

        let trusting = ConsensusParams {
            trust_block_signatures: true,
            ..ConsensusParams::default()
        };
        validate_block_header(&block.header, Some(&genesis.header), &trusting).unwrap();
    }

    #[test]
    fn test_tx_root_and_state_root_checked() {
        let params = ConsensusParams {
            trust_block_signatures: true,
            ..ConsensusParams::default()
        };
        let genesis = genesis_block(vec![OP_TRUE], 0);
        let mut state = Snapshot::new();
        let built = build_block(&genesis.header, vec![issue(&genesis, 5)], &state, 1, &params);

        let mut reordered = built.block.clone();
        reordered.transactions.clear();
        assert!(matches!(
            validate_and_apply_block(&reordered, Some(&genesis.header), &mut state, &params),
            Err(ConsensusError::BlockHeaderInvalid(HeaderViolation::TxRootMismatch { .. }))
        ));

        let mut lying = built.block.clone();
        lying.header.commitment.state_root = Hash([1; 32]);
        let err = validate_and_apply_block(&lying, Some(&genesis.header), &mut state, &params)
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(state, Snapshot::new());
    }

    #[test]
    fn test_bad_tx_rejects_whole_block() {
        let params = ConsensusParams {
            trust_block_signatures: true,
            ..ConsensusParams::default()
        };
        let genesis = genesis_block(vec![OP_TRUE], 0);
        let mut state = Snapshot::new();
        let good = issue(&genesis, 5);
        let mut bad = issue(&genesis, 6).into_data();
        bad.outputs[0].asset_amount.amount = 7;
        let bad = Tx::new(bad);

        let built = build_block(&genesis.header, vec![good.clone(), bad.clone()], &state, 1, &params);
        assert_eq!(built.block.transactions, vec![good.clone()]);
        assert_eq!(built.rejected.len(), 1);

        let mut block = built.block;
        block.transactions.push(bad);
        block.header.commitment.tx_root = tx_merkle_root(&block.transactions);
        let err = validate_and_apply_block(&block, Some(&genesis.header), &mut state, &params)
            .unwrap_err();
        match err {
            ConsensusError::BlockTx { index, source } => {
                assert_eq!(index, 1);
                assert!(matches!(
                    *source,
                    ConsensusError::TxMalformed(TxViolation::IssuanceExceeded { .. })
                ));
            }
            other => panic!("unexpected {other}"),
        }
        assert_eq!(state, Snapshot::new());
    }
}
