//! # UTXO Ledger
//!
//! Consensus core of a multi-asset UTXO ledger: the binary transaction and
//! block format, a stack-based predicate VM, pay-to-contract commitments, and
//! the rules deciding whether a transaction or block may be applied to chain
//! state.
//!
//! ## Architecture
//!
//! - `codec`, `types`, `hashing`: wire format and identifiers
//! - `script`, `opcode`, `scriptnum`, `engine`: predicates and their VM
//! - `p2c`, `standard`: predicate templates
//! - `transaction`, `block`, `state`, `merkle`: validation and application
//! - `chain`: storage, pool and observer plumbing around the core
//!
//! ## Design Principles
//!
//! 1. **Deterministic**: identical inputs give identical results on every node
//! 2. **All-or-nothing**: a rejected transaction or block leaves state untouched
//! 3. **Bounded**: every script runs under an opcode budget
//! 4. **Exact Version Pinning**: consensus-critical dependencies are pinned
//!
//! ## Usage
//!
//! ```rust
//! use utxo_ledger::Validator;
//! use utxo_ledger::script::assemble;
//!
//! let validator = Validator::new();
//! let predicate = assemble("2 3 ADD 5 NUMEQUAL").unwrap();
//! validator.verify_script(&[], &predicate).unwrap();
//! ```

pub mod block;
pub mod chain;
pub mod codec;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod hashing;
pub mod merkle;
pub mod opcode;
pub mod p2c;
pub mod script;
pub mod scriptnum;
pub mod sighash;
pub mod standard;
pub mod state;
pub mod transaction;
pub mod types;

// Re-export commonly used types
pub use codec::{Decodable, Encodable};
pub use config::ConsensusParams;
pub use constants::*;
pub use error::{ConsensusError, Result};
pub use state::{Snapshot, StateView};
pub use types::*;

use engine::ExecutionContext;

/// Validation entry points bound to one set of consensus parameters.
///
/// # Examples
///
/// ```
/// use utxo_ledger::{Snapshot, StateView, Validator};
/// use utxo_ledger::types::*;
///
/// let validator = Validator::new();
/// let mut state = Snapshot::new();
///
/// // An issuance of 100 units, spendable by anyone
/// let issuance = IssuanceCommitment {
///     min_time: 0,
///     max_time: u64::MAX,
///     initial_block: Hash::ZERO,
///     amount: 100,
///     issuance_script: vec![0x51], // TRUE
///     asset_definition: Vec::new(),
/// };
/// let asset = issuance.asset_id();
/// let tx = Tx::new(TxData {
///     inputs: vec![TxInput::issuance(issuance)],
///     outputs: vec![TxOutput::new(asset, 100, vec![0x51])],
///     ..TxData::default()
/// });
///
/// validator.validate_tx(&tx, &state, 0).unwrap();
/// validator.apply_tx(&tx, &mut state).unwrap();
/// assert_eq!(state.issued(&asset), 100);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Validator {
    params: ConsensusParams,
}

impl Validator {
    /// A validator with default parameters
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: ConsensusParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    /// Checks `tx` against `state` at `timestamp` without mutating it.
    pub fn validate_tx<S: StateView + ?Sized>(&self, tx: &Tx, state: &S, timestamp: u64) -> Result<()> {
        transaction::validate_tx(tx, state, &self.params, timestamp)
    }

    /// Applies a transaction that passed `validate_tx`.
    pub fn apply_tx<S: StateView + ?Sized>(&self, tx: &Tx, state: &mut S) -> Result<()> {
        transaction::apply_tx(tx, state)
    }

    /// Stateless block checks. `prev` is `None` for the genesis block.
    ///
    /// # Examples
    ///
    /// ```
    /// use utxo_ledger::Validator;
    /// use utxo_ledger::block::genesis_block;
    ///
    /// let genesis = genesis_block(vec![0x51], 0);
    /// Validator::new().validate_block(&genesis, None).unwrap();
    /// ```
    pub fn validate_block(&self, block: &Block, prev: Option<&BlockHeader>) -> Result<()> {
        block::validate_block(block, prev, &self.params)
    }

    /// Validates `block` and applies it to `state`, all or nothing.
    pub fn validate_and_apply_block<S: StateView + Clone>(
        &self,
        block: &Block,
        prev: Option<&BlockHeader>,
        state: &mut S,
    ) -> Result<()> {
        block::validate_and_apply_block(block, prev, state, &self.params)
    }

    /// Runs `witness` then `predicate` with no transaction context.
    ///
    /// # Examples
    ///
    /// ```
    /// use utxo_ledger::Validator;
    /// use utxo_ledger::script::assemble;
    ///
    /// let validator = Validator::new();
    /// let predicate = assemble("DUP HASH256 EQUALVERIFY").unwrap();
    /// assert!(validator.verify_script(&assemble("'x'").unwrap(), &predicate).is_err());
    /// ```
    pub fn verify_script(&self, witness: &[u8], predicate: &[u8]) -> Result<()> {
        engine::verify_script(&self.params, ExecutionContext::Standalone, 0, witness, predicate)?;
        Ok(())
    }
}
