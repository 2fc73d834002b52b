//! Validation parameters
//!
//! Defaults come from `constants`. A deployment may override any of them
//! from JSON; missing fields keep their default.

use crate::constants::*;
use crate::types::Hash;
use serde::{Deserialize, Serialize};

/// Consensus parameters threaded through every validation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusParams {
    /// Opcodes one input's evaluation may step, nested programs included
    pub max_script_ops: usize,
    /// Combined data and alt stack depth
    pub max_stack_size: usize,
    /// Byte length of any script run by the VM
    pub max_script_size: usize,
    /// Byte length of a stack element
    pub max_element_size: usize,
    /// Byte length of a numeric operand
    pub max_num_len: usize,
    /// CHECKPREDICATE nesting
    pub max_predicate_depth: usize,
    pub max_inputs: usize,
    pub max_outputs: usize,
    /// Serialized block size in bytes
    pub max_block_size: usize,
    /// Reject non-minimal pushes and numbers
    pub require_minimal: bool,
    /// Skip block signature checks when the signer is trusted out of band
    pub trust_block_signatures: bool,
    /// Hash of block 1, which issuances must commit to once known
    pub initial_block_hash: Option<Hash>,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            max_script_ops: MAX_SCRIPT_OPS,
            max_stack_size: MAX_STACK_SIZE,
            max_script_size: MAX_SCRIPT_SIZE,
            max_element_size: MAX_SCRIPT_ELEMENT_SIZE,
            max_num_len: MAX_SCRIPT_NUM_LEN,
            max_predicate_depth: MAX_PREDICATE_DEPTH,
            max_inputs: MAX_INPUTS,
            max_outputs: MAX_OUTPUTS,
            max_block_size: MAX_BLOCK_SIZE,
            require_minimal: true,
            trust_block_signatures: false,
            initial_block_hash: None,
        }
    }
}

impl ConsensusParams {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn with_initial_block(mut self, hash: Hash) -> Self {
        self.initial_block_hash = Some(hash);
        self
    }
}
