//! Ledger consensus constants

/// Transaction version understood by this validator
pub const CURRENT_TX_VERSION: u32 = 1;

/// Block version understood by this validator
pub const CURRENT_BLOCK_VERSION: u32 = 1;

/// Height of the genesis block
pub const GENESIS_HEIGHT: u64 = 1;

/// Maximum number of inputs per transaction
pub const MAX_INPUTS: usize = 1000;

/// Maximum number of outputs per transaction
pub const MAX_OUTPUTS: usize = 1000;

/// Maximum serialized block size: 4MB
pub const MAX_BLOCK_SIZE: usize = 4_000_000;

/// Maximum script length
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Maximum size of a single stack element
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// Maximum combined size of the data and alt stacks during script execution
pub const MAX_STACK_SIZE: usize = 1000;

/// Maximum number of opcodes stepped by one input's evaluation,
/// including nested EVAL and CHECKPREDICATE programs
pub const MAX_SCRIPT_OPS: usize = 10_000;

/// Maximum byte length of a numeric operand
pub const MAX_SCRIPT_NUM_LEN: usize = 8;

/// Maximum nesting of CHECKPREDICATE sub-programs
pub const MAX_PREDICATE_DEPTH: usize = 16;

/// Maximum number of programs open at once through nested EVAL
pub const MAX_EVAL_DEPTH: usize = 64;

/// Maximum number of public keys in a CHECKMULTISIG
pub const MAX_MULTISIG_KEYS: usize = 20;

/// Largest amount any input or output may carry (63 bits)
pub const MAX_AMOUNT: u64 = i64::MAX as u64;

/// Input commitment discriminators on the wire
pub const INPUT_KIND_ISSUANCE: u8 = 0;
pub const INPUT_KIND_SPEND: u8 = 1;

/// Length of a compact ECDSA signature, excluding the trailing hash type
pub const SIGNATURE_LEN: usize = 64;

/// How far past the current height a caller may wait for a block
pub const MAX_HEIGHT_LOOKAHEAD: u64 = 1_000;
