//! Error types for consensus validation

use crate::types::{AssetId, Hash, Outpoint};
use thiserror::Error;

/// A wire-format decoding failure, positioned at the byte where it was detected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed encoding at byte {offset}: {kind}")]
pub struct DecodeError {
    pub offset: usize,
    pub kind: DecodeErrorKind,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    #[error("unexpected end of input")]
    Truncated,

    #[error("varint overflows 64 bits")]
    VarintOverflow,

    #[error("non-canonical varint")]
    NonCanonicalVarint,

    #[error("unsupported serialization flags {0:#04x}")]
    UnsupportedFlags(u8),

    #[error("unknown input kind {0}")]
    UnknownInputKind(u8),

    #[error("value out of range")]
    ValueOutOfRange,

    #[error("{0} trailing bytes")]
    TrailingBytes(usize),

    #[error("block commitment must be 64 bytes, got {0}")]
    BadCommitmentLength(usize),
}

/// Failures of the script parser and the text assembler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptParseError {
    #[error("truncated push at byte {offset}: need {needed} bytes, {available} available")]
    TruncatedPush {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("non-canonical push at byte {offset}")]
    NonCanonicalPush { offset: usize },

    #[error("unknown token `{0}`")]
    UnknownToken(String),

    #[error("invalid hex literal `{0}`")]
    InvalidHex(String),

    #[error("integer literal out of range `{0}`")]
    IntegerOutOfRange(String),

    #[error("unterminated quoted string")]
    UnterminatedString,
}

/// Why a script explicitly rejected, as opposed to being malformed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    #[error("VERIFY failed")]
    Verify,

    #[error("EQUALVERIFY failed")]
    EqualVerify,

    #[error("NUMEQUALVERIFY failed")]
    NumEqualVerify,

    #[error("CHECKSIGVERIFY failed")]
    CheckSigVerify,

    #[error("CHECKMULTISIGVERIFY failed")]
    CheckMultiSigVerify,

    #[error("RETURN executed")]
    EarlyReturn,

    #[error("final stack top is false")]
    FalseResult,

    #[error("final stack is empty")]
    EmptyStack,
}

/// The kind of a virtual machine failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("stack underflow")]
    StackUnderflow,

    #[error("stack size limit exceeded")]
    StackOverflow,

    #[error("numeric value exceeds {max} bytes")]
    NumberTooBig { max: usize },

    #[error("non-minimally encoded number")]
    NonMinimalEncoding,

    #[error("non-minimal data push")]
    NonMinimalPush,

    #[error("script failed: {0}")]
    Failed(FailureReason),

    #[error("execution budget of {0} opcodes exceeded")]
    BudgetExceeded(usize),

    #[error("unbalanced conditional")]
    UnbalancedConditional,

    #[error("invalid opcode {0:#04x}")]
    InvalidOpcode(u8),

    #[error("stack element exceeds {0} bytes")]
    ElementTooBig(usize),

    #[error("script exceeds {0} bytes")]
    ScriptTooBig(usize),

    #[error("signature script is not push-only")]
    NotPushOnly,

    #[error("opcode requires a transaction context")]
    NoTransactionContext,

    #[error("division by zero")]
    DivisionByZero,

    #[error("operand out of range")]
    OutOfRange,

    #[error("predicate nesting exceeds {0}")]
    NestingTooDeep(usize),

    #[error("invalid signature hash type {0:#04x}")]
    InvalidHashType(u8),

    #[error(transparent)]
    Parse(#[from] ScriptParseError),
}

/// A VM failure with the position it occurred at.
///
/// `frame` is the nesting depth of the running program (0 = outermost),
/// `pc` the opcode index within that frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} (opcode #{pc} in frame {frame})")]
pub struct ExecutionError {
    pub frame: usize,
    pub pc: usize,
    pub opcode: Option<u8>,
    pub kind: ScriptError,
}

impl ExecutionError {
    pub fn new(kind: ScriptError) -> Self {
        Self {
            frame: 0,
            pc: 0,
            opcode: None,
            kind,
        }
    }
}

/// Structural and balance violations found by the well-formedness checks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxViolation {
    #[error("transaction has no inputs")]
    NoInputs,

    #[error("too many inputs: {0}")]
    TooManyInputs(usize),

    #[error("too many outputs: {0}")]
    TooManyOutputs(usize),

    #[error("unsupported transaction version {0}")]
    UnsupportedVersion(u32),

    #[error("inputs {first} and {second} both spend {outpoint}")]
    DuplicateInput {
        first: usize,
        second: usize,
        outpoint: Outpoint,
    },

    #[error("input {input} amount exceeds 63 bits")]
    InputAmountTooLarge { input: usize },

    #[error("output {output} amount exceeds 63 bits")]
    OutputAmountTooLarge { output: usize },

    #[error("output {output} has zero amount of a non-issued asset")]
    ZeroAmountOutput { output: usize },

    #[error("asset {asset} is unbalanced by {balance}")]
    UnbalancedAsset { asset: AssetId, balance: i128 },

    #[error("asset {asset} outputs exceed declared issuance by {excess}")]
    IssuanceExceeded { asset: AssetId, excess: i128 },

    #[error("issued asset {asset} has {balance} units of spent value unaccounted for")]
    IssuedAssetUnbalanced { asset: AssetId, balance: i128 },

    #[error("script of {len} bytes exceeds the limit")]
    ScriptTooLarge { len: usize },

    #[error("input {input} has an empty issuance window")]
    InvalidIssuanceWindow { input: usize },

    #[error("input {input} issuance window closed at {max_time}, context time {timestamp}")]
    IssuanceExpired {
        input: usize,
        max_time: u64,
        timestamp: u64,
    },

    #[error("input {input} issues against initial block {actual}, expected {expected}")]
    WrongInitialBlock {
        input: usize,
        expected: Hash,
        actual: Hash,
    },

    #[error("input {input} claims an output commitment that does not match {outpoint}")]
    CommitmentMismatch { input: usize, outpoint: Outpoint },

    #[error("output {output} would recreate unspent output {outpoint}")]
    OutputExists { output: usize, outpoint: Outpoint },

    #[error("issuance transaction {tx} was already applied")]
    IssuanceReplayed { tx: Hash },
}

/// Block header linkage and commitment violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderViolation {
    #[error("unsupported block version {0}")]
    UnsupportedVersion(u32),

    #[error("genesis block must have height 1, got {0}")]
    BadGenesisHeight(u64),

    #[error("previous block hash {actual} does not match {expected}")]
    PreviousHashMismatch { expected: Hash, actual: Hash },

    #[error("height {actual} does not follow {expected}")]
    HeightMismatch { expected: u64, actual: u64 },

    #[error("no height follows {0}")]
    HeightExhausted(u64),

    #[error("timestamp {actual} precedes previous block timestamp {previous}")]
    TimestampRegressed { previous: u64, actual: u64 },

    #[error("block output script is unspendable")]
    UnspendableOutputScript,

    #[error("transaction root {actual} does not match commitment {expected}")]
    TxRootMismatch { expected: Hash, actual: Hash },

    #[error("block of {0} bytes exceeds the size limit")]
    BlockTooLarge(usize),

    #[error("signature rejected by previous block's output script: {0}")]
    SignatureRejected(ExecutionError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error(transparent)]
    MalformedEncoding(#[from] DecodeError),

    #[error("script parse error: {0}")]
    ScriptParse(#[from] ScriptParseError),

    #[error("script execution failed: {0}")]
    Script(#[from] ExecutionError),

    #[error("transaction malformed: {0}")]
    TxMalformed(TxViolation),

    #[error("input {input}: outpoint {outpoint} is not unspent")]
    UtxoNotFound { input: usize, outpoint: Outpoint },

    #[error("input {input} unauthorized: {source}; predicate `{predicate}`, witness `{witness}`")]
    TxUnauthorized {
        input: usize,
        source: ExecutionError,
        predicate: String,
        witness: String,
    },

    #[error("transaction not yet valid: requires time {required}, context time {timestamp}")]
    TxNotYetValid { required: u64, timestamp: u64 },

    #[error("block header invalid: {0}")]
    BlockHeaderInvalid(HeaderViolation),

    #[error("transaction {index} rejected: {source}")]
    BlockTx {
        index: usize,
        source: Box<ConsensusError>,
    },

    #[error("state root mismatch: header commits to {expected}, state has {actual}")]
    StateRootMismatch { expected: Hash, actual: Hash },

    #[error("state corruption: {0}")]
    StateCorruption(String),
}

impl ConsensusError {
    /// Fatal errors mean the validator disagrees with history it already
    /// accepted; processing of the chain tip must stop.
    pub fn is_fatal(&self) -> bool {
        match self {
            ConsensusError::StateRootMismatch { .. } | ConsensusError::StateCorruption(_) => true,
            ConsensusError::BlockTx { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// Strips block positional wrapping down to the underlying error.
    pub fn root(&self) -> &ConsensusError {
        match self {
            ConsensusError::BlockTx { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<TxViolation> for ConsensusError {
    fn from(violation: TxViolation) -> Self {
        ConsensusError::TxMalformed(violation)
    }
}

impl From<HeaderViolation> for ConsensusError {
    fn from(violation: HeaderViolation) -> Self {
        ConsensusError::BlockHeaderInvalid(violation)
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
