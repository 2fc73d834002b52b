//! Pay-to-contract predicates
//!
//! A P2C predicate commits to a contract body and an ordered list of
//! parameters. The hashed form carries only the body's hash; the spender
//! reveals the body as the last witness item:
//!
//! ```text
//! <version> DROP <p_n> … <p_1> [<n> ROLL] DUP HASH256 <hash> EQUALVERIFY EVAL
//! ```
//!
//! `<n> ROLL` is present only when there are parameters; it lifts the
//! revealed body above them. The inline form embeds the body instead:
//!
//! ```text
//! <version> DROP <p_n> … <p_1> <body> EVAL
//! ```
//!
//! Either way the contract starts with the spender's arguments below the
//! parameters and `p_1` on top.

use crate::constants::MAX_SCRIPT_NUM_LEN;
use crate::hashing::hash256;
use crate::opcode::*;
use crate::script::{parse_canonical, ParsedOpcode, ScriptBuilder};
use crate::scriptnum::decode_num;
use crate::types::ContractHash;

/// Version pushed by `build_p2c` and `build_p2c_inline`.
pub const P2C_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contract {
    /// Committed by hash, revealed at spend time
    Hash(ContractHash),
    /// Embedded in the predicate
    Inline(Vec<u8>),
}

impl Contract {
    pub fn hash(&self) -> ContractHash {
        match self {
            Contract::Hash(hash) => *hash,
            Contract::Inline(body) => contract_hash(body),
        }
    }
}

/// A recognized P2C predicate. `params` are in logical order, `params[0]`
/// being the one the contract finds on top of its stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P2cScript {
    pub version: u64,
    pub contract: Contract,
    pub params: Vec<Vec<u8>>,
}

impl P2cScript {
    pub fn to_script(&self) -> Vec<u8> {
        let mut builder = header(self.version, &self.params);
        match &self.contract {
            Contract::Hash(hash) => {
                if !self.params.is_empty() {
                    builder.add_int64(self.params.len() as i64).add_op(OP_ROLL);
                }
                builder
                    .add_op(OP_DUP)
                    .add_op(OP_HASH256)
                    .add_data(hash.as_ref())
                    .add_op(OP_EQUALVERIFY)
                    .add_op(OP_EVAL);
            }
            Contract::Inline(body) => {
                builder.add_data(body).add_op(OP_EVAL);
            }
        }
        builder.build()
    }
}

/// The hash a P2C predicate commits to: HASH256 of the body's bytes.
pub fn contract_hash(body: &[u8]) -> ContractHash {
    hash256(body)
}

pub fn build_p2c(hash: &ContractHash, params: &[Vec<u8>]) -> Vec<u8> {
    P2cScript {
        version: P2C_VERSION,
        contract: Contract::Hash(*hash),
        params: params.to_vec(),
    }
    .to_script()
}

pub fn build_p2c_inline(body: &[u8], params: &[Vec<u8>]) -> Vec<u8> {
    P2cScript {
        version: P2C_VERSION,
        contract: Contract::Inline(body.to_vec()),
        params: params.to_vec(),
    }
    .to_script()
}

fn header(version: u64, params: &[Vec<u8>]) -> ScriptBuilder {
    let mut builder = ScriptBuilder::new();
    builder.add_int64(version as i64).add_op(OP_DROP);
    for param in params.iter().rev() {
        builder.add_data(param);
    }
    builder
}

/// Recognizes exactly the shapes `to_script` produces. Anything else,
/// including non-canonical pushes or a ROLL count that disagrees with the
/// parameter count, is not P2C.
pub fn parse_p2c(script: &[u8]) -> Option<P2cScript> {
    let ops = parse_canonical(script).ok()?;
    if ops.len() < 4 || ops[1].opcode != OP_DROP {
        return None;
    }
    let version = decode_num(&ops[0].push_value()?, true, MAX_SCRIPT_NUM_LEN).ok()?;
    let version = u64::try_from(version).ok()?;

    let body = &ops[2..];
    let (params, contract) = match body {
        [rest @ .., dup, hash_op, hash, equalverify, eval]
            if dup.opcode == OP_DUP
                && hash_op.opcode == OP_HASH256
                && hash.opcode == OP_DATA_32
                && equalverify.opcode == OP_EQUALVERIFY
                && eval.opcode == OP_EVAL =>
        {
            let hash = ContractHash::from_slice(&hash.data)?;
            let params = match rest {
                [] => rest,
                [params @ .., count, roll] if roll.opcode == OP_ROLL => {
                    let count = decode_num(&count.push_value()?, true, MAX_SCRIPT_NUM_LEN).ok()?;
                    if params.is_empty() || count != params.len() as i64 {
                        return None;
                    }
                    params
                }
                _ => return None,
            };
            (params, Contract::Hash(hash))
        }
        [params @ .., contract, eval] if eval.opcode == OP_EVAL => {
            (params, Contract::Inline(contract.push_value()?))
        }
        _ => return None,
    };

    let params = params
        .iter()
        .rev()
        .map(ParsedOpcode::push_value)
        .collect::<Option<Vec<_>>>()?;
    Some(P2cScript {
        version,
        contract,
        params,
    })
}

pub fn is_p2c(script: &[u8]) -> bool {
    parse_p2c(script).is_some()
}

/// Witness for a hashed P2C predicate: the arguments, then the revealed body.
pub fn p2c_witness(args: &[Vec<u8>], body: &[u8]) -> Vec<u8> {
    let mut builder = ScriptBuilder::new();
    for arg in args {
        builder.add_data(arg);
    }
    builder.add_data(body);
    builder.build()
}

/// Witness for an inline P2C predicate: just the arguments.
pub fn p2c_inline_witness(args: &[Vec<u8>]) -> Vec<u8> {
    let mut builder = ScriptBuilder::new();
    for arg in args {
        builder.add_data(arg);
    }
    builder.build()
}
