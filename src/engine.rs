//! Script virtual machine
//!
//! A stack machine over a data stack, an alt stack and a stack of frames.
//! Each frame is one program being run (the witness, the predicate, or a
//! program started by EVAL) with its own program counter and condition
//! stack. `prepare` loads an input's witness and predicate; `step` runs one
//! opcode and `execute` runs to completion.
//!
//! Success: every frame has finished with its conditionals closed and the
//! top of the data stack is true.

use crate::config::ConsensusParams;
use crate::constants::*;
use crate::error::{ExecutionError, FailureReason, ScriptError};
use crate::hashing::{hash160, hash256, ripemd160, sha256, sha3_256};
use crate::opcode::{self, *};
use crate::script::{parse_script, ParsedOpcode};
use crate::scriptnum::{cast_to_bool, decode_num, encode_bool, encode_num};
use crate::sighash::{tx_sighash, SigHashCache, SigHashType};
use crate::types::{Hash, TxData, TxInput};
use log::trace;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, VerifyOnly};

type Element = Vec<u8>;

/// What the introspection and signature opcodes see.
#[derive(Debug, Clone, Copy)]
pub enum ExecutionContext<'a> {
    /// No transaction or block; introspection and CHECKSIG fail.
    Standalone,
    /// Authorizing inputs of `tx` at context time `timestamp`.
    Transaction { tx: &'a TxData, timestamp: u64 },
    /// Authorizing a block header: signatures cover `sig_hash`.
    Block { sig_hash: Hash, timestamp: u64 },
}

impl<'a> ExecutionContext<'a> {
    fn timestamp(&self) -> Option<u64> {
        match self {
            ExecutionContext::Standalone => None,
            ExecutionContext::Transaction { timestamp, .. }
            | ExecutionContext::Block { timestamp, .. } => Some(*timestamp),
        }
    }
}

/// Condition stack entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cond {
    /// Taken IF branch
    Exec,
    /// Untaken IF branch; ELSE flips it
    NoExec,
    /// IF reached while not executing; neither branch runs
    Skip,
    /// Running loop body; ENDWHILE returns to the WHILE at this pc
    Loop(usize),
    /// Loop exited or never entered
    SkipLoop,
}

#[derive(Debug, Clone)]
struct Frame {
    ops: Vec<ParsedOpcode>,
    pc: usize,
    conds: Vec<Cond>,
}

impl Frame {
    fn new(ops: Vec<ParsedOpcode>) -> Self {
        Self {
            ops,
            pc: 0,
            conds: Vec::new(),
        }
    }

    fn executing(&self) -> bool {
        self.conds
            .iter()
            .all(|cond| matches!(cond, Cond::Exec | Cond::Loop(_)))
    }

    fn finished(&self) -> bool {
        self.pc >= self.ops.len()
    }
}

pub struct Engine<'a> {
    params: &'a ConsensusParams,
    ctx: ExecutionContext<'a>,
    secp: Secp256k1<VerifyOnly>,
    sighash_cache: SigHashCache,
    input_index: usize,
    program: Vec<u8>,
    dstack: Vec<Element>,
    astack: Vec<Element>,
    frames: Vec<Frame>,
    ops_used: usize,
    budget: usize,
    depth: usize,
    reserved: Vec<bool>,
}

impl<'a> Engine<'a> {
    pub fn new(params: &'a ConsensusParams, ctx: ExecutionContext<'a>) -> Self {
        let reserved = match ctx {
            ExecutionContext::Transaction { tx, .. } => vec![false; tx.outputs.len()],
            _ => Vec::new(),
        };
        Self {
            params,
            ctx,
            secp: Secp256k1::verification_only(),
            sighash_cache: SigHashCache::new(),
            input_index: 0,
            program: Vec::new(),
            dstack: Vec::new(),
            astack: Vec::new(),
            frames: Vec::new(),
            ops_used: 0,
            budget: params.max_script_ops,
            depth: 0,
            reserved,
        }
    }

    /// Loads the witness and predicate for one input. Stacks and the op
    /// budget start fresh; output reservations carry over from inputs
    /// already run on this engine. `input_index` only matters in a
    /// transaction context.
    pub fn prepare(
        &mut self,
        input_index: usize,
        witness: &[u8],
        predicate: &[u8],
    ) -> Result<(), ExecutionError> {
        self.dstack.clear();
        self.astack.clear();
        self.frames.clear();
        self.ops_used = 0;
        self.budget = self.params.max_script_ops;
        self.input_index = input_index;

        if let ExecutionContext::Transaction { tx, .. } = self.ctx {
            if input_index >= tx.inputs.len() {
                return Err(ExecutionError::new(ScriptError::OutOfRange));
            }
        }

        self.check_script_size(witness).map_err(ExecutionError::new)?;
        let witness_ops = parse_script(witness).map_err(|e| ExecutionError::new(e.into()))?;
        if !witness_ops.iter().all(ParsedOpcode::is_push) {
            return Err(ExecutionError::new(ScriptError::NotPushOnly));
        }

        self.program = predicate.to_vec();
        self.load_program(predicate)?;
        self.frames.push(Frame::new(witness_ops));
        self.unwind().map_err(|kind| self.error_here(kind))
    }

    /// Prepares and executes one input.
    pub fn run(
        &mut self,
        input_index: usize,
        witness: &[u8],
        predicate: &[u8],
    ) -> Result<(), ExecutionError> {
        self.prepare(input_index, witness, predicate)?;
        self.execute()
    }

    fn load_program(&mut self, program: &[u8]) -> Result<(), ExecutionError> {
        self.check_script_size(program).map_err(ExecutionError::new)?;
        let ops = parse_script(program).map_err(|e| ExecutionError::new(e.into()))?;
        self.frames.push(Frame::new(ops));
        Ok(())
    }

    fn check_script_size(&self, script: &[u8]) -> Result<(), ScriptError> {
        if script.len() > self.params.max_script_size {
            return Err(ScriptError::ScriptTooBig(self.params.max_script_size));
        }
        Ok(())
    }

    /// Runs until every frame finishes, then checks the result.
    pub fn execute(&mut self) -> Result<(), ExecutionError> {
        while !self.step()? {}
        self.check_final()
    }

    /// Executes one opcode, or none if only empty programs remain. Returns
    /// true once no program is left to run.
    pub fn step(&mut self) -> Result<bool, ExecutionError> {
        let frame_index = match self.frames.len() {
            0 => return Ok(true),
            n => n - 1,
        };
        let frame = &self.frames[frame_index];
        let pc = frame.pc;
        let Some(op) = frame.ops.get(pc).cloned() else {
            // finished frame not yet popped
            self.unwind().map_err(|kind| self.error_here(kind))?;
            return Ok(self.frames.is_empty());
        };
        let executing = frame.executing();

        let at = |kind: ScriptError| ExecutionError {
            frame: frame_index,
            pc,
            opcode: Some(op.opcode),
            kind,
        };

        self.ops_used += 1;
        if self.ops_used > self.budget {
            return Err(at(ScriptError::BudgetExceeded(self.params.max_script_ops)));
        }

        trace!(
            "frame {} pc {} {}{} depth {}",
            frame_index,
            pc,
            opcode::name(op.opcode),
            if executing { "" } else { " (skipped)" },
            self.dstack.len()
        );

        self.frames[frame_index].pc += 1;
        self.execute_opcode(frame_index, &op, executing).map_err(at)?;

        if self.dstack.len() + self.astack.len() > self.params.max_stack_size {
            return Err(at(ScriptError::StackOverflow));
        }

        self.unwind().map_err(|kind| self.error_here(kind))?;
        Ok(self.frames.is_empty())
    }

    /// Pops finished frames, each of which must have closed its conditionals.
    fn unwind(&mut self) -> Result<(), ScriptError> {
        while let Some(frame) = self.frames.last() {
            if !frame.finished() {
                break;
            }
            if !frame.conds.is_empty() {
                return Err(ScriptError::UnbalancedConditional);
            }
            self.frames.pop();
        }
        Ok(())
    }

    fn error_here(&self, kind: ScriptError) -> ExecutionError {
        match self.frames.last() {
            Some(frame) => ExecutionError {
                frame: self.frames.len() - 1,
                pc: frame.pc,
                opcode: frame.ops.get(frame.pc).map(|op| op.opcode),
                kind,
            },
            None => ExecutionError::new(kind),
        }
    }

    fn check_final(&self) -> Result<(), ExecutionError> {
        match self.dstack.last() {
            None => Err(ExecutionError::new(ScriptError::Failed(FailureReason::EmptyStack))),
            Some(top) if !cast_to_bool(top) => {
                Err(ExecutionError::new(ScriptError::Failed(FailureReason::FalseResult)))
            }
            Some(_) => Ok(()),
        }
    }

    pub fn stack(&self) -> &[Element] {
        &self.dstack
    }

    pub fn alt_stack(&self) -> &[Element] {
        &self.astack
    }

    pub fn ops_used(&self) -> usize {
        self.ops_used
    }

    pub fn is_finished(&self) -> bool {
        self.frames.is_empty()
    }

    /// Outputs claimed by RESERVEOUTPUT so far, by output index.
    pub fn reserved_outputs(&self) -> &[bool] {
        &self.reserved
    }

    fn execute_opcode(
        &mut self,
        frame_index: usize,
        op: &ParsedOpcode,
        executing: bool,
    ) -> Result<(), ScriptError> {
        if !executing && !opcode::is_conditional(op.opcode) {
            return Ok(());
        }

        match op.opcode {
            OP_0..=OP_PUSHDATA4 => {
                if self.params.require_minimal && !op.is_canonical() {
                    return Err(ScriptError::NonMinimalPush);
                }
                self.push(op.data.clone())?;
            }
            OP_1NEGATE => self.push_num(-1)?,
            OP_1..=OP_16 => self.push_num(i64::from(op.opcode - (OP_1 - 1)))?,

            OP_NOP => {}
            OP_IF | OP_NOTIF => {
                let cond = if executing {
                    let value = self.pop_bool()?;
                    if value == (op.opcode == OP_IF) {
                        Cond::Exec
                    } else {
                        Cond::NoExec
                    }
                } else {
                    Cond::Skip
                };
                self.frames[frame_index].conds.push(cond);
            }
            OP_ELSE => {
                let top = self.frames[frame_index].conds.last_mut();
                match top {
                    Some(cond @ Cond::Exec) => *cond = Cond::NoExec,
                    Some(cond @ Cond::NoExec) => *cond = Cond::Exec,
                    Some(Cond::Skip) => {}
                    _ => return Err(ScriptError::UnbalancedConditional),
                }
            }
            OP_ENDIF => match self.frames[frame_index].conds.pop() {
                Some(Cond::Exec | Cond::NoExec | Cond::Skip) => {}
                _ => return Err(ScriptError::UnbalancedConditional),
            },
            OP_WHILE => {
                let cond = if executing && self.pop_bool()? {
                    Cond::Loop(self.frames[frame_index].pc - 1)
                } else {
                    Cond::SkipLoop
                };
                self.frames[frame_index].conds.push(cond);
            }
            OP_ENDWHILE => match self.frames[frame_index].conds.pop() {
                Some(Cond::Loop(start)) => self.frames[frame_index].pc = start,
                Some(Cond::SkipLoop) => {}
                _ => return Err(ScriptError::UnbalancedConditional),
            },
            OP_VERIFY => {
                if !self.pop_bool()? {
                    return Err(ScriptError::Failed(FailureReason::Verify));
                }
            }
            OP_RETURN => return Err(ScriptError::Failed(FailureReason::EarlyReturn)),
            OP_EVAL => {
                let program = self.pop()?;
                self.check_script_size(&program)?;
                if self.frames.len() >= MAX_EVAL_DEPTH {
                    return Err(ScriptError::NestingTooDeep(MAX_EVAL_DEPTH));
                }
                let ops = parse_script(&program)?;
                self.frames.push(Frame::new(ops));
            }
            OP_CHECKPREDICATE => self.check_predicate()?,

            OP_TOALTSTACK => {
                let item = self.pop()?;
                self.astack.push(item);
            }
            OP_FROMALTSTACK => {
                let item = self.astack.pop().ok_or(ScriptError::StackUnderflow)?;
                self.dstack.push(item);
            }
            OP_2DROP => {
                self.need(2)?;
                self.dstack.truncate(self.dstack.len() - 2);
            }
            OP_2DUP => self.copy_from(2, 2)?,
            OP_3DUP => self.copy_from(3, 3)?,
            OP_2OVER => self.copy_from(4, 2)?,
            OP_2ROT => {
                self.need(6)?;
                let start = self.dstack.len() - 6;
                let moved: Vec<Element> = self.dstack.drain(start..start + 2).collect();
                self.dstack.extend(moved);
            }
            OP_2SWAP => {
                self.need(4)?;
                let len = self.dstack.len();
                self.dstack.swap(len - 4, len - 2);
                self.dstack.swap(len - 3, len - 1);
            }
            OP_IFDUP => {
                let top = self.peek(0)?.clone();
                if cast_to_bool(&top) {
                    self.dstack.push(top);
                }
            }
            OP_DEPTH => self.push_num(self.dstack.len() as i64)?,
            OP_DROP => {
                self.pop()?;
            }
            OP_DUP => self.copy_from(1, 1)?,
            OP_NIP => {
                self.need(2)?;
                let len = self.dstack.len();
                self.dstack.remove(len - 2);
            }
            OP_OVER => self.copy_from(2, 1)?,
            OP_PICK | OP_ROLL => {
                let n = self.pop_usize()?;
                if n >= self.dstack.len() {
                    return Err(ScriptError::StackUnderflow);
                }
                let index = self.dstack.len() - 1 - n;
                let item = if op.opcode == OP_PICK {
                    self.dstack[index].clone()
                } else {
                    self.dstack.remove(index)
                };
                self.dstack.push(item);
            }
            OP_ROT => {
                self.need(3)?;
                let len = self.dstack.len();
                let item = self.dstack.remove(len - 3);
                self.dstack.push(item);
            }
            OP_SWAP => {
                self.need(2)?;
                let len = self.dstack.len();
                self.dstack.swap(len - 2, len - 1);
            }
            OP_TUCK => {
                self.need(2)?;
                let len = self.dstack.len();
                let top = self.dstack[len - 1].clone();
                self.dstack.insert(len - 2, top);
            }

            OP_CAT => {
                let b = self.pop()?;
                let mut a = self.pop()?;
                a.extend_from_slice(&b);
                self.push(a)?;
            }
            OP_SUBSTR => {
                let size = self.pop_usize()?;
                let begin = self.pop_usize()?;
                let item = self.pop()?;
                let end = begin.checked_add(size).ok_or(ScriptError::OutOfRange)?;
                let slice = item.get(begin..end).ok_or(ScriptError::OutOfRange)?;
                self.dstack.push(slice.to_vec());
            }
            OP_LEFT | OP_RIGHT => {
                let size = self.pop_usize()?;
                let mut item = self.pop()?;
                if size > item.len() {
                    return Err(ScriptError::OutOfRange);
                }
                if op.opcode == OP_LEFT {
                    item.truncate(size);
                } else {
                    item.drain(..item.len() - size);
                }
                self.dstack.push(item);
            }
            OP_SIZE => {
                let len = self.peek(0)?.len();
                self.push_num(len as i64)?;
            }

            OP_INVERT => {
                let item = self.pop()?;
                self.dstack.push(item.iter().map(|b| !b).collect());
            }
            OP_AND | OP_OR | OP_XOR => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.dstack.push(bitwise(op.opcode, a, b));
            }
            OP_EQUAL | OP_EQUALVERIFY => {
                let b = self.pop()?;
                let a = self.pop()?;
                let equal = a == b;
                if op.opcode == OP_EQUALVERIFY {
                    if !equal {
                        return Err(ScriptError::Failed(FailureReason::EqualVerify));
                    }
                } else {
                    self.push_bool(equal);
                }
            }

            OP_1ADD | OP_1SUB | OP_2MUL | OP_2DIV | OP_NEGATE | OP_ABS | OP_NOT
            | OP_0NOTEQUAL => {
                let a = self.pop_num()?;
                let result = match op.opcode {
                    OP_1ADD => a.checked_add(1),
                    OP_1SUB => a.checked_sub(1),
                    OP_2MUL => a.checked_mul(2),
                    OP_2DIV => Some(a >> 1),
                    OP_NEGATE => a.checked_neg(),
                    OP_ABS => a.checked_abs(),
                    OP_NOT => Some((a == 0) as i64),
                    _ => Some((a != 0) as i64),
                };
                self.push_num(result.ok_or(self.overflow())?)?;
            }
            OP_ADD..=OP_MAX => {
                let b = self.pop_num()?;
                let a = self.pop_num()?;
                match op.opcode {
                    OP_NUMEQUALVERIFY => {
                        if a != b {
                            return Err(ScriptError::Failed(FailureReason::NumEqualVerify));
                        }
                    }
                    _ => {
                        let result = self.binary_num(op.opcode, a, b)?;
                        self.push_num(result)?;
                    }
                }
            }
            OP_WITHIN => {
                let max = self.pop_num()?;
                let min = self.pop_num()?;
                let x = self.pop_num()?;
                self.push_bool(min <= x && x < max);
            }

            OP_RIPEMD160 => self.map_top(|data| ripemd160(data).to_vec())?,
            OP_SHA256 => self.map_top(|data| sha256(data).to_vec())?,
            OP_HASH160 => self.map_top(|data| hash160(data).to_vec())?,
            OP_HASH256 => self.map_top(|data| hash256(data).0.to_vec())?,
            OP_SHA3 => self.map_top(|data| sha3_256(data).to_vec())?,
            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                let pubkey = self.pop()?;
                let sig = self.pop()?;
                let valid = self.check_sig(&sig, &pubkey)?;
                if op.opcode == OP_CHECKSIGVERIFY {
                    if !valid {
                        return Err(ScriptError::Failed(FailureReason::CheckSigVerify));
                    }
                } else {
                    self.push_bool(valid);
                }
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                let valid = self.check_multisig()?;
                if op.opcode == OP_CHECKMULTISIGVERIFY {
                    if !valid {
                        return Err(ScriptError::Failed(FailureReason::CheckMultiSigVerify));
                    }
                } else {
                    self.push_bool(valid);
                }
            }

            OP_RESERVEOUTPUT | OP_FINDOUTPUT => {
                let script = self.pop()?;
                let asset = self.pop()?;
                let amount = self.pop_num()?;
                let tx = self.tx()?;
                let matches = |index: usize| {
                    let output = &tx.outputs[index];
                    u64::try_from(amount) == Ok(output.asset_amount.amount)
                        && output.asset_amount.asset_id.as_ref() == asset.as_slice()
                        && output.control_script == script
                };
                let found = if op.opcode == OP_FINDOUTPUT {
                    (0..tx.outputs.len()).any(matches)
                } else {
                    match (0..tx.outputs.len()).find(|&i| !self.reserved[i] && matches(i)) {
                        Some(index) => {
                            self.reserved[index] = true;
                            true
                        }
                        None => false,
                    }
                };
                self.push_bool(found);
            }
            OP_ASSET => {
                let input = self.current_input()?;
                self.push(input.asset_id().0.to_vec())?;
            }
            OP_AMOUNT => {
                let amount = self.current_input()?.amount();
                let amount = i64::try_from(amount).map_err(|_| ScriptError::OutOfRange)?;
                self.push_num(amount)?;
            }
            OP_PROGRAM => self.push(self.program.clone())?,
            OP_TIME => {
                let timestamp = self.ctx.timestamp().ok_or(ScriptError::NoTransactionContext)?;
                let timestamp = i64::try_from(timestamp).map_err(|_| ScriptError::OutOfRange)?;
                self.push_num(timestamp)?;
            }
            OP_OUTPUTSCRIPT => {
                let index = self.pop_usize()?;
                let output = self.tx()?.outputs.get(index).ok_or(ScriptError::OutOfRange)?;
                self.push(output.control_script.clone())?;
            }
            OP_INDEX => {
                self.tx()?;
                self.push_num(self.input_index as i64)?;
            }
            OP_CATPUSHDATA => {
                let b = self.pop()?;
                let mut a = self.pop()?;
                ParsedOpcode::push(&b).encode_to(&mut a);
                self.push(a)?;
            }

            other => return Err(ScriptError::InvalidOpcode(other)),
        }
        Ok(())
    }

    fn binary_num(&self, opcode: u8, a: i64, b: i64) -> Result<i64, ScriptError> {
        let result = match opcode {
            OP_ADD => a.checked_add(b),
            OP_SUB => a.checked_sub(b),
            OP_MUL => a.checked_mul(b),
            OP_DIV | OP_MOD => {
                if b == 0 {
                    return Err(ScriptError::DivisionByZero);
                }
                if opcode == OP_DIV {
                    a.checked_div(b)
                } else {
                    a.checked_rem(b)
                }
            }
            OP_LSHIFT | OP_RSHIFT => {
                if !(0..64).contains(&b) {
                    return Err(ScriptError::OutOfRange);
                }
                if opcode == OP_LSHIFT {
                    i64::try_from(i128::from(a) << b).ok()
                } else {
                    Some(a >> b)
                }
            }
            OP_BOOLAND => Some((a != 0 && b != 0) as i64),
            OP_BOOLOR => Some((a != 0 || b != 0) as i64),
            OP_NUMEQUAL => Some((a == b) as i64),
            OP_NUMNOTEQUAL => Some((a != b) as i64),
            OP_LESSTHAN => Some((a < b) as i64),
            OP_GREATERTHAN => Some((a > b) as i64),
            OP_LESSTHANOREQUAL => Some((a <= b) as i64),
            OP_GREATERTHANOREQUAL => Some((a >= b) as i64),
            OP_MIN => Some(a.min(b)),
            OP_MAX => Some(a.max(b)),
            other => return Err(ScriptError::InvalidOpcode(other)),
        };
        result.ok_or(self.overflow())
    }

    /// `<args…> <n> <predicate> CHECKPREDICATE`: runs `predicate` in a
    /// child VM whose stack is the top `n` items, and pushes whether it
    /// succeeded. The child draws on this engine's remaining op budget.
    fn check_predicate(&mut self) -> Result<(), ScriptError> {
        let predicate = self.pop()?;
        let n = self.pop_usize()?;
        if n > self.dstack.len() {
            return Err(ScriptError::StackUnderflow);
        }
        if self.depth + 1 > self.params.max_predicate_depth {
            return Err(ScriptError::NestingTooDeep(self.params.max_predicate_depth));
        }
        let args = self.dstack.split_off(self.dstack.len() - n);

        let mut child = Engine {
            params: self.params,
            ctx: self.ctx,
            secp: Secp256k1::verification_only(),
            sighash_cache: self.sighash_cache.clone(),
            input_index: self.input_index,
            program: self.program.clone(),
            dstack: args,
            astack: Vec::new(),
            frames: Vec::new(),
            ops_used: 0,
            budget: self.budget - self.ops_used,
            depth: self.depth + 1,
            reserved: self.reserved.clone(),
        };
        let outcome = child
            .load_program(&predicate)
            .and_then(|()| child.unwind().map_err(ExecutionError::new))
            .and_then(|()| child.execute());
        self.ops_used += child.ops_used;

        match outcome {
            Ok(()) => {
                self.reserved = child.reserved;
                self.push_bool(true);
            }
            Err(err) if matches!(err.kind, ScriptError::BudgetExceeded(_)) => return Err(err.kind),
            Err(err) => {
                trace!("predicate at depth {} failed: {}", self.depth + 1, err);
                self.push_bool(false);
            }
        }
        Ok(())
    }

    fn signature_message(&self, hash_type: SigHashType) -> Result<Hash, ScriptError> {
        match self.ctx {
            ExecutionContext::Transaction { tx, .. } => {
                tx_sighash(tx, self.input_index, hash_type, &self.sighash_cache)
            }
            ExecutionContext::Block { sig_hash, .. } => Ok(sig_hash),
            ExecutionContext::Standalone => Err(ScriptError::NoTransactionContext),
        }
    }

    /// Signatures are 64-byte compact ECDSA followed by a hash type byte.
    /// An empty or unparseable signature is simply invalid; an unknown hash
    /// type is an error.
    fn check_sig(&self, sig: &[u8], pubkey: &[u8]) -> Result<bool, ScriptError> {
        let Some((&hash_byte, body)) = sig.split_last() else {
            return Ok(false);
        };
        let hash_type =
            SigHashType::from_u8(hash_byte).ok_or(ScriptError::InvalidHashType(hash_byte))?;
        let message = self.signature_message(hash_type)?;

        if body.len() != SIGNATURE_LEN {
            return Ok(false);
        }
        let Ok(signature) = Signature::from_compact(body) else {
            return Ok(false);
        };
        let Ok(key) = PublicKey::from_slice(pubkey) else {
            return Ok(false);
        };
        let message = Message::from_digest(message.0);
        Ok(self.secp.verify_ecdsa(&message, &signature, &key).is_ok())
    }

    /// `<sigs…> <m> <pubkeys…> <n> CHECKMULTISIG`. Signatures must appear
    /// in the same order as the keys they match.
    fn check_multisig(&mut self) -> Result<bool, ScriptError> {
        let n = self.pop_usize()?;
        if n > MAX_MULTISIG_KEYS {
            return Err(ScriptError::OutOfRange);
        }
        self.need(n)?;
        let keys = self.dstack.split_off(self.dstack.len() - n);

        let m = self.pop_usize()?;
        if m > n {
            return Err(ScriptError::OutOfRange);
        }
        self.need(m)?;
        let sigs = self.dstack.split_off(self.dstack.len() - m);

        let mut remaining = keys.iter();
        'sigs: for sig in &sigs {
            for key in remaining.by_ref() {
                if self.check_sig(sig, key)? {
                    continue 'sigs;
                }
            }
            return Ok(false);
        }
        Ok(true)
    }

    fn tx(&self) -> Result<&'a TxData, ScriptError> {
        match self.ctx {
            ExecutionContext::Transaction { tx, .. } => Ok(tx),
            _ => Err(ScriptError::NoTransactionContext),
        }
    }

    fn current_input(&self) -> Result<&'a TxInput, ScriptError> {
        self.tx()?
            .inputs
            .get(self.input_index)
            .ok_or(ScriptError::OutOfRange)
    }

    fn overflow(&self) -> ScriptError {
        ScriptError::NumberTooBig {
            max: self.params.max_num_len,
        }
    }

    fn need(&self, n: usize) -> Result<(), ScriptError> {
        if self.dstack.len() < n {
            return Err(ScriptError::StackUnderflow);
        }
        Ok(())
    }

    /// Pushes copies of `count` items starting `depth` from the top.
    fn copy_from(&mut self, depth: usize, count: usize) -> Result<(), ScriptError> {
        self.need(depth)?;
        let start = self.dstack.len() - depth;
        let copies: Vec<Element> = self.dstack[start..start + count].to_vec();
        self.dstack.extend(copies);
        Ok(())
    }

    fn map_top(&mut self, f: impl FnOnce(&[u8]) -> Vec<u8>) -> Result<(), ScriptError> {
        let item = self.pop()?;
        self.dstack.push(f(&item));
        Ok(())
    }

    fn push(&mut self, item: Element) -> Result<(), ScriptError> {
        if item.len() > self.params.max_element_size {
            return Err(ScriptError::ElementTooBig(self.params.max_element_size));
        }
        self.dstack.push(item);
        Ok(())
    }

    fn push_num(&mut self, value: i64) -> Result<(), ScriptError> {
        // i64::MIN would need a ninth byte
        if value == i64::MIN {
            return Err(self.overflow());
        }
        self.dstack.push(encode_num(value));
        Ok(())
    }

    fn push_bool(&mut self, value: bool) {
        self.dstack.push(encode_bool(value));
    }

    fn peek(&self, depth: usize) -> Result<&Element, ScriptError> {
        self.need(depth + 1)?;
        Ok(&self.dstack[self.dstack.len() - 1 - depth])
    }

    fn pop(&mut self) -> Result<Element, ScriptError> {
        self.dstack.pop().ok_or(ScriptError::StackUnderflow)
    }

    fn pop_bool(&mut self) -> Result<bool, ScriptError> {
        Ok(cast_to_bool(&self.pop()?))
    }

    fn pop_num(&mut self) -> Result<i64, ScriptError> {
        let item = self.pop()?;
        decode_num(&item, self.params.require_minimal, self.params.max_num_len)
    }

    fn pop_usize(&mut self) -> Result<usize, ScriptError> {
        let value = self.pop_num()?;
        usize::try_from(value).map_err(|_| ScriptError::OutOfRange)
    }
}

/// AND truncates to the shorter operand; OR and XOR zero-extend it.
fn bitwise(opcode: u8, a: Vec<u8>, b: Vec<u8>) -> Vec<u8> {
    let (mut long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    if opcode == OP_AND {
        long.truncate(short.len());
    }
    for (l, s) in long.iter_mut().zip(short.iter()) {
        match opcode {
            OP_AND => *l &= s,
            OP_OR => *l |= s,
            _ => *l ^= s,
        }
    }
    long
}

/// Runs `witness` then `predicate` in a fresh engine.
pub fn verify_script(
    params: &ConsensusParams,
    ctx: ExecutionContext<'_>,
    input_index: usize,
    witness: &[u8],
    predicate: &[u8],
) -> Result<(), ExecutionError> {
    Engine::new(params, ctx).run(input_index, witness, predicate)
}
