//! Script encoding: parser, builder, assembler and disassembler
//!
//! A program is a byte string of opcodes, some of which carry inline data.
//! `parse_script` splits it into `ParsedOpcode`s and `unparse` puts it back
//! together byte for byte. `ScriptBuilder` only ever emits canonical pushes
//! (the shortest opcode for the data), so parsing a built script and
//! rebuilding it is exact.

use crate::error::ScriptParseError;
use crate::opcode::{self, Length, *};
use crate::scriptnum::encode_num;

/// One opcode and the data it pushes, if any.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedOpcode {
    pub opcode: u8,
    pub data: Vec<u8>,
}

impl ParsedOpcode {
    pub fn new(opcode: u8) -> Self {
        Self {
            opcode,
            data: Vec::new(),
        }
    }

    /// The canonical push of `data`.
    pub fn push(data: &[u8]) -> Self {
        let opcode = canonical_push_opcode(data);
        match opcode {
            OP_DATA_1..=OP_PUSHDATA4 => Self {
                opcode,
                data: data.to_vec(),
            },
            _ => Self::new(opcode),
        }
    }

    pub fn is_push(&self) -> bool {
        opcode::is_push(self.opcode)
    }

    /// The bytes this opcode places on the stack, if it is a push.
    pub fn push_value(&self) -> Option<Vec<u8>> {
        match self.opcode {
            OP_0 => Some(Vec::new()),
            OP_DATA_1..=OP_PUSHDATA4 => Some(self.data.clone()),
            OP_1NEGATE => Some(encode_num(-1)),
            OP_1..=OP_16 => small_int_value(self.opcode).map(encode_num),
            _ => None,
        }
    }

    /// True unless this is a push that a shorter opcode could have made.
    pub fn is_canonical(&self) -> bool {
        match self.push_value() {
            Some(value) => self.opcode == canonical_push_opcode(&value),
            None => true,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match opcode::length(self.opcode) {
            Length::Single => 1,
            Length::Fixed(n) => 1 + n,
            Length::Prefixed(n) => 1 + n + self.data.len(),
        }
    }

    pub fn encode_to(&self, out: &mut Vec<u8>) {
        out.push(self.opcode);
        match opcode::length(self.opcode) {
            Length::Single => {}
            Length::Fixed(_) => out.extend_from_slice(&self.data),
            Length::Prefixed(width) => {
                let len = (self.data.len() as u32).to_le_bytes();
                out.extend_from_slice(&len[..width]);
                out.extend_from_slice(&self.data);
            }
        }
    }
}

/// The shortest opcode that pushes `data`.
pub fn canonical_push_opcode(data: &[u8]) -> u8 {
    match data.len() {
        0 => OP_0,
        1 if (1..=16).contains(&data[0]) => OP_1 - 1 + data[0],
        1 if data[0] == 0x81 => OP_1NEGATE,
        n if n <= OP_DATA_75 as usize => n as u8,
        n if n <= 0xff => OP_PUSHDATA1,
        n if n <= 0xffff => OP_PUSHDATA2,
        _ => OP_PUSHDATA4,
    }
}

/// Splits a program into opcodes. Fails only on truncated pushes; unknown
/// bytes and non-canonical pushes are left for the VM to judge.
pub fn parse_script(script: &[u8]) -> Result<Vec<ParsedOpcode>, ScriptParseError> {
    let mut ops = Vec::new();
    let mut pos = 0;
    while pos < script.len() {
        let offset = pos;
        let op = script[pos];
        pos += 1;

        let data_len = match opcode::length(op) {
            Length::Single => 0,
            Length::Fixed(n) => n,
            Length::Prefixed(width) => {
                let available = script.len() - pos;
                if available < width {
                    return Err(ScriptParseError::TruncatedPush {
                        offset,
                        needed: width,
                        available,
                    });
                }
                let mut len = [0u8; 4];
                len[..width].copy_from_slice(&script[pos..pos + width]);
                pos += width;
                u32::from_le_bytes(len) as usize
            }
        };

        let available = script.len() - pos;
        if data_len > available {
            return Err(ScriptParseError::TruncatedPush {
                offset,
                needed: data_len,
                available,
            });
        }
        ops.push(ParsedOpcode {
            opcode: op,
            data: script[pos..pos + data_len].to_vec(),
        });
        pos += data_len;
    }
    Ok(ops)
}

/// Like `parse_script`, additionally rejecting any push that is not the
/// shortest encoding of its data.
pub fn parse_canonical(script: &[u8]) -> Result<Vec<ParsedOpcode>, ScriptParseError> {
    let ops = parse_script(script)?;
    let mut offset = 0;
    for op in &ops {
        if !op.is_canonical() {
            return Err(ScriptParseError::NonCanonicalPush { offset });
        }
        offset += op.encoded_len();
    }
    Ok(ops)
}

pub fn unparse(ops: &[ParsedOpcode]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ops.iter().map(ParsedOpcode::encoded_len).sum());
    for op in ops {
        op.encode_to(&mut out);
    }
    out
}

/// True if every opcode only pushes data. Malformed programs are not push-only.
pub fn is_push_only(script: &[u8]) -> bool {
    match parse_script(script) {
        Ok(ops) => ops.iter().all(ParsedOpcode::is_push),
        Err(_) => false,
    }
}

/// A program starting with RETURN can never succeed; outputs locked by one
/// are destroyed value.
pub fn is_unspendable(script: &[u8]) -> bool {
    script.first() == Some(&OP_RETURN)
}

/// Incremental program construction with canonical pushes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptBuilder {
    script: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_op(&mut self, op: u8) -> &mut Self {
        self.script.push(op);
        self
    }

    pub fn add_ops(&mut self, ops: &[u8]) -> &mut Self {
        self.script.extend_from_slice(ops);
        self
    }

    pub fn add_data(&mut self, data: &[u8]) -> &mut Self {
        ParsedOpcode::push(data).encode_to(&mut self.script);
        self
    }

    /// Pushes `value` as a minimally encoded ScriptNum.
    pub fn add_int64(&mut self, value: i64) -> &mut Self {
        self.add_data(&encode_num(value))
    }

    /// Appends bytes verbatim.
    pub fn add_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.script.extend_from_slice(bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }

    pub fn script(&self) -> &[u8] {
        &self.script
    }

    pub fn build(&self) -> Vec<u8> {
        self.script.clone()
    }
}

/// Assembles the text form: opcode mnemonics (with or without `OP_`),
/// decimal integers (minimal pushes), `0x` hex (raw bytes, spliced as is)
/// and single-quoted strings (pushed as data).
pub fn assemble(text: &str) -> Result<Vec<u8>, ScriptParseError> {
    let mut builder = ScriptBuilder::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '\'' {
            chars.next();
            let mut end = None;
            for (i, c) in chars.by_ref() {
                if c == '\'' {
                    end = Some(i);
                    break;
                }
            }
            let end = end.ok_or(ScriptParseError::UnterminatedString)?;
            builder.add_data(text[start + 1..end].as_bytes());
            continue;
        }

        let mut end = text.len();
        while let Some(&(i, c)) = chars.peek() {
            if c.is_whitespace() {
                end = i;
                break;
            }
            chars.next();
        }
        assemble_token(&mut builder, &text[start..end])?;
    }
    Ok(builder.build())
}

fn assemble_token(builder: &mut ScriptBuilder, token: &str) -> Result<(), ScriptParseError> {
    if let Some(hex_digits) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        let bytes =
            hex::decode(hex_digits).map_err(|_| ScriptParseError::InvalidHex(token.to_string()))?;
        builder.add_raw(&bytes);
        return Ok(());
    }

    let digits = token.strip_prefix('-').unwrap_or(token);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        let value: i64 = token
            .parse()
            .map_err(|_| ScriptParseError::IntegerOutOfRange(token.to_string()))?;
        builder.add_int64(value);
        return Ok(());
    }

    match opcode::from_name(token) {
        Some(op) => {
            builder.add_op(op);
            Ok(())
        }
        None => Err(ScriptParseError::UnknownToken(token.to_string())),
    }
}

/// Renders a program in the text form accepted by `assemble`.
///
/// Small integers print as numbers and data pushes as their opcode followed
/// by the raw operand bytes, so `assemble(disassemble(p)) == p` for every
/// program that parses, canonical or not.
pub fn disassemble(script: &[u8]) -> Result<String, ScriptParseError> {
    let ops = parse_script(script)?;
    Ok(disassemble_ops(&ops))
}

pub fn disassemble_ops(ops: &[ParsedOpcode]) -> String {
    let tokens: Vec<String> = ops.iter().map(render_op).collect();
    tokens.join(" ")
}

/// Best-effort rendering for diagnostics: a program that does not parse is
/// shown as raw hex.
pub fn disassemble_lossy(script: &[u8]) -> String {
    match disassemble(script) {
        Ok(text) => text,
        Err(_) => format!("0x{}", hex::encode(script)),
    }
}

fn render_op(op: &ParsedOpcode) -> String {
    match opcode::length(op.opcode) {
        Length::Single => opcode::name(op.opcode).into_owned(),
        Length::Fixed(_) => format!("{} 0x{}", opcode::name(op.opcode), hex::encode(&op.data)),
        Length::Prefixed(width) => {
            let len = (op.data.len() as u32).to_le_bytes();
            format!(
                "{} 0x{}{}",
                opcode::name(op.opcode),
                hex::encode(&len[..width]),
                hex::encode(&op.data)
            )
        }
    }
}
