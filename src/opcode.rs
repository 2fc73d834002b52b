//! Opcode table
//!
//! Every byte value is an opcode. Values without an assigned meaning are
//! `OP_UNKNOWN<n>`: they parse like any single-byte opcode and fail only
//! when executed.

use std::borrow::Cow;

// push value
pub const OP_0: u8 = 0x00;
pub const OP_FALSE: u8 = OP_0;
pub const OP_DATA_1: u8 = 0x01;
pub const OP_DATA_20: u8 = 0x14;
pub const OP_DATA_32: u8 = 0x20;
pub const OP_DATA_33: u8 = 0x21;
pub const OP_DATA_75: u8 = 0x4b;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_RESERVED: u8 = 0x50;
pub const OP_1: u8 = 0x51;
pub const OP_TRUE: u8 = OP_1;
pub const OP_2: u8 = 0x52;
pub const OP_3: u8 = 0x53;
pub const OP_16: u8 = 0x60;

// control
pub const OP_NOP: u8 = 0x61;
pub const OP_IF: u8 = 0x63;
pub const OP_NOTIF: u8 = 0x64;
pub const OP_ELSE: u8 = 0x67;
pub const OP_ENDIF: u8 = 0x68;
pub const OP_VERIFY: u8 = 0x69;
pub const OP_RETURN: u8 = 0x6a;

// stack
pub const OP_TOALTSTACK: u8 = 0x6b;
pub const OP_FROMALTSTACK: u8 = 0x6c;
pub const OP_2DROP: u8 = 0x6d;
pub const OP_2DUP: u8 = 0x6e;
pub const OP_3DUP: u8 = 0x6f;
pub const OP_2OVER: u8 = 0x70;
pub const OP_2ROT: u8 = 0x71;
pub const OP_2SWAP: u8 = 0x72;
pub const OP_IFDUP: u8 = 0x73;
pub const OP_DEPTH: u8 = 0x74;
pub const OP_DROP: u8 = 0x75;
pub const OP_DUP: u8 = 0x76;
pub const OP_NIP: u8 = 0x77;
pub const OP_OVER: u8 = 0x78;
pub const OP_PICK: u8 = 0x79;
pub const OP_ROLL: u8 = 0x7a;
pub const OP_ROT: u8 = 0x7b;
pub const OP_SWAP: u8 = 0x7c;
pub const OP_TUCK: u8 = 0x7d;

// splice
pub const OP_CAT: u8 = 0x7e;
pub const OP_SUBSTR: u8 = 0x7f;
pub const OP_LEFT: u8 = 0x80;
pub const OP_RIGHT: u8 = 0x81;
pub const OP_SIZE: u8 = 0x82;

// bitwise
pub const OP_INVERT: u8 = 0x83;
pub const OP_AND: u8 = 0x84;
pub const OP_OR: u8 = 0x85;
pub const OP_XOR: u8 = 0x86;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;

// arithmetic
pub const OP_1ADD: u8 = 0x8b;
pub const OP_1SUB: u8 = 0x8c;
pub const OP_2MUL: u8 = 0x8d;
pub const OP_2DIV: u8 = 0x8e;
pub const OP_NEGATE: u8 = 0x8f;
pub const OP_ABS: u8 = 0x90;
pub const OP_NOT: u8 = 0x91;
pub const OP_0NOTEQUAL: u8 = 0x92;
pub const OP_ADD: u8 = 0x93;
pub const OP_SUB: u8 = 0x94;
pub const OP_MUL: u8 = 0x95;
pub const OP_DIV: u8 = 0x96;
pub const OP_MOD: u8 = 0x97;
pub const OP_LSHIFT: u8 = 0x98;
pub const OP_RSHIFT: u8 = 0x99;
pub const OP_BOOLAND: u8 = 0x9a;
pub const OP_BOOLOR: u8 = 0x9b;
pub const OP_NUMEQUAL: u8 = 0x9c;
pub const OP_NUMEQUALVERIFY: u8 = 0x9d;
pub const OP_NUMNOTEQUAL: u8 = 0x9e;
pub const OP_LESSTHAN: u8 = 0x9f;
pub const OP_GREATERTHAN: u8 = 0xa0;
pub const OP_LESSTHANOREQUAL: u8 = 0xa1;
pub const OP_GREATERTHANOREQUAL: u8 = 0xa2;
pub const OP_MIN: u8 = 0xa3;
pub const OP_MAX: u8 = 0xa4;
pub const OP_WITHIN: u8 = 0xa5;

// crypto
pub const OP_RIPEMD160: u8 = 0xa6;
pub const OP_SHA256: u8 = 0xa8;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_HASH256: u8 = 0xaa;
pub const OP_SHA3: u8 = 0xab;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

// ledger extensions
pub const OP_EVAL: u8 = 0xc0;
pub const OP_CHECKPREDICATE: u8 = 0xc1;
pub const OP_WHILE: u8 = 0xc2;
pub const OP_ENDWHILE: u8 = 0xc3;
pub const OP_RESERVEOUTPUT: u8 = 0xc4;
pub const OP_FINDOUTPUT: u8 = 0xc5;
pub const OP_ASSET: u8 = 0xc6;
pub const OP_AMOUNT: u8 = 0xc7;
pub const OP_PROGRAM: u8 = 0xc8;
pub const OP_TIME: u8 = 0xc9;
pub const OP_OUTPUTSCRIPT: u8 = 0xca;
pub const OP_INDEX: u8 = 0xcb;
pub const OP_CATPUSHDATA: u8 = 0xcc;

/// How an opcode's operand bytes are laid out in the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    /// The opcode byte alone.
    Single,
    /// `OP_DATA_n`: exactly `n` data bytes follow.
    Fixed(usize),
    /// `OP_PUSHDATA{1,2,4}`: a little-endian length of this many bytes
    /// precedes the data.
    Prefixed(usize),
}

pub fn length(op: u8) -> Length {
    match op {
        OP_DATA_1..=OP_DATA_75 => Length::Fixed(op as usize),
        OP_PUSHDATA1 => Length::Prefixed(1),
        OP_PUSHDATA2 => Length::Prefixed(2),
        OP_PUSHDATA4 => Length::Prefixed(4),
        _ => Length::Single,
    }
}

/// Opcodes that only push data; the signature script may contain nothing else.
pub fn is_push(op: u8) -> bool {
    op <= OP_16 && op != OP_RESERVED
}

/// Opcodes processed even inside a non-executing branch.
pub fn is_conditional(op: u8) -> bool {
    matches!(op, OP_IF | OP_NOTIF | OP_ELSE | OP_ENDIF | OP_WHILE | OP_ENDWHILE)
}

/// The value pushed by `OP_1`..`OP_16`.
pub fn small_int_value(op: u8) -> Option<i64> {
    match op {
        OP_0 => Some(0),
        OP_1..=OP_16 => Some(i64::from(op - (OP_1 - 1))),
        _ => None,
    }
}

/// The opcode pushing a small integer, `OP_0` and `OP_1`..`OP_16`.
pub fn small_int_op(value: i64) -> Option<u8> {
    match value {
        0 => Some(OP_0),
        1..=16 => Some(OP_1 - 1 + value as u8),
        _ => None,
    }
}

fn fixed_name(op: u8) -> Option<&'static str> {
    let name = match op {
        OP_0 => "0",
        OP_PUSHDATA1 => "PUSHDATA1",
        OP_PUSHDATA2 => "PUSHDATA2",
        OP_PUSHDATA4 => "PUSHDATA4",
        OP_1NEGATE => "1NEGATE",
        OP_RESERVED => "RESERVED",
        OP_NOP => "NOP",
        OP_IF => "IF",
        OP_NOTIF => "NOTIF",
        OP_ELSE => "ELSE",
        OP_ENDIF => "ENDIF",
        OP_VERIFY => "VERIFY",
        OP_RETURN => "RETURN",
        OP_TOALTSTACK => "TOALTSTACK",
        OP_FROMALTSTACK => "FROMALTSTACK",
        OP_2DROP => "2DROP",
        OP_2DUP => "2DUP",
        OP_3DUP => "3DUP",
        OP_2OVER => "2OVER",
        OP_2ROT => "2ROT",
        OP_2SWAP => "2SWAP",
        OP_IFDUP => "IFDUP",
        OP_DEPTH => "DEPTH",
        OP_DROP => "DROP",
        OP_DUP => "DUP",
        OP_NIP => "NIP",
        OP_OVER => "OVER",
        OP_PICK => "PICK",
        OP_ROLL => "ROLL",
        OP_ROT => "ROT",
        OP_SWAP => "SWAP",
        OP_TUCK => "TUCK",
        OP_CAT => "CAT",
        OP_SUBSTR => "SUBSTR",
        OP_LEFT => "LEFT",
        OP_RIGHT => "RIGHT",
        OP_SIZE => "SIZE",
        OP_INVERT => "INVERT",
        OP_AND => "AND",
        OP_OR => "OR",
        OP_XOR => "XOR",
        OP_EQUAL => "EQUAL",
        OP_EQUALVERIFY => "EQUALVERIFY",
        OP_1ADD => "1ADD",
        OP_1SUB => "1SUB",
        OP_2MUL => "2MUL",
        OP_2DIV => "2DIV",
        OP_NEGATE => "NEGATE",
        OP_ABS => "ABS",
        OP_NOT => "NOT",
        OP_0NOTEQUAL => "0NOTEQUAL",
        OP_ADD => "ADD",
        OP_SUB => "SUB",
        OP_MUL => "MUL",
        OP_DIV => "DIV",
        OP_MOD => "MOD",
        OP_LSHIFT => "LSHIFT",
        OP_RSHIFT => "RSHIFT",
        OP_BOOLAND => "BOOLAND",
        OP_BOOLOR => "BOOLOR",
        OP_NUMEQUAL => "NUMEQUAL",
        OP_NUMEQUALVERIFY => "NUMEQUALVERIFY",
        OP_NUMNOTEQUAL => "NUMNOTEQUAL",
        OP_LESSTHAN => "LESSTHAN",
        OP_GREATERTHAN => "GREATERTHAN",
        OP_LESSTHANOREQUAL => "LESSTHANOREQUAL",
        OP_GREATERTHANOREQUAL => "GREATERTHANOREQUAL",
        OP_MIN => "MIN",
        OP_MAX => "MAX",
        OP_WITHIN => "WITHIN",
        OP_RIPEMD160 => "RIPEMD160",
        OP_SHA256 => "SHA256",
        OP_HASH160 => "HASH160",
        OP_HASH256 => "HASH256",
        OP_SHA3 => "SHA3",
        OP_CHECKSIG => "CHECKSIG",
        OP_CHECKSIGVERIFY => "CHECKSIGVERIFY",
        OP_CHECKMULTISIG => "CHECKMULTISIG",
        OP_CHECKMULTISIGVERIFY => "CHECKMULTISIGVERIFY",
        OP_EVAL => "EVAL",
        OP_CHECKPREDICATE => "CHECKPREDICATE",
        OP_WHILE => "WHILE",
        OP_ENDWHILE => "ENDWHILE",
        OP_RESERVEOUTPUT => "RESERVEOUTPUT",
        OP_FINDOUTPUT => "FINDOUTPUT",
        OP_ASSET => "ASSET",
        OP_AMOUNT => "AMOUNT",
        OP_PROGRAM => "PROGRAM",
        OP_TIME => "TIME",
        OP_OUTPUTSCRIPT => "OUTPUTSCRIPT",
        OP_INDEX => "INDEX",
        OP_CATPUSHDATA => "CATPUSHDATA",
        _ => return None,
    };
    Some(name)
}

/// True for byte values with no assigned meaning.
pub fn is_unknown(op: u8) -> bool {
    !matches!(op, OP_DATA_1..=OP_DATA_75 | OP_1..=OP_16) && fixed_name(op).is_none()
}

/// Mnemonic without the `OP_` prefix.
pub fn name(op: u8) -> Cow<'static, str> {
    match op {
        OP_DATA_1..=OP_DATA_75 => Cow::Owned(format!("DATA_{}", op)),
        OP_1..=OP_16 => Cow::Owned(format!("{}", op - (OP_1 - 1))),
        _ => match fixed_name(op) {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(format!("UNKNOWN{}", op)),
        },
    }
}

/// Looks up a mnemonic, with or without the `OP_` prefix, case-insensitively.
/// Bare numerals are not mnemonics; the assembler treats them as integers.
pub fn from_name(token: &str) -> Option<u8> {
    let upper = token.to_ascii_uppercase();
    let bare = upper.strip_prefix("OP_").unwrap_or(&upper);

    match bare {
        "FALSE" => return Some(OP_FALSE),
        "TRUE" => return Some(OP_TRUE),
        _ => {}
    }
    if let Some(n) = bare.strip_prefix("DATA_") {
        return match n.parse::<u8>() {
            Ok(n) if (OP_DATA_1..=OP_DATA_75).contains(&n) => Some(n),
            _ => None,
        };
    }
    if let Some(n) = bare.strip_prefix("UNKNOWN") {
        return match n.parse::<u8>() {
            Ok(n) if is_unknown(n) => Some(n),
            _ => None,
        };
    }
    // OP_0 .. OP_16 are only reachable with the prefix
    if upper.starts_with("OP_") {
        if let Ok(n) = bare.parse::<i64>() {
            return small_int_op(n);
        }
    }
    if bare.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    (0..=u8::MAX).find(|&op| fixed_name(op) == Some(bare))
}
