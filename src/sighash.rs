//! Signature hashes
//!
//! The message a CHECKSIG signature commits to. For transactions it is
//!
//! ```text
//! HASH256( version
//!        ‖ inputs_hash        -- ZERO under ANYONECANPAY
//!        ‖ signed input       -- full prevout, hashed metadata, no witness
//!        ‖ outputs_hash       -- all / the matching one / ZERO
//!        ‖ lock_time
//!        ‖ HASH256(reference_data)
//!        ‖ hash_type )
//! ```
//!
//! For blocks it is the header hash without the signature script.

use crate::codec::{write_hash, write_uvarint, SerFlags};
use crate::error::ScriptError;
use crate::hashing::hash256;
use crate::types::{BlockHeader, Hash, TxData};
use std::cell::OnceCell;
use std::fmt;

/// Which parts of a transaction a signature covers.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SigHashType(u8);

impl SigHashType {
    /// Sign all inputs and outputs
    pub const ALL: SigHashType = SigHashType(1);
    /// Sign no outputs
    pub const NONE: SigHashType = SigHashType(2);
    /// Sign only the output at the signed input's index
    pub const SINGLE: SigHashType = SigHashType(3);
    /// Modifier: sign only the current input
    pub const ANYONECANPAY: u8 = 0x80;

    /// Accepts exactly the defined base types, optionally with ANYONECANPAY.
    pub fn from_u8(byte: u8) -> Option<SigHashType> {
        match byte & !Self::ANYONECANPAY {
            1..=3 => Some(SigHashType(byte)),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self.0
    }

    pub fn base(self) -> SigHashType {
        SigHashType(self.0 & !Self::ANYONECANPAY)
    }

    pub fn anyone_can_pay(self) -> bool {
        self.0 & Self::ANYONECANPAY != 0
    }

    pub fn with_anyone_can_pay(self) -> SigHashType {
        SigHashType(self.0 | Self::ANYONECANPAY)
    }
}

impl Default for SigHashType {
    fn default() -> Self {
        SigHashType::ALL
    }
}

impl fmt::Debug for SigHashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self.base() {
            SigHashType::ALL => "ALL",
            SigHashType::NONE => "NONE",
            SigHashType::SINGLE => "SINGLE",
            _ => "INVALID",
        };
        if self.anyone_can_pay() {
            write!(f, "{}|ANYONECANPAY", base)
        } else {
            f.write_str(base)
        }
    }
}

/// Per-transaction digests shared by every input's signature hash.
#[derive(Debug, Clone, Default)]
pub struct SigHashCache {
    inputs: OnceCell<Hash>,
    outputs: OnceCell<Hash>,
}

impl SigHashCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn inputs_hash(&self, tx: &TxData) -> Hash {
        *self.inputs.get_or_init(|| {
            let mut buf = Vec::new();
            for input in &tx.inputs {
                input.write_to(&mut buf, SerFlags::HASH);
            }
            hash256(&buf)
        })
    }

    fn outputs_hash(&self, tx: &TxData) -> Hash {
        *self.outputs.get_or_init(|| {
            let mut buf = Vec::new();
            for output in &tx.outputs {
                output.write_to(&mut buf, SerFlags::HASH);
            }
            hash256(&buf)
        })
    }
}

/// Signature hash of input `input_index` of `tx` under `hash_type`.
pub fn tx_sighash(
    tx: &TxData,
    input_index: usize,
    hash_type: SigHashType,
    cache: &SigHashCache,
) -> Result<Hash, ScriptError> {
    let input = tx.inputs.get(input_index).ok_or(ScriptError::OutOfRange)?;

    let mut buf = Vec::with_capacity(256);
    buf.extend_from_slice(&tx.version.to_be_bytes());

    let inputs_hash = if hash_type.anyone_can_pay() {
        Hash::ZERO
    } else {
        cache.inputs_hash(tx)
    };
    write_hash(&mut buf, &inputs_hash);

    input.write_to(&mut buf, SerFlags::PREVOUT);

    let outputs_hash = match hash_type.base() {
        SigHashType::ALL => cache.outputs_hash(tx),
        SigHashType::SINGLE => match tx.outputs.get(input_index) {
            Some(output) => {
                let mut one = Vec::new();
                output.write_to(&mut one, SerFlags::HASH);
                hash256(&one)
            }
            None => Hash::ZERO,
        },
        _ => Hash::ZERO,
    };
    write_hash(&mut buf, &outputs_hash);

    write_uvarint(&mut buf, tx.lock_time);
    write_hash(&mut buf, &hash256(&tx.reference_data));
    buf.push(hash_type.to_u8());
    Ok(hash256(&buf))
}

/// The message signed by the producer of `header`.
pub fn block_sighash(header: &BlockHeader) -> Hash {
    header.hash_for_sig()
}
