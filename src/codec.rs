//! Binary wire format
//!
//! Unsigned integers are canonical base-128 varints (least significant group
//! first, no redundant trailing groups). Byte strings are a varint length
//! followed by raw bytes. The only fixed-width integer is the 4-byte
//! big-endian version field of transactions and block headers.

use crate::constants::*;
use crate::error::{DecodeError, DecodeErrorKind, Result};
use crate::hashing::hash256;
use crate::types::*;
use std::ops::BitOr;

/// Serialization mode bits for transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SerFlags(u8);

impl SerFlags {
    /// Witness elided, prevouts and metadata replaced by their hashes.
    /// This is the form the transaction hash is computed over.
    pub const HASH: SerFlags = SerFlags(0);
    /// Include raw signature scripts.
    pub const WITNESS: SerFlags = SerFlags(1 << 0);
    /// Include the full previous-output commitment of spends.
    pub const PREVOUT: SerFlags = SerFlags(1 << 1);
    /// Include raw reference data rather than its hash.
    pub const METADATA: SerFlags = SerFlags(1 << 2);
    /// Canonical storage form; the only form accepted by the decoder.
    pub const ALL: SerFlags = SerFlags(0x07);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: SerFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SerFlags {
    type Output = SerFlags;

    fn bitor(self, rhs: SerFlags) -> SerFlags {
        SerFlags(self.0 | rhs.0)
    }
}

/// Cursor over an input buffer that remembers its byte offset for errors.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn error_at(&self, offset: usize, kind: DecodeErrorKind) -> DecodeError {
        DecodeError { offset, kind }
    }

    pub fn read_u8(&mut self) -> std::result::Result<u8, DecodeError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| self.error_at(self.pos, DecodeErrorKind::Truncated))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_bytes(&mut self, n: usize) -> std::result::Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(self.error_at(self.pos, DecodeErrorKind::Truncated));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn read_u32_be(&mut self) -> std::result::Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_uvarint(&mut self) -> std::result::Result<u64, DecodeError> {
        let start = self.pos;
        let mut value = 0u64;
        for i in 0..10 {
            let byte = self.read_u8()?;
            if i == 9 && byte > 1 {
                return Err(self.error_at(start, DecodeErrorKind::VarintOverflow));
            }
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                if byte == 0 && i > 0 {
                    return Err(self.error_at(start, DecodeErrorKind::NonCanonicalVarint));
                }
                return Ok(value);
            }
        }
        Err(self.error_at(start, DecodeErrorKind::VarintOverflow))
    }

    pub fn read_uvarint_u32(&mut self) -> std::result::Result<u32, DecodeError> {
        let start = self.pos;
        let value = self.read_uvarint()?;
        u32::try_from(value).map_err(|_| self.error_at(start, DecodeErrorKind::ValueOutOfRange))
    }

    pub fn read_varstr(&mut self) -> std::result::Result<Vec<u8>, DecodeError> {
        let start = self.pos;
        let len = self.read_uvarint()?;
        let len = usize::try_from(len)
            .map_err(|_| self.error_at(start, DecodeErrorKind::ValueOutOfRange))?;
        Ok(self.read_bytes(len)?.to_vec())
    }

    pub fn read_hash(&mut self) -> std::result::Result<Hash, DecodeError> {
        let bytes = self.read_bytes(32)?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(bytes);
        Ok(Hash(hash))
    }

    /// Reads a count prefix, returning it with a preallocation bound that
    /// cannot exceed the bytes actually present.
    fn read_count(&mut self) -> std::result::Result<(u64, usize), DecodeError> {
        let count = self.read_uvarint()?;
        let capacity = usize::try_from(count).unwrap_or(usize::MAX).min(self.remaining());
        Ok((count, capacity))
    }

    pub fn finish(self) -> std::result::Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(self.error_at(self.pos, DecodeErrorKind::TrailingBytes(n))),
        }
    }
}

pub fn write_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

pub fn write_varstr(out: &mut Vec<u8>, bytes: &[u8]) {
    write_uvarint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

pub fn write_hash(out: &mut Vec<u8>, hash: &Hash) {
    out.extend_from_slice(&hash.0);
}

/// Metadata is written raw under `SerFlags::METADATA`, otherwise as its hash.
fn write_metadata(out: &mut Vec<u8>, data: &[u8], flags: SerFlags) {
    if flags.contains(SerFlags::METADATA) {
        write_varstr(out, data);
    } else {
        write_hash(out, &hash256(data));
    }
}

/// Commitment to an output's asset, amount and control script.
/// This is what the UTXO set stores and what pruned spends carry.
pub fn output_commitment(asset_amount: &AssetAmount, script: &[u8]) -> Hash {
    let mut buf = Vec::with_capacity(32 + 10 + 3 + script.len());
    asset_amount.encode_to(&mut buf);
    write_varstr(&mut buf, script);
    hash256(&buf)
}

pub trait Encodable {
    fn encode_to(&self, out: &mut Vec<u8>);

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_to(&mut out);
        out
    }
}

pub trait Decodable: Sized {
    fn decode_from(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError>;

    /// Decodes a complete value, rejecting truncated input and trailing bytes.
    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let value = Self::decode_from(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

impl Encodable for Hash {
    fn encode_to(&self, out: &mut Vec<u8>) {
        write_hash(out, self);
    }
}

impl Decodable for Hash {
    fn decode_from(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        reader.read_hash()
    }
}

impl Encodable for Outpoint {
    fn encode_to(&self, out: &mut Vec<u8>) {
        write_hash(out, &self.hash);
        write_uvarint(out, u64::from(self.index));
    }
}

impl Decodable for Outpoint {
    fn decode_from(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        let hash = reader.read_hash()?;
        let index = reader.read_uvarint_u32()?;
        Ok(Outpoint { hash, index })
    }
}

impl Encodable for AssetAmount {
    fn encode_to(&self, out: &mut Vec<u8>) {
        write_hash(out, &self.asset_id);
        write_uvarint(out, self.amount);
    }
}

impl Decodable for AssetAmount {
    fn decode_from(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        let asset_id = reader.read_hash()?;
        let amount = reader.read_uvarint()?;
        Ok(AssetAmount { asset_id, amount })
    }
}

impl TxInput {
    pub fn write_to(&self, out: &mut Vec<u8>, flags: SerFlags) {
        match &self.commitment {
            InputCommitment::Issuance(issuance) => {
                out.push(INPUT_KIND_ISSUANCE);
                write_uvarint(out, issuance.min_time);
                write_uvarint(out, issuance.max_time);
                write_hash(out, &issuance.initial_block);
                write_uvarint(out, issuance.amount);
                write_varstr(out, &issuance.issuance_script);
                write_metadata(out, &issuance.asset_definition, flags);
            }
            InputCommitment::Spend(spend) => {
                out.push(INPUT_KIND_SPEND);
                spend.outpoint.encode_to(out);
                if flags.contains(SerFlags::PREVOUT) {
                    spend.asset_amount.encode_to(out);
                    write_varstr(out, &spend.prev_script);
                } else {
                    write_hash(out, &output_commitment(&spend.asset_amount, &spend.prev_script));
                }
            }
        }
        write_metadata(out, &self.reference_data, flags);
        if flags.contains(SerFlags::WITNESS) {
            write_varstr(out, &self.signature_script);
        }
    }
}

impl Encodable for TxInput {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.write_to(out, SerFlags::ALL);
    }
}

impl Decodable for TxInput {
    fn decode_from(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        let kind_offset = reader.position();
        let commitment = match reader.read_u8()? {
            INPUT_KIND_ISSUANCE => InputCommitment::Issuance(IssuanceCommitment {
                min_time: reader.read_uvarint()?,
                max_time: reader.read_uvarint()?,
                initial_block: reader.read_hash()?,
                amount: reader.read_uvarint()?,
                issuance_script: reader.read_varstr()?,
                asset_definition: reader.read_varstr()?,
            }),
            INPUT_KIND_SPEND => InputCommitment::Spend(SpendCommitment {
                outpoint: Outpoint::decode_from(reader)?,
                asset_amount: AssetAmount::decode_from(reader)?,
                prev_script: reader.read_varstr()?,
            }),
            other => {
                return Err(DecodeError {
                    offset: kind_offset,
                    kind: DecodeErrorKind::UnknownInputKind(other),
                })
            }
        };
        let reference_data = reader.read_varstr()?;
        let signature_script = reader.read_varstr()?;
        Ok(TxInput {
            commitment,
            reference_data,
            signature_script,
        })
    }
}

impl TxOutput {
    pub fn write_to(&self, out: &mut Vec<u8>, flags: SerFlags) {
        self.asset_amount.encode_to(out);
        write_varstr(out, &self.control_script);
        write_metadata(out, &self.reference_data, flags);
    }

    pub fn commitment(&self) -> Hash {
        output_commitment(&self.asset_amount, &self.control_script)
    }
}

impl Encodable for TxOutput {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.write_to(out, SerFlags::ALL);
    }
}

impl Decodable for TxOutput {
    fn decode_from(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        Ok(TxOutput {
            asset_amount: AssetAmount::decode_from(reader)?,
            control_script: reader.read_varstr()?,
            reference_data: reader.read_varstr()?,
        })
    }
}

impl TxData {
    pub fn write_to(&self, out: &mut Vec<u8>, flags: SerFlags) {
        out.push(flags.bits());
        out.extend_from_slice(&self.version.to_be_bytes());
        write_uvarint(out, self.inputs.len() as u64);
        for input in &self.inputs {
            input.write_to(out, flags);
        }
        write_uvarint(out, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write_to(out, flags);
        }
        write_uvarint(out, self.lock_time);
        write_metadata(out, &self.reference_data, flags);
    }

    pub fn encode_with(&self, flags: SerFlags) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out, flags);
        out
    }

    /// Content hash over the pruned form: identical whether or not the
    /// witness and raw metadata are present.
    pub fn hash(&self) -> Hash {
        hash256(&self.encode_with(SerFlags::HASH))
    }
}

impl Encodable for TxData {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.write_to(out, SerFlags::ALL);
    }
}

impl Decodable for TxData {
    fn decode_from(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        let flags_offset = reader.position();
        let flags = reader.read_u8()?;
        if flags != SerFlags::ALL.bits() {
            return Err(DecodeError {
                offset: flags_offset,
                kind: DecodeErrorKind::UnsupportedFlags(flags),
            });
        }
        let version = reader.read_u32_be()?;

        let (count, capacity) = reader.read_count()?;
        let mut inputs = Vec::with_capacity(capacity);
        for _ in 0..count {
            inputs.push(TxInput::decode_from(reader)?);
        }

        let (count, capacity) = reader.read_count()?;
        let mut outputs = Vec::with_capacity(capacity);
        for _ in 0..count {
            outputs.push(TxOutput::decode_from(reader)?);
        }

        let lock_time = reader.read_uvarint()?;
        let reference_data = reader.read_varstr()?;
        Ok(TxData {
            version,
            inputs,
            outputs,
            lock_time,
            reference_data,
        })
    }
}

impl Encodable for Tx {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.data().encode_to(out);
    }
}

impl Decodable for Tx {
    fn decode_from(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        TxData::decode_from(reader).map(Tx::new)
    }
}

const HEADER_FORM_SIGHASH: u8 = 0;
const HEADER_FORM_FULL: u8 = 1;

impl BlockHeader {
    pub fn write_to(&self, out: &mut Vec<u8>, include_signature: bool) {
        out.push(if include_signature {
            HEADER_FORM_FULL
        } else {
            HEADER_FORM_SIGHASH
        });
        out.extend_from_slice(&self.version.to_be_bytes());
        write_uvarint(out, self.height);
        write_hash(out, &self.previous_block_hash);
        write_varstr(out, &self.commitment.to_bytes());
        write_uvarint(out, self.timestamp);
        if include_signature {
            write_varstr(out, &self.signature_script);
        }
        write_varstr(out, &self.output_script);
    }

    pub fn hash(&self) -> Hash {
        let mut out = Vec::new();
        self.write_to(&mut out, true);
        hash256(&out)
    }

    /// The message signed by block producers: the header without its
    /// own signature script.
    pub fn hash_for_sig(&self) -> Hash {
        let mut out = Vec::new();
        self.write_to(&mut out, false);
        hash256(&out)
    }
}

impl Encodable for BlockHeader {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.write_to(out, true);
    }
}

impl Decodable for BlockHeader {
    fn decode_from(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        let form_offset = reader.position();
        let form = reader.read_u8()?;
        if form != HEADER_FORM_FULL {
            return Err(DecodeError {
                offset: form_offset,
                kind: DecodeErrorKind::UnsupportedFlags(form),
            });
        }
        let version = reader.read_u32_be()?;
        let height = reader.read_uvarint()?;
        let previous_block_hash = reader.read_hash()?;
        let commitment_offset = reader.position();
        let raw_commitment = reader.read_varstr()?;
        let commitment = BlockCommitment::from_bytes(&raw_commitment).ok_or(DecodeError {
            offset: commitment_offset,
            kind: DecodeErrorKind::BadCommitmentLength(raw_commitment.len()),
        })?;
        let timestamp = reader.read_uvarint()?;
        let signature_script = reader.read_varstr()?;
        let output_script = reader.read_varstr()?;
        Ok(BlockHeader {
            version,
            height,
            previous_block_hash,
            commitment,
            timestamp,
            signature_script,
            output_script,
        })
    }
}

impl Encodable for Block {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.header.encode_to(out);
        write_uvarint(out, self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.encode_to(out);
        }
    }
}

impl Decodable for Block {
    fn decode_from(reader: &mut Reader<'_>) -> std::result::Result<Self, DecodeError> {
        let header = BlockHeader::decode_from(reader)?;
        let (count, capacity) = reader.read_count()?;
        let mut transactions = Vec::with_capacity(capacity);
        for _ in 0..count {
            transactions.push(Tx::decode_from(reader)?);
        }
        Ok(Block {
            header,
            transactions,
        })
    }
}
