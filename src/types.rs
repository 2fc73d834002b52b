//! Core ledger types for consensus validation

use crate::hashing::{compute_asset_id, hash256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

/// Hash type: 256-bit digest, rendered as hex
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub [u8; 32]);

/// Asset identifier: hash of the issuance predicate bound to the initial block
pub type AssetId = Hash;

/// Contract hash: digest of a contract's assembled script bytes
pub type ContractHash = Hash;

/// Byte string type
pub type ByteString = Vec<u8>;

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn from_slice(bytes: &[u8]) -> Option<Hash> {
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Hash(array))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Hash(bytes))
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde adapter rendering byte strings as hex.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// OutPoint: a previously created output, the UTXO key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outpoint {
    pub hash: Hash,
    pub index: u32,
}

impl Outpoint {
    pub fn new(hash: Hash, index: u32) -> Self {
        Self { hash, index }
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.index)
    }
}

/// An amount of a single asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetAmount {
    pub asset_id: AssetId,
    pub amount: u64,
}

impl AssetAmount {
    pub fn new(asset_id: AssetId, amount: u64) -> Self {
        Self { asset_id, amount }
    }
}

/// Spend commitment: the output being consumed, as claimed by the spender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendCommitment {
    pub outpoint: Outpoint,
    pub asset_amount: AssetAmount,
    #[serde(with = "hex_bytes")]
    pub prev_script: ByteString,
}

/// Issuance commitment: new units of the asset defined by `issuance_script`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceCommitment {
    pub min_time: u64,
    pub max_time: u64,
    pub initial_block: Hash,
    pub amount: u64,
    #[serde(with = "hex_bytes")]
    pub issuance_script: ByteString,
    #[serde(with = "hex_bytes")]
    pub asset_definition: ByteString,
}

impl IssuanceCommitment {
    pub fn asset_id(&self) -> AssetId {
        compute_asset_id(&self.issuance_script, &self.initial_block)
    }
}

/// Exactly one commitment kind is active per input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputCommitment {
    Issuance(IssuanceCommitment),
    Spend(SpendCommitment),
}

/// Transaction input: commitment, reference data and witness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub commitment: InputCommitment,
    #[serde(with = "hex_bytes")]
    pub reference_data: ByteString,
    #[serde(with = "hex_bytes")]
    pub signature_script: ByteString,
}

impl TxInput {
    pub fn spend(outpoint: Outpoint, asset_amount: AssetAmount, prev_script: ByteString) -> Self {
        Self {
            commitment: InputCommitment::Spend(SpendCommitment {
                outpoint,
                asset_amount,
                prev_script,
            }),
            reference_data: Vec::new(),
            signature_script: Vec::new(),
        }
    }

    pub fn issuance(issuance: IssuanceCommitment) -> Self {
        Self {
            commitment: InputCommitment::Issuance(issuance),
            reference_data: Vec::new(),
            signature_script: Vec::new(),
        }
    }

    pub fn is_issuance(&self) -> bool {
        matches!(self.commitment, InputCommitment::Issuance(_))
    }

    pub fn outpoint(&self) -> Option<&Outpoint> {
        match &self.commitment {
            InputCommitment::Spend(spend) => Some(&spend.outpoint),
            InputCommitment::Issuance(_) => None,
        }
    }

    pub fn asset_id(&self) -> AssetId {
        match &self.commitment {
            InputCommitment::Spend(spend) => spend.asset_amount.asset_id,
            InputCommitment::Issuance(issuance) => issuance.asset_id(),
        }
    }

    pub fn amount(&self) -> u64 {
        match &self.commitment {
            InputCommitment::Spend(spend) => spend.asset_amount.amount,
            InputCommitment::Issuance(issuance) => issuance.amount,
        }
    }

    /// The predicate that must be satisfied to authorize this input.
    pub fn predicate(&self) -> &[u8] {
        match &self.commitment {
            InputCommitment::Spend(spend) => &spend.prev_script,
            InputCommitment::Issuance(issuance) => &issuance.issuance_script,
        }
    }
}

/// Transaction output: an amount of an asset locked by a predicate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub asset_amount: AssetAmount,
    #[serde(with = "hex_bytes")]
    pub control_script: ByteString,
    #[serde(with = "hex_bytes")]
    pub reference_data: ByteString,
}

impl TxOutput {
    pub fn new(asset_id: AssetId, amount: u64, control_script: ByteString) -> Self {
        Self {
            asset_amount: AssetAmount::new(asset_id, amount),
            control_script,
            reference_data: Vec::new(),
        }
    }
}

/// Transaction contents without the cached hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxData {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u64,
    #[serde(with = "hex_bytes")]
    pub reference_data: ByteString,
}

impl Default for TxData {
    fn default() -> Self {
        Self {
            version: crate::constants::CURRENT_TX_VERSION,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
            reference_data: Vec::new(),
        }
    }
}

/// Transaction: `TxData` plus its cached content hash. The hash is always
/// computed from the contents, including when read from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TxJson")]
pub struct Tx {
    hash: Hash,
    #[serde(flatten)]
    data: TxData,
}

/// JSON form of `Tx`; a supplied hash must match the contents.
#[derive(Deserialize)]
struct TxJson {
    #[serde(default)]
    hash: Option<Hash>,
    #[serde(flatten)]
    data: TxData,
}

impl TryFrom<TxJson> for Tx {
    type Error = String;

    fn try_from(json: TxJson) -> std::result::Result<Self, String> {
        let tx = Tx::new(json.data);
        match json.hash {
            Some(claimed) if claimed != tx.hash => Err(format!(
                "transaction hash {} does not match its contents ({})",
                claimed, tx.hash
            )),
            _ => Ok(tx),
        }
    }
}

impl Tx {
    pub fn new(data: TxData) -> Self {
        let hash = data.hash();
        Self { hash, data }
    }

    /// Cached hash of the witness-free contents
    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn data(&self) -> &TxData {
        &self.data
    }

    /// Digest over the full canonical serialization, witness included.
    pub fn witness_hash(&self) -> Hash {
        hash256(&self.data.encode_with(crate::codec::SerFlags::ALL))
    }

    pub fn outpoint(&self, index: u32) -> Outpoint {
        Outpoint::new(self.hash, index)
    }

    pub fn into_data(self) -> TxData {
        self.data
    }
}

impl Deref for Tx {
    type Target = TxData;

    fn deref(&self) -> &TxData {
        &self.data
    }
}

impl From<TxData> for Tx {
    fn from(data: TxData) -> Self {
        Tx::new(data)
    }
}

/// The 64-byte block commitment: transaction root then state root
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCommitment {
    pub tx_root: Hash,
    pub state_root: Hash,
}

impl BlockCommitment {
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.tx_root.0);
        bytes[32..].copy_from_slice(&self.state_root.0);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 64 {
            return None;
        }
        Some(Self {
            tx_root: Hash::from_slice(&bytes[..32])?,
            state_root: Hash::from_slice(&bytes[32..])?,
        })
    }
}

/// Block header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub height: u64,
    pub previous_block_hash: Hash,
    pub commitment: BlockCommitment,
    pub timestamp: u64,
    #[serde(with = "hex_bytes")]
    pub signature_script: ByteString,
    #[serde(with = "hex_bytes")]
    pub output_script: ByteString,
}

impl BlockHeader {
    pub fn tx_root(&self) -> Hash {
        self.commitment.tx_root
    }

    pub fn state_root(&self) -> Hash {
        self.commitment.state_root
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 1
    }
}

/// Block: header plus ordered transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Tx>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }
}
