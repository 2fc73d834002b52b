//! Consensus digests

use crate::types::{AssetId, Hash};
use bitcoin_hashes::{sha256d, Hash as BitcoinHash, HashEngine};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use sha3::Sha3_256;

/// HASH256: SHA256(SHA256(x)), the digest behind every consensus commitment
pub fn hash256(data: &[u8]) -> Hash {
    Hash(sha256d::Hash::hash(data).into_inner())
}

/// Double SHA-256 over the concatenation of `parts`, without building it.
pub fn hash256_parts(parts: &[&[u8]]) -> Hash {
    let mut engine = sha256d::Hash::engine();
    for part in parts {
        engine.input(part);
    }
    Hash(sha256d::Hash::from_engine(engine).into_inner())
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(data).into()
}

/// HASH160: RIPEMD160(SHA256(x))
pub fn hash160(data: &[u8]) -> [u8; 20] {
    ripemd160(&sha256(data))
}

pub fn sha3_256(data: &[u8]) -> [u8; 32] {
    Sha3_256::digest(data).into()
}

/// AssetID = H(H(issuance_script) ‖ initial_block_hash)
pub fn compute_asset_id(issuance_script: &[u8], initial_block: &Hash) -> AssetId {
    let script_hash = hash256(issuance_script);
    hash256_parts(&[script_hash.as_ref(), initial_block.as_ref()])
}
