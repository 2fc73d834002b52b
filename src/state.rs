//! UTXO state view
//!
//! The mutable projection validation works against: unspent outputs keyed by
//! outpoint (each holding its output commitment), per-asset issued and
//! destroyed totals, asset-definition pointers, and the issuance
//! transactions applied while their windows are open. A view is single-writer;
//! callers wanting speculative validation clone a `Snapshot` and throw the
//! copy away.

use crate::codec::Encodable;
use crate::error::{ConsensusError, Result};
use crate::hashing::hash256_parts;
use crate::merkle::merkle_root;
use crate::types::{AssetId, Hash, Outpoint};
use std::collections::BTreeMap;

pub trait StateView {
    /// Commitment of the unspent output at `outpoint`, if it is unspent.
    fn utxo(&self, outpoint: &Outpoint) -> Option<Hash>;

    fn contains_utxo(&self, outpoint: &Outpoint) -> bool {
        self.utxo(outpoint).is_some()
    }

    /// Adds an unspent output. Re-adding a live outpoint corrupts the set.
    fn insert_utxo(&mut self, outpoint: Outpoint, commitment: Hash) -> Result<()>;

    /// Removes an unspent output, returning its commitment.
    fn consume_utxo(&mut self, outpoint: &Outpoint) -> Option<Hash>;

    fn issued(&self, asset: &AssetId) -> u64;

    fn destroyed(&self, asset: &AssetId) -> u64;

    fn record_issuance(&mut self, asset: AssetId, amount: u64) -> Result<()>;

    fn record_destruction(&mut self, asset: AssetId, amount: u64) -> Result<()>;

    /// Hash of the latest definition published for `asset`.
    fn asset_definition(&self, asset: &AssetId) -> Option<Hash>;

    fn set_asset_definition(&mut self, asset: AssetId, definition_hash: Hash);

    /// Whether the issuance transaction `tx_hash` was applied and its
    /// window has not yet been pruned.
    fn issuance_applied(&self, tx_hash: &Hash) -> bool;

    /// Remembers an applied issuance transaction until `expires`, the end
    /// of its issuance window.
    fn remember_issuance(&mut self, tx_hash: Hash, expires: u64);

    /// Forgets issuances whose window closed before `timestamp`; they can
    /// no longer validate anyway.
    fn prune_issuances(&mut self, timestamp: u64);

    /// Commitment to the UTXO set that block headers carry.
    fn state_root(&self) -> Hash;
}

/// In-memory state, ordered so that the state root is a pure function of
/// the contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    utxos: BTreeMap<Outpoint, Hash>,
    issued: BTreeMap<AssetId, u64>,
    destroyed: BTreeMap<AssetId, u64>,
    asset_definitions: BTreeMap<AssetId, Hash>,
    issuances: BTreeMap<Hash, u64>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn utxo_count(&self) -> usize {
        self.utxos.len()
    }

    pub fn utxos(&self) -> impl Iterator<Item = (&Outpoint, &Hash)> {
        self.utxos.iter()
    }

    /// Issuance transactions still remembered.
    pub fn issuance_count(&self) -> usize {
        self.issuances.len()
    }
}

fn add_total(
    totals: &mut BTreeMap<AssetId, u64>,
    asset: AssetId,
    amount: u64,
    what: &str,
) -> Result<()> {
    let total = totals.entry(asset).or_insert(0);
    *total = total.checked_add(amount).ok_or_else(|| {
        ConsensusError::StateCorruption(format!("{} total of asset {} overflows", what, asset))
    })?;
    Ok(())
}

impl StateView for Snapshot {
    fn utxo(&self, outpoint: &Outpoint) -> Option<Hash> {
        self.utxos.get(outpoint).copied()
    }

    fn insert_utxo(&mut self, outpoint: Outpoint, commitment: Hash) -> Result<()> {
        if self.utxos.insert(outpoint, commitment).is_some() {
            return Err(ConsensusError::StateCorruption(format!(
                "output {} created twice",
                outpoint
            )));
        }
        Ok(())
    }

    fn consume_utxo(&mut self, outpoint: &Outpoint) -> Option<Hash> {
        self.utxos.remove(outpoint)
    }

    fn issued(&self, asset: &AssetId) -> u64 {
        self.issued.get(asset).copied().unwrap_or(0)
    }

    fn destroyed(&self, asset: &AssetId) -> u64 {
        self.destroyed.get(asset).copied().unwrap_or(0)
    }

    fn record_issuance(&mut self, asset: AssetId, amount: u64) -> Result<()> {
        add_total(&mut self.issued, asset, amount, "issued")
    }

    fn record_destruction(&mut self, asset: AssetId, amount: u64) -> Result<()> {
        add_total(&mut self.destroyed, asset, amount, "destroyed")
    }

    fn asset_definition(&self, asset: &AssetId) -> Option<Hash> {
        self.asset_definitions.get(asset).copied()
    }

    fn set_asset_definition(&mut self, asset: AssetId, definition_hash: Hash) {
        self.asset_definitions.insert(asset, definition_hash);
    }

    fn issuance_applied(&self, tx_hash: &Hash) -> bool {
        self.issuances.contains_key(tx_hash)
    }

    fn remember_issuance(&mut self, tx_hash: Hash, expires: u64) {
        self.issuances.insert(tx_hash, expires);
    }

    fn prune_issuances(&mut self, timestamp: u64) {
        self.issuances.retain(|_, expires| *expires >= timestamp);
    }

    fn state_root(&self) -> Hash {
        let leaves: Vec<Hash> = self
            .utxos
            .iter()
            .map(|(outpoint, commitment)| utxo_leaf(outpoint, commitment))
            .collect();
        merkle_root(&leaves)
    }
}

/// HASH256(outpoint ‖ commitment)
pub fn utxo_leaf(outpoint: &Outpoint, commitment: &Hash) -> Hash {
    hash256_parts(&[&outpoint.encode(), commitment.as_ref()])
}
