//! Standard predicates and their witnesses
//!
//! Pay-to-pubkey and m-of-n multisig, plus signing helpers producing the
//! `<compact sig ‖ hash type>` form CHECKSIG expects.

use crate::constants::MAX_MULTISIG_KEYS;
use crate::error::ScriptError;
use crate::opcode::{OP_CHECKMULTISIG, OP_CHECKSIG};
use crate::script::ScriptBuilder;
use crate::sighash::{tx_sighash, SigHashCache, SigHashType};
use crate::types::{Hash, TxData};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

/// `<pubkey> CHECKSIG`
pub fn pay_to_pubkey(pubkey: &PublicKey) -> Vec<u8> {
    ScriptBuilder::new()
        .add_data(&pubkey.serialize())
        .add_op(OP_CHECKSIG)
        .build()
}

/// `<m> <pubkey_1> … <pubkey_n> <n> CHECKMULTISIG`
pub fn multisig_script(pubkeys: &[PublicKey], required: usize) -> Result<Vec<u8>, ScriptError> {
    if required == 0 || required > pubkeys.len() || pubkeys.len() > MAX_MULTISIG_KEYS {
        return Err(ScriptError::OutOfRange);
    }
    let mut builder = ScriptBuilder::new();
    builder.add_int64(required as i64);
    for pubkey in pubkeys {
        builder.add_data(&pubkey.serialize());
    }
    builder
        .add_int64(pubkeys.len() as i64)
        .add_op(OP_CHECKMULTISIG);
    Ok(builder.build())
}

/// Signs `message`, appending the hash type byte.
pub fn sign(secret: &SecretKey, message: &Hash, hash_type: SigHashType) -> Vec<u8> {
    let secp = Secp256k1::signing_only();
    let signature = secp.sign_ecdsa(&Message::from_digest(message.0), secret);
    let mut sig = signature.serialize_compact().to_vec();
    sig.push(hash_type.to_u8());
    sig
}

/// Signs input `input_index` of `tx`.
pub fn sign_tx_input(
    secret: &SecretKey,
    tx: &TxData,
    input_index: usize,
    hash_type: SigHashType,
) -> Result<Vec<u8>, ScriptError> {
    let message = tx_sighash(tx, input_index, hash_type, &SigHashCache::new())?;
    Ok(sign(secret, &message, hash_type))
}

pub fn p2pk_witness(sig: &[u8]) -> Vec<u8> {
    ScriptBuilder::new().add_data(sig).build()
}

/// Signatures in the order of the keys they belong to.
pub fn multisig_witness(sigs: &[Vec<u8>]) -> Vec<u8> {
    let mut builder = ScriptBuilder::new();
    for sig in sigs {
        builder.add_data(sig);
    }
    builder.build()
}
