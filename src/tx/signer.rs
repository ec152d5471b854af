//! Signer - P2WPKH inputs, all-or-nothing.
//!
//! Every input must be an unspent output the wallet holds the key for; otherwise nothing is
//! signed and the call fails with `SigningFailed`. Nonces are RFC6979, so re-signing the same
//! transaction yields the same bytes.

use super::{SignedTransaction, UnsignedTransaction};
use crate::error::{Result, WalletError};
use crate::store::WalletStore;
use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::Message;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Amount, Witness};
use tracing::debug;

pub fn sign(store: &WalletStore, unsigned: &UnsignedTransaction) -> Result<SignedTransaction> {
    let mut psbt = unsigned.psbt.clone();
    let tx = psbt.unsigned_tx.clone();
    if psbt.inputs.len() != tx.input.len() {
        return Err(WalletError::SigningFailed("psbt input count does not match transaction".into()));
    }
    let secp = store.secp()?;
    let mut cache = SighashCache::new(&tx);
    let mut input_total = 0u64;

    for (i, txin) in tx.input.iter().enumerate() {
        let outpoint = txin.previous_output;
        let utxo = store
            .utxo(&outpoint)?
            .filter(|u| !u.is_spent)
            .ok_or_else(|| WalletError::SigningFailed(format!("input {} is not an unspent wallet output", outpoint)))?;
        let prevout = utxo.txout();
        if psbt.inputs[i].witness_utxo.as_ref().is_some_and(|w| *w != prevout) {
            return Err(WalletError::SigningFailed(format!("input {} prevout does not match the wallet's", outpoint)));
        }

        let key = store.signing_key(utxo.keychain, utxo.index, &utxo.script_pubkey)?;
        let sighash = cache
            .p2wpkh_signature_hash(i, &utxo.script_pubkey, Amount::from_sat(utxo.value), EcdsaSighashType::All)
            .map_err(|e| WalletError::SigningFailed(e.to_string()))?;
        let message = Message::from_digest(sighash.to_byte_array());
        let signature = ecdsa::Signature::sighash_all(secp.sign_ecdsa(&message, &key.inner));
        let public_key = key.public_key(secp);

        let mut witness = Witness::new();
        witness.push(signature.serialize());
        witness.push(public_key.inner.serialize());

        let input = &mut psbt.inputs[i];
        input.witness_utxo = Some(prevout);
        input.partial_sigs.insert(public_key, signature);
        input.final_script_witness = Some(witness);
        input_total += utxo.value;
    }

    let output_total: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
    let fee = input_total
        .checked_sub(output_total)
        .ok_or_else(|| WalletError::SigningFailed("outputs exceed inputs".into()))?;
    let signed = psbt.extract_tx_unchecked_fee_rate();
    let txid = signed.compute_txid();
    debug!(%txid, inputs = tx.input.len(), fee, "signed transaction");
    Ok(SignedTransaction { tx: signed, txid, fee })
}
