//! TransactionBuilder - largest-first selection over spendable outputs.
//!
//! Inputs are taken by value descending (ties by outpoint) until they cover the amount plus
//! the fee for a change-less transaction. A change output is added when what is left after
//! the change-inclusive fee is not dust; otherwise the remainder goes to the fee.

use super::{TxDetails, UnsignedTransaction};
use crate::error::{Result, WalletError};
use crate::store::{Utxo, WalletStore};
use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, Psbt, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use std::str::FromStr;
use tracing::debug;

/// version + locktime + counts, plus the segwit marker and flag.
const OVERHEAD_WEIGHT: u64 = 4 * (4 + 4 + 1 + 1) + 2;
/// Outpoint, empty script_sig and sequence, plus a 72-byte signature and compressed key.
const P2WPKH_INPUT_WEIGHT: u64 = 4 * (32 + 4 + 1 + 4) + (1 + 1 + 72 + 1 + 33);

fn output_weight(script: &Script) -> u64 {
    let len = script.len() as u64;
    let prefix = if len < 0xfd { 1 } else { 3 };
    4 * (8 + prefix + len)
}

/// Virtual size of a signed transaction spending `inputs` P2WPKH outputs.
pub fn estimate_vsize(inputs: usize, outputs: &[&Script]) -> u64 {
    let weight = OVERHEAD_WEIGHT + P2WPKH_INPUT_WEIGHT * inputs as u64 + outputs.iter().map(|s| output_weight(s)).sum::<u64>();
    weight.div_ceil(4)
}

fn fee_for(vsize: u64, fee_rate: f32) -> u64 {
    (vsize as f64 * fee_rate as f64).ceil() as u64
}

pub fn check_fee_rate(fee_rate: f32) -> Result<()> {
    if !fee_rate.is_finite() || fee_rate <= 0.0 {
        return Err(WalletError::InvalidFeeRate(fee_rate));
    }
    Ok(())
}

/// Recipient script for `address`, which must belong to the wallet's network.
pub fn recipient_script(store: &WalletStore, address: &str) -> Result<ScriptBuf> {
    let network = store.network()?;
    let parsed = Address::from_str(address.trim()).map_err(|e| WalletError::InvalidAddress(format!("{}: {}", address, e)))?;
    let checked = parsed
        .require_network(network.to_bitcoin())
        .map_err(|_| WalletError::InvalidAddress(format!("{} is not a {} address", address, network)))?;
    Ok(checked.script_pubkey())
}

pub fn build(store: &WalletStore, recipient: &str, amount: u64, fee_rate: f32) -> Result<UnsignedTransaction> {
    check_fee_rate(fee_rate)?;
    let script = recipient_script(store, recipient)?;
    if amount == 0 || Amount::from_sat(amount) < script.minimal_non_dust() {
        return Err(WalletError::InvalidAmount(amount));
    }
    let (change_script, change_index) = store.peek_change()?;

    let mut candidates = store.spendable_utxos()?;
    candidates.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.outpoint.cmp(&b.outpoint)));
    let available: u64 = candidates.iter().map(|u| u.value).sum();

    // amount + fee for `inputs` inputs paying `outputs`; `None` past u64::MAX.
    let target = |inputs: usize, outputs: &[&Script]| amount.checked_add(fee_for(estimate_vsize(inputs, outputs), fee_rate));
    let insufficient = |needed: Option<u64>| WalletError::InsufficientFunds { needed: needed.unwrap_or(u64::MAX), available };

    let mut selected: Vec<Utxo> = Vec::new();
    let mut selected_value = 0u64;
    for utxo in candidates {
        selected_value += utxo.value;
        selected.push(utxo);
        match target(selected.len(), &[&script]) {
            Some(needed) if selected_value >= needed => break,
            Some(_) => {}
            None => return Err(insufficient(None)),
        }
    }
    let needed = target(selected.len().max(1), &[&script]);
    match needed {
        Some(n) if selected_value >= n => {}
        _ => return Err(insufficient(needed)),
    }

    let mut outputs = vec![TxOut { value: Amount::from_sat(amount), script_pubkey: script.clone() }];
    let change_vsize = estimate_vsize(selected.len(), &[&script, &change_script]);
    let leftover = target(selected.len(), &[&script, &change_script]).and_then(|n| selected_value.checked_sub(n)).unwrap_or(0);
    let (fee, vsize, change) = if leftover > 0 && Amount::from_sat(leftover) >= change_script.minimal_non_dust() {
        outputs.push(TxOut { value: Amount::from_sat(leftover), script_pubkey: change_script });
        (selected_value - amount - leftover, change_vsize, leftover)
    } else {
        (selected_value - amount, estimate_vsize(selected.len(), &[&script]), 0)
    };

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: selected
            .iter()
            .map(|u| TxIn {
                previous_output: u.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs,
    };
    let mut psbt = Psbt::from_unsigned_tx(tx).map_err(|e| WalletError::InvalidArgument(e.to_string()))?;
    for (input, utxo) in psbt.inputs.iter_mut().zip(&selected) {
        input.witness_utxo = Some(utxo.txout());
    }

    debug!(inputs = selected.len(), fee, change, change_index, "built transaction");
    Ok(UnsignedTransaction {
        psbt,
        details: TxDetails { sent: selected_value, received: change, fee, fee_rate, vsize },
    })
}

/// Wallet-side view of a PSBT handed back by a host.
pub fn describe(store: &WalletStore, psbt: &Psbt) -> Result<TxDetails> {
    let tx = &psbt.unsigned_tx;
    let (change_script, _) = store.peek_change()?;
    let mut sent = 0u64;
    let mut input_total = 0u64;
    for (txin, input) in tx.input.iter().zip(&psbt.inputs) {
        let prev = match (&input.witness_utxo, store.utxo(&txin.previous_output)?) {
            (_, Some(utxo)) => {
                sent += utxo.value;
                utxo.txout()
            }
            (Some(out), None) => out.clone(),
            (None, None) => {
                return Err(WalletError::InvalidArgument(format!("input {} has no prevout", txin.previous_output)))
            }
        };
        input_total += prev.value.to_sat();
    }
    let mut received = 0u64;
    for out in &tx.output {
        if out.script_pubkey == change_script || store.owner_of(&out.script_pubkey)?.is_some() {
            received += out.value.to_sat();
        }
    }
    let output_total: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
    let fee = input_total
        .checked_sub(output_total)
        .ok_or_else(|| WalletError::InvalidArgument("outputs exceed inputs".into()))?;
    let scripts: Vec<&Script> = tx.output.iter().map(|o| o.script_pubkey.as_script()).collect();
    let vsize = estimate_vsize(tx.input.len(), &scripts);
    Ok(TxDetails { sent, received, fee, fee_rate: fee as f32 / vsize as f32, vsize })
}
