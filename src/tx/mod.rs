//! Transactions - build (PSBT) then sign.

pub mod builder;
pub mod signer;

use crate::error::{Result, WalletError};
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{Psbt, Transaction, Txid};
use serde::Serialize;
use std::str::FromStr;

/// Amounts as the wallet sees them, in sats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TxDetails {
    /// Wallet value consumed by the inputs.
    pub sent: u64,
    /// Wallet value coming back (change).
    pub received: u64,
    pub fee: u64,
    /// sat/vB against the estimated signed size.
    pub fee_rate: f32,
    pub vsize: u64,
}

/// Built but unsigned. Signing clones the PSBT and never touches inputs or outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedTransaction {
    pub psbt: Psbt,
    pub details: TxDetails,
}

impl UnsignedTransaction {
    pub fn txid(&self) -> Txid { self.psbt.unsigned_tx.compute_txid() }

    pub fn to_base64(&self) -> String { self.psbt.to_string() }
}

/// Parse a base64 PSBT handed back by a host.
pub fn psbt_from_base64(s: &str) -> Result<Psbt> {
    Psbt::from_str(s.trim()).map_err(|e| WalletError::InvalidArgument(format!("psbt: {}", e)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx: Transaction,
    pub txid: Txid,
    pub fee: u64,
}

impl SignedTransaction {
    /// Consensus encoding, ready for any broadcaster.
    pub fn to_hex(&self) -> String { serialize_hex(&self.tx) }
}
