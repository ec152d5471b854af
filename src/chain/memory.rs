//! In-process chain. Mempool + blocks in a mutex, Electrum semantics on top.
//!
//! Useful offline and as a regtest stand-in: fund scripts, mine blocks, inject failures.

use super::{ChainError, ChainResult, ChainSource, HistoryItem, UnspentItem};
use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

const GENESIS_TIME: u64 = 1_700_000_000;
const BLOCK_INTERVAL: u64 = 600;

#[derive(Default)]
struct State {
    tip: u32,
    /// Arrival order; history is reported in this order within a height.
    order: Vec<Txid>,
    txs: HashMap<Txid, (Transaction, Option<u32>)>,
    spent: HashMap<OutPoint, Txid>,
    failures: u32,
    /// What an injected failure looks like; a connection drop unless set.
    failure: Option<ChainError>,
    reject: Option<String>,
    nonce: u64,
}

impl State {
    fn insert(&mut self, tx: Transaction) -> Txid {
        let txid = tx.compute_txid();
        if !tx.is_coinbase() {
            for input in &tx.input {
                self.spent.insert(input.previous_output, txid);
            }
        }
        self.order.push(txid);
        self.txs.insert(txid, (tx, None));
        txid
    }

    fn prevout(&self, outpoint: &OutPoint) -> Option<&TxOut> {
        self.txs.get(&outpoint.txid).and_then(|(tx, _)| tx.output.get(outpoint.vout as usize))
    }

    fn touches(&self, tx: &Transaction, script: &Script) -> bool {
        tx.output.iter().any(|o| o.script_pubkey.as_script() == script)
            || (!tx.is_coinbase()
                && tx.input.iter().any(|i| self.prevout(&i.previous_output).is_some_and(|p| p.script_pubkey.as_script() == script)))
    }
}

#[derive(Default)]
pub struct MemoryChain {
    state: Mutex<State>,
}

impl MemoryChain {
    pub fn new() -> Self { Self::default() }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consume one injected failure, if any.
    fn gate(&self) -> ChainResult<MutexGuard<'_, State>> {
        let mut state = self.state();
        if state.failures > 0 {
            state.failures -= 1;
            let err = state.failure.clone().unwrap_or_else(|| ChainError::Connection("injected failure".into()));
            return Err(err);
        }
        Ok(state)
    }

    /// Pay `value` to `script` from nowhere. Lands in the mempool.
    pub fn fund(&self, script: &Script, value: u64) -> OutPoint {
        let mut state = self.state();
        state.nonce += 1;
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from_bytes(state.nonce.to_le_bytes().to_vec()),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut { value: Amount::from_sat(value), script_pubkey: script.to_owned() }],
        };
        let txid = state.insert(tx);
        debug!(%txid, value, "funded script");
        OutPoint { txid, vout: 0 }
    }

    /// Mine `blocks` blocks; the first one takes the whole mempool. Returns the new tip.
    pub fn mine(&self, blocks: u32) -> u32 {
        let mut state = self.state();
        if blocks == 0 {
            return state.tip;
        }
        let height = state.tip + 1;
        for (_, confirmed) in state.txs.values_mut() {
            if confirmed.is_none() {
                *confirmed = Some(height);
            }
        }
        state.tip += blocks;
        state.tip
    }

    pub fn tip(&self) -> u32 { self.state().tip }

    /// `Some(None)` while in the mempool, `None` if unknown.
    pub fn position(&self, txid: &Txid) -> Option<Option<u32>> {
        self.state().txs.get(txid).map(|(_, h)| *h)
    }

    /// Move a confirmed transaction to another height.
    pub fn reorg(&self, txid: &Txid, height: u32) {
        if let Some((_, h)) = self.state().txs.get_mut(txid) {
            *h = Some(height);
        }
    }

    /// Next `n` calls fail with a connection error.
    pub fn fail_next(&self, n: u32) {
        let mut state = self.state();
        state.failures = n;
        state.failure = None;
    }

    /// Next `n` calls fail with `error`.
    pub fn fail_next_with(&self, n: u32, error: ChainError) {
        let mut state = self.state();
        state.failures = n;
        state.failure = Some(error);
    }

    /// Reject every broadcast with `reason`, or accept again with `None`.
    pub fn reject_broadcasts(&self, reason: Option<&str>) {
        self.state().reject = reason.map(str::to_string);
    }
}

impl ChainSource for MemoryChain {
    fn ping(&self) -> ChainResult<()> {
        self.gate().map(|_| ())
    }

    fn script_history(&self, script: &Script) -> ChainResult<Vec<HistoryItem>> {
        let state = self.gate()?;
        let mut items: Vec<HistoryItem> = state
            .order
            .iter()
            .filter_map(|txid| state.txs.get(txid).map(|(tx, h)| (txid, tx, h)))
            .filter(|(_, tx, _)| state.touches(tx, script))
            .map(|(txid, _, h)| HistoryItem { txid: *txid, height: *h })
            .collect();
        items.sort_by_key(|i| i.height.unwrap_or(u32::MAX));
        Ok(items)
    }

    fn script_unspent(&self, script: &Script) -> ChainResult<Vec<UnspentItem>> {
        let state = self.gate()?;
        let mut items = Vec::new();
        for txid in &state.order {
            let Some((tx, height)) = state.txs.get(txid) else { continue };
            for (vout, out) in tx.output.iter().enumerate() {
                let outpoint = OutPoint { txid: *txid, vout: vout as u32 };
                if out.script_pubkey.as_script() == script && !state.spent.contains_key(&outpoint) {
                    items.push(UnspentItem { outpoint, value: out.value.to_sat(), height: *height });
                }
            }
        }
        Ok(items)
    }

    fn transaction(&self, txid: &Txid) -> ChainResult<Transaction> {
        let state = self.gate()?;
        state.txs.get(txid).map(|(tx, _)| tx.clone()).ok_or(ChainError::MissingTransaction(*txid))
    }

    fn block_time(&self, height: u32) -> ChainResult<u64> {
        let state = self.gate()?;
        if height > state.tip {
            return Err(ChainError::Protocol(format!("height {} above tip {}", height, state.tip)));
        }
        Ok(GENESIS_TIME + height as u64 * BLOCK_INTERVAL)
    }

    fn broadcast(&self, tx: &Transaction) -> ChainResult<Txid> {
        let mut state = self.gate()?;
        if let Some(reason) = &state.reject {
            return Err(ChainError::Rejected(reason.clone()));
        }
        let txid = tx.compute_txid();
        if state.txs.contains_key(&txid) {
            return Ok(txid);
        }
        if tx.is_coinbase() {
            return Err(ChainError::Rejected("coinbase".into()));
        }
        let mut seen = HashSet::new();
        let mut input_value = 0u64;
        for input in &tx.input {
            let prev = input.previous_output;
            let out = state.prevout(&prev).ok_or_else(|| ChainError::Rejected(format!("missing input {}", prev)))?;
            if !seen.insert(prev) || state.spent.contains_key(&prev) {
                return Err(ChainError::Rejected(format!("input {} already spent", prev)));
            }
            if input.witness.is_empty() {
                return Err(ChainError::Rejected(format!("input {} not signed", prev)));
            }
            input_value += out.value.to_sat();
        }
        let output_value: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
        if output_value > input_value {
            return Err(ChainError::Rejected("outputs exceed inputs".into()));
        }
        state.insert(tx.clone());
        debug!(%txid, "accepted into mempool");
        Ok(txid)
    }
}
