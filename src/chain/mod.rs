//! ChainSyncClient - probes descriptor branches against an Electrum-style backend.
//!
//! A sync runs in two steps: [`ChainSyncClient::scan`] builds a [`SyncUpdate`] from a
//! [`SyncPlan`] snapshot without touching the store, then the store merges it in one go.
//! A failed scan therefore leaves the cache exactly as it was.

#[cfg(feature = "electrum")]
pub mod electrum;
pub mod memory;

use crate::config::ChainConfig;
use crate::descriptor;
use crate::error::{Result, WalletError};
use bdk_wallet::miniscript::{Descriptor, DescriptorPublicKey};
use bdk_wallet::KeychainKind;
use bitcoin::{OutPoint, Script, ScriptBuf, Transaction, TxOut, Txid};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("connection: {0}")]
    Connection(String),
    #[error("timed out")]
    Timeout,
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("transaction {0} not found")]
    MissingTransaction(Txid),
    #[error("protocol: {0}")]
    Protocol(String),
}

impl ChainError {
    /// Worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Connection(_) | ChainError::Timeout)
    }
}

pub type ChainResult<T> = std::result::Result<T, ChainError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockTime {
    pub height: u32,
    pub timestamp: u64,
}

/// One entry of a script's history. `height` is `None` in the mempool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryItem {
    pub txid: Txid,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnspentItem {
    pub outpoint: OutPoint,
    pub value: u64,
    pub height: Option<u32>,
}

/// Blocking chain data source. Electrum in production, [`memory::MemoryChain`] offline.
pub trait ChainSource: Send + Sync {
    fn ping(&self) -> ChainResult<()>;

    fn script_history(&self, script: &Script) -> ChainResult<Vec<HistoryItem>>;

    fn script_unspent(&self, script: &Script) -> ChainResult<Vec<UnspentItem>>;

    fn transaction(&self, txid: &Txid) -> ChainResult<Transaction>;

    /// Block timestamp at `height`.
    fn block_time(&self, height: u32) -> ChainResult<u64>;

    fn broadcast(&self, tx: &Transaction) -> ChainResult<Txid>;
}

/// What to probe: one entry per branch, plus transactions already held.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub keychains: Vec<KeychainPlan>,
    pub known_txs: HashMap<Txid, Arc<Transaction>>,
}

#[derive(Debug, Clone)]
pub struct KeychainPlan {
    pub keychain: KeychainKind,
    pub descriptor: Descriptor<DescriptorPublicKey>,
    /// Indices handed out so far; all of them get probed.
    pub issued: u32,
}

/// A script with chain activity and its current unspent outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptActivity {
    pub keychain: KeychainKind,
    pub index: u32,
    pub script: ScriptBuf,
    pub unspent: Vec<UnspentItem>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncUpdate {
    pub scripts: Vec<ScriptActivity>,
    pub txs: HashMap<Txid, Arc<Transaction>>,
    /// Chain position of every transaction touching an active script.
    pub positions: HashMap<Txid, Option<BlockTime>>,
    /// Foreign prevouts, for fee computation.
    pub prevouts: HashMap<OutPoint, TxOut>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    Started { keychains: usize },
    AddressProbed { keychain: KeychainKind, index: u32, active: bool },
    UtxosFetched { keychain: KeychainKind, index: u32, count: usize },
    Finished { active_scripts: usize, transactions: usize },
}

/// Sync progress sink. Called inline from the sync thread, so keep it cheap.
pub trait SyncObserver: Send + Sync {
    fn on_event(&self, event: &SyncEvent);
}

/// Forwards progress to `tracing`.
pub struct LogObserver;

impl SyncObserver for LogObserver {
    fn on_event(&self, event: &SyncEvent) {
        debug!(?event, "sync progress");
    }
}

/// Highest non-hardened index.
const MAX_INDEX: u32 = (1 << 31) - 1;

pub struct ChainSyncClient {
    config: ChainConfig,
    source: Arc<dyn ChainSource>,
}

impl ChainSyncClient {
    /// Connect to the configured Electrum server.
    #[cfg(feature = "electrum")]
    pub fn configure(config: ChainConfig) -> Result<Self> {
        config.validate()?;
        let source = electrum::ElectrumSource::connect(&config)
            .map_err(|e| WalletError::ConnectionFailed(e.to_string()))?;
        info!(endpoint = %config.endpoint, "electrum connected");
        Self::with_source(config, Arc::new(source))
    }

    #[cfg(not(feature = "electrum"))]
    pub fn configure(config: ChainConfig) -> Result<Self> {
        config.validate()?;
        Err(WalletError::ConnectionFailed("built without the electrum feature".into()))
    }

    /// Use an existing source. The source must answer a ping.
    pub fn with_source(config: ChainConfig, source: Arc<dyn ChainSource>) -> Result<Self> {
        config.validate()?;
        let client = Self { config, source };
        client.call("ping", |s| s.ping()).map_err(|e| WalletError::ConnectionFailed(e.to_string()))?;
        Ok(client)
    }

    pub fn config(&self) -> &ChainConfig { &self.config }

    fn call<T>(&self, what: &str, f: impl Fn(&dyn ChainSource) -> ChainResult<T>) -> ChainResult<T> {
        let mut attempt = 0u8;
        loop {
            match f(self.source.as_ref()) {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.config.retry => {
                    attempt += 1;
                    warn!(call = what, attempt, error = %e, "retrying backend call");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Probe every branch in `plan` and collect what the backend knows.
    pub fn scan(&self, plan: &SyncPlan, observer: &dyn SyncObserver) -> Result<SyncUpdate> {
        observer.on_event(&SyncEvent::Started { keychains: plan.keychains.len() });
        let mut update = SyncUpdate::default();
        let mut heights: BTreeMap<Txid, Option<u32>> = BTreeMap::new();

        for kp in &plan.keychains {
            let mut gap = 0u32;
            let mut index = 0u32;
            let mut active_count = 0usize;
            while index <= MAX_INDEX && (index < kp.issued || gap < self.config.stop_gap) {
                let script = descriptor::script_at(&kp.descriptor, index)?;
                let history = self.call("script_history", |s| s.script_history(&script)).map_err(sync_error)?;
                let active = !history.is_empty();
                observer.on_event(&SyncEvent::AddressProbed { keychain: kp.keychain, index, active });

                if active {
                    gap = 0;
                    active_count += 1;
                    let unspent = self.call("script_unspent", |s| s.script_unspent(&script)).map_err(sync_error)?;
                    observer.on_event(&SyncEvent::UtxosFetched { keychain: kp.keychain, index, count: unspent.len() });
                    for item in history {
                        let slot = heights.entry(item.txid).or_insert(item.height);
                        if slot.is_none() {
                            *slot = item.height;
                        }
                    }
                    update.scripts.push(ScriptActivity { keychain: kp.keychain, index, script, unspent });
                } else {
                    gap += 1;
                }
                index += 1;
            }
            debug!(keychain = ?kp.keychain, probed = index, active = active_count, "branch probed");
        }

        for txid in heights.keys() {
            let tx = match plan.known_txs.get(txid) {
                Some(tx) => tx.clone(),
                None => Arc::new(self.call("transaction", |s| s.transaction(txid)).map_err(sync_error)?),
            };
            update.txs.insert(*txid, tx);
        }
        let mut parents: HashMap<Txid, Arc<Transaction>> = HashMap::new();
        for tx in update.txs.values().filter(|tx| !tx.is_coinbase()) {
            for input in &tx.input {
                let prev = input.previous_output;
                if update.txs.contains_key(&prev.txid) || update.prevouts.contains_key(&prev) {
                    continue;
                }
                let parent = match plan.known_txs.get(&prev.txid).or_else(|| parents.get(&prev.txid)) {
                    Some(p) => p.clone(),
                    None => {
                        let fetched = Arc::new(self.call("transaction", |s| s.transaction(&prev.txid)).map_err(sync_error)?);
                        parents.insert(prev.txid, fetched.clone());
                        fetched
                    }
                };
                if let Some(out) = parent.output.get(prev.vout as usize) {
                    update.prevouts.insert(prev, out.clone());
                }
            }
        }

        let mut times: HashMap<u32, u64> = HashMap::new();
        for (txid, height) in heights {
            let position = match height {
                Some(h) => {
                    let timestamp = match times.get(&h) {
                        Some(t) => *t,
                        None => {
                            let t = self.call("block_time", |s| s.block_time(h)).map_err(sync_error)?;
                            times.insert(h, t);
                            t
                        }
                    };
                    Some(BlockTime { height: h, timestamp })
                }
                None => None,
            };
            update.positions.insert(txid, position);
        }

        observer.on_event(&SyncEvent::Finished { active_scripts: update.scripts.len(), transactions: update.txs.len() });
        Ok(update)
    }

    pub fn broadcast(&self, tx: &Transaction) -> Result<Txid> {
        let txid = self.call("broadcast", |s| s.broadcast(tx)).map_err(|e| match e {
            ChainError::Connection(msg) => {
                warn!(detail = %msg, "broadcast: backend unreachable");
                WalletError::NotConnected
            }
            ChainError::Timeout => WalletError::Timeout,
            other => WalletError::BroadcastRejected(other.to_string()),
        })?;
        info!(%txid, "transaction broadcast");
        Ok(txid)
    }
}

fn sync_error(e: ChainError) -> WalletError {
    match e {
        ChainError::Timeout => WalletError::Timeout,
        other => WalletError::SyncFailed(other.to_string()),
    }
}
