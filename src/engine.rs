//! WalletEngine - lifecycle and dispatch.
//!
//! `Uninitialized -> Initializing -> Ready -> Destroyed`, with an orthogonal syncing flag.
//! Mutating operations hold `ops` for their whole duration so they never interleave.
//! Reads only take the state lock and always see a fully merged cache.

use crate::chain::{ChainSource, ChainSyncClient, LogObserver, SyncObserver};
use crate::config::{ChainConfig, WalletOptions};
use crate::descriptor;
use crate::error::{Result, WalletError};
use crate::keys::{self, KeySource, WordCount};
use crate::store::{AddressIndex, AddressInfo, Balance, SyncStats, TransactionRecord, Utxo, WalletStore};
use crate::tx::{self, builder, signer, SignedTransaction, UnsignedTransaction};
use bdk_wallet::KeychainKind;
use bitcoin::{OutPoint, Txid};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletState {
    Uninitialized,
    Initializing,
    Ready,
    Destroyed,
}

/// Result of create/import. `mnemonic` is set only when the engine generated it.
#[derive(Clone, Serialize)]
pub struct LoadWalletResponse {
    pub address: String,
    pub mnemonic: Option<String>,
}

impl std::fmt::Debug for LoadWalletResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadWalletResponse").field("address", &self.address).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendResponse {
    pub txid: Txid,
    pub fee: u64,
}

enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready(Box<LiveWallet>),
    Destroyed,
}

struct LiveWallet {
    store: WalletStore,
    chain: Option<Arc<ChainSyncClient>>,
}

struct Inner {
    state: RwLock<Lifecycle>,
    ops: Mutex<()>,
    syncing: AtomicBool,
    observer: RwLock<Arc<dyn SyncObserver>>,
}

/// Cheap to clone; clones share the same wallet.
#[derive(Clone)]
pub struct WalletEngine {
    inner: Arc<Inner>,
}

impl Default for WalletEngine {
    fn default() -> Self { Self::new() }
}

/// Clears the syncing flag however the sync ends.
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) { self.0.store(false, Ordering::SeqCst); }
}

impl WalletEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(Lifecycle::Uninitialized),
                ops: Mutex::new(()),
                syncing: AtomicBool::new(false),
                observer: RwLock::new(Arc::new(LogObserver)),
            }),
        }
    }

    // Every mutation of the state is a single assignment, so a poisoned lock still holds a valid value.
    fn read(&self) -> RwLockReadGuard<'_, Lifecycle> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Lifecycle> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn ops(&self) -> MutexGuard<'_, ()> {
        self.inner.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_live<T>(&self, f: impl FnOnce(&LiveWallet) -> Result<T>) -> Result<T> {
        match &*self.read() {
            Lifecycle::Ready(live) => f(live),
            _ => Err(WalletError::WalletNotInitialized),
        }
    }

    fn with_live_mut<T>(&self, f: impl FnOnce(&mut LiveWallet) -> Result<T>) -> Result<T> {
        match &mut *self.write() {
            Lifecycle::Ready(live) => f(live),
            _ => Err(WalletError::WalletNotInitialized),
        }
    }

    pub fn state(&self) -> WalletState {
        match &*self.read() {
            Lifecycle::Uninitialized => WalletState::Uninitialized,
            Lifecycle::Initializing => WalletState::Initializing,
            Lifecycle::Ready(_) => WalletState::Ready,
            Lifecycle::Destroyed => WalletState::Destroyed,
        }
    }

    pub fn is_syncing(&self) -> bool { self.inner.syncing.load(Ordering::SeqCst) }

    pub fn set_sync_observer(&self, observer: Arc<dyn SyncObserver>) {
        *self.inner.observer.write().unwrap_or_else(PoisonError::into_inner) = observer;
    }

    fn observer(&self) -> Arc<dyn SyncObserver> {
        self.inner.observer.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Fresh phrase; needs no wallet.
    pub fn generate_mnemonic(&self, word_count: usize) -> Result<String> {
        Ok(keys::generate_mnemonic(WordCount::try_from(word_count)?)?.to_string())
    }

    /// Create (no key supplied: a 12-word mnemonic is generated) or import a wallet.
    /// Connects to the Electrum server in `options.chain` when one is set.
    pub fn create_or_import_wallet(&self, options: WalletOptions) -> Result<LoadWalletResponse> {
        self.load(options, None)
    }

    /// Same as [`create_or_import_wallet`](Self::create_or_import_wallet) with a caller-supplied backend.
    pub fn create_or_import_with_source(&self, options: WalletOptions, source: Arc<dyn ChainSource>) -> Result<LoadWalletResponse> {
        self.load(options, Some(source))
    }

    fn load(&self, options: WalletOptions, source: Option<Arc<dyn ChainSource>>) -> Result<LoadWalletResponse> {
        {
            let mut state = self.write();
            match *state {
                Lifecycle::Initializing | Lifecycle::Ready(_) => return Err(WalletError::AlreadyInitialized),
                Lifecycle::Uninitialized | Lifecycle::Destroyed => *state = Lifecycle::Initializing,
            }
        }
        info!(network = %options.network, "initializing wallet");

        let result = Self::initialize(&options, source);
        let mut state = self.write();
        match result {
            Ok((live, response)) => {
                *state = Lifecycle::Ready(Box::new(live));
                info!(address = %response.address, "wallet ready");
                Ok(response)
            }
            Err(e) => {
                *state = Lifecycle::Uninitialized;
                warn!(error = %e, kind = e.kind().as_str(), "wallet initialization failed");
                Err(e)
            }
        }
    }

    fn initialize(options: &WalletOptions, source: Option<Arc<dyn ChainSource>>) -> Result<(LiveWallet, LoadWalletResponse)> {
        let network = options.network;
        let mut generated = None;
        let (external, internal) = match &options.descriptors {
            Some((external, internal)) => {
                if options.mnemonic.is_some() || options.xprv.is_some() {
                    return Err(WalletError::InvalidArgument("descriptors exclude a mnemonic or extended key".into()));
                }
                (external.clone(), internal.clone())
            }
            None => {
                let mut mnemonic = options.mnemonic.clone();
                if mnemonic.is_none() && options.xprv.is_none() {
                    let phrase = Zeroizing::new(keys::generate_mnemonic(WordCount::default())?.to_string());
                    generated = Some(phrase.clone());
                    mnemonic = Some(phrase);
                }
                let source = KeySource::select(mnemonic.as_deref().map(|m| m.as_str()), options.xprv.as_deref().map(|x| x.as_str()))?;
                let root = keys::derive(source, options.password.as_deref().map(|p| p.as_str()), network)?;
                let pair = descriptor::build_pair(&root)?;
                (pair.external, pair.internal)
            }
        };

        let mut store = WalletStore::new();
        store.open(&external, &internal, network)?;
        let chain = match (source, options.chain.clone()) {
            (Some(source), config) => {
                Some(ChainSyncClient::with_source(config.unwrap_or_else(|| ChainConfig::for_network(network)), source)?)
            }
            (None, Some(config)) => Some(ChainSyncClient::configure(config)?),
            (None, None) => None,
        };
        let address = store.issue_address(KeychainKind::External, AddressIndex::New)?.address;
        let response = LoadWalletResponse { address, mnemonic: generated.map(|m| m.to_string()) };
        Ok((LiveWallet { store, chain: chain.map(Arc::new) }, response))
    }

    /// Drop the wallet and its key material. A new create/import is needed afterwards.
    pub fn unload_wallet(&self) -> Result<()> {
        let _op = self.ops();
        let mut state = self.write();
        match std::mem::replace(&mut *state, Lifecycle::Destroyed) {
            Lifecycle::Ready(mut live) => {
                live.store.close()?;
                info!("wallet unloaded");
                Ok(())
            }
            other => {
                *state = other;
                Err(WalletError::WalletNotInitialized)
            }
        }
    }

    /// Receive address.
    pub fn get_address(&self, mode: AddressIndex) -> Result<AddressInfo> {
        self.get_address_for(KeychainKind::External, mode)
    }

    pub fn get_address_for(&self, keychain: KeychainKind, mode: AddressIndex) -> Result<AddressInfo> {
        let _op = self.ops();
        self.with_live_mut(|live| live.store.issue_address(keychain, mode))
    }

    /// Watch-only (external, internal) descriptors.
    pub fn public_descriptors(&self) -> Result<(String, String)> {
        self.with_live(|live| {
            Ok((live.store.public_descriptor(KeychainKind::External)?, live.store.public_descriptor(KeychainKind::Internal)?))
        })
    }

    /// Probe the backend and merge what it reports. The cache is untouched unless the whole scan succeeds.
    pub fn sync_wallet(&self) -> Result<SyncStats> {
        let _op = self.ops();
        let (plan, chain) = self.with_live(|live| {
            let chain = live.chain.clone().ok_or(WalletError::NotConnected)?;
            Ok((live.store.sync_plan()?, chain))
        })?;

        self.inner.syncing.store(true, Ordering::SeqCst);
        let _syncing = SyncingGuard(&self.inner.syncing);
        info!("sync started");
        let update = chain.scan(&plan, self.observer().as_ref()).map_err(|e| {
            warn!(error = %e, "sync failed");
            e
        })?;
        let stats = self.with_live_mut(|live| live.store.apply_update(update))?;
        info!(?stats, "sync finished");
        Ok(stats)
    }

    /// Point a live wallet at another Electrum server.
    pub fn set_blockchain(&self, config: ChainConfig) -> Result<()> {
        let _op = self.ops();
        self.with_live(|_| Ok(()))?;
        let client = ChainSyncClient::configure(config)?;
        self.with_live_mut(|live| {
            live.chain = Some(Arc::new(client));
            Ok(())
        })
    }

    pub fn set_blockchain_source(&self, config: ChainConfig, source: Arc<dyn ChainSource>) -> Result<()> {
        let _op = self.ops();
        self.with_live(|_| Ok(()))?;
        let client = ChainSyncClient::with_source(config, source)?;
        self.with_live_mut(|live| {
            live.chain = Some(Arc::new(client));
            Ok(())
        })
    }

    pub fn get_balance(&self) -> Result<Balance> {
        self.with_live(|live| live.store.balance())
    }

    pub fn list_transactions(&self) -> Result<Vec<TransactionRecord>> {
        self.with_live(|live| live.store.list_transactions())
    }

    pub fn list_unspent(&self) -> Result<Vec<Utxo>> {
        self.with_live(|live| live.store.list_unspent())
    }

    pub fn lock_unspent(&self, outpoint: OutPoint) -> Result<()> {
        let _op = self.ops();
        self.with_live_mut(|live| live.store.lock_unspent(outpoint))
    }

    pub fn unlock_unspent(&self, outpoint: &OutPoint) -> Result<bool> {
        let _op = self.ops();
        self.with_live_mut(|live| live.store.unlock_unspent(outpoint))
    }

    /// Build an unsigned transaction. Nothing is reserved; a failed or abandoned build leaves no trace.
    pub fn create_transaction(&self, recipient: &str, amount: u64, fee_rate: f32) -> Result<UnsignedTransaction> {
        let _op = self.ops();
        self.with_live(|live| builder::build(&live.store, recipient, amount, fee_rate))
    }

    /// Rebuild an [`UnsignedTransaction`] from a base64 PSBT.
    pub fn decode_transaction(&self, psbt_base64: &str) -> Result<UnsignedTransaction> {
        let psbt = tx::psbt_from_base64(psbt_base64)?;
        self.with_live(|live| {
            let details = builder::describe(&live.store, &psbt)?;
            Ok(UnsignedTransaction { psbt, details })
        })
    }

    pub fn sign_transaction(&self, unsigned: &UnsignedTransaction) -> Result<SignedTransaction> {
        let _op = self.ops();
        self.with_live(|live| signer::sign(&live.store, unsigned))
    }

    /// Sign, broadcast, and record the transaction as pending.
    pub fn send_transaction(&self, unsigned: &UnsignedTransaction) -> Result<SendResponse> {
        let _op = self.ops();
        let (signed, chain) = self.with_live(|live| {
            let chain = live.chain.clone().ok_or(WalletError::NotConnected)?;
            Ok((signer::sign(&live.store, unsigned)?, chain))
        })?;
        let txid = chain.broadcast(&signed.tx)?;
        if txid != signed.txid {
            warn!(expected = %signed.txid, reported = %txid, "backend reported a different txid");
        }
        self.with_live_mut(|live| live.store.apply_broadcast(&signed.tx, Some(signed.fee)))?;
        Ok(SendResponse { txid: signed.txid, fee: signed.fee })
    }
}

#[cfg(feature = "async")]
impl WalletEngine {
    pub async fn create_or_import_wallet_async(&self, options: WalletOptions) -> Result<LoadWalletResponse> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.create_or_import_wallet(options))
            .await
            .map_err(|e| WalletError::ConnectionFailed(format!("load task: {}", e)))?
    }

    pub async fn sync_wallet_async(&self) -> Result<SyncStats> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.sync_wallet())
            .await
            .map_err(|e| WalletError::SyncFailed(format!("sync task: {}", e)))?
    }

    pub async fn send_transaction_async(&self, unsigned: UnsignedTransaction) -> Result<SendResponse> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.send_transaction(&unsigned))
            .await
            .map_err(|e| WalletError::BroadcastRejected(format!("send task: {}", e)))?
    }
}
