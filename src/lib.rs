//! Beewallet: non-custodial BIP84 wallet engine.
//!
//! # Architecture
//!
//! ```text
//! WalletEngine (entry point, lifecycle)
//!   │
//!   ├── keys        mnemonic / xprv → root key
//!   ├── descriptor  root key → wpkh receive/change descriptors
//!   ├── store       cursors, UTXO cache, transaction records
//!   ├── chain       ChainSyncClient over a ChainSource (Electrum, in-memory)
//!   └── tx          builder (largest-first) + signer (P2WPKH)
//! ```
//!
//! # Features
//!
//! - `electrum` - Electrum backend (bdk_electrum, rustls)
//! - `async` - tokio `spawn_blocking` wrappers
//!
//! # Usage
//!
//! ```ignore
//! use beewallet::{AddressIndex, ChainConfig, Network, WalletEngine, WalletOptions};
//!
//! let engine = WalletEngine::new();
//! let loaded = engine.create_or_import_wallet(
//!     WalletOptions::new(Network::Signet)
//!         .with_mnemonic("abandon abandon ...")
//!         .with_chain(ChainConfig::for_network(Network::Signet)),
//! )?;
//! engine.sync_wallet()?;
//! let balance = engine.get_balance()?;
//! let unsigned = engine.create_transaction("tb1q...", 10_000, 1.0)?;
//! let sent = engine.send_transaction(&unsigned)?;
//! ```

pub mod chain;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod keys;
pub mod logging;
pub mod network;
pub mod store;
pub mod tx;

pub use chain::memory::MemoryChain;
pub use chain::{BlockTime, ChainError, ChainSource, ChainSyncClient, LogObserver, SyncEvent, SyncObserver};
pub use config::{BridgeArgs, ChainConfig, WalletOptions};
pub use engine::{LoadWalletResponse, SendResponse, WalletEngine, WalletState};
pub use error::{ErrorKind, Result, WalletError};
pub use keys::{create_extended_key, ExtendedKeyInfo, WordCount};
pub use network::Network;
pub use store::{AddressIndex, AddressInfo, AddressState, Balance, SyncStats, TransactionRecord, Utxo};
pub use tx::{SignedTransaction, TxDetails, UnsignedTransaction};

pub use bdk_wallet::KeychainKind;

#[cfg(feature = "electrum")]
pub use chain::electrum::ElectrumSource;
