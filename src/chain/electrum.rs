//! Electrum backend over `bdk_electrum`'s client.

use super::{ChainError, ChainResult, ChainSource, HistoryItem, UnspentItem};
use crate::config::ChainConfig;
use bdk_electrum::electrum_client::{self, Client, ConfigBuilder, ElectrumApi, Socks5Config};
use bitcoin::{OutPoint, Script, Transaction, Txid};

pub struct ElectrumSource {
    client: Client,
}

impl ElectrumSource {
    /// Open the connection. Retries are left to `ChainSyncClient`, so the client itself never retries.
    pub fn connect(config: &ChainConfig) -> ChainResult<Self> {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let electrum_config = ConfigBuilder::new()
            .retry(0)
            .timeout(config.timeout)
            .socks5(config.socks5.as_ref().map(Socks5Config::new))
            .build();
        let client = Client::from_config(&config.endpoint, electrum_config).map_err(map_error)?;
        Ok(Self { client })
    }
}

fn map_error(e: electrum_client::Error) -> ChainError {
    match e {
        electrum_client::Error::IOError(io)
            if matches!(io.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock) =>
        {
            ChainError::Timeout
        }
        electrum_client::Error::IOError(io) => ChainError::Connection(io.to_string()),
        electrum_client::Error::AllAttemptsErrored(errors) => ChainError::Connection(
            errors.last().map(|e| e.to_string()).unwrap_or_else(|| "all attempts failed".into()),
        ),
        other => ChainError::Protocol(other.to_string()),
    }
}

/// Electrum reports mempool entries with height 0 (or -1 with unconfirmed parents).
fn confirmed_height(height: i64) -> Option<u32> {
    u32::try_from(height).ok().filter(|h| *h > 0)
}

impl ChainSource for ElectrumSource {
    fn ping(&self) -> ChainResult<()> {
        self.client.ping().map_err(map_error)
    }

    fn script_history(&self, script: &Script) -> ChainResult<Vec<HistoryItem>> {
        let history = self.client.script_get_history(script).map_err(map_error)?;
        Ok(history
            .into_iter()
            .map(|h| HistoryItem { txid: h.tx_hash, height: confirmed_height(h.height as i64) })
            .collect())
    }

    fn script_unspent(&self, script: &Script) -> ChainResult<Vec<UnspentItem>> {
        let unspent = self.client.script_list_unspent(script).map_err(map_error)?;
        unspent
            .into_iter()
            .map(|u| {
                let vout = u32::try_from(u.tx_pos).map_err(|_| ChainError::Protocol(format!("output index {}", u.tx_pos)))?;
                Ok(UnspentItem {
                    outpoint: OutPoint { txid: u.tx_hash, vout },
                    value: u.value,
                    height: confirmed_height(u.height as i64),
                })
            })
            .collect()
    }

    fn transaction(&self, txid: &Txid) -> ChainResult<Transaction> {
        self.client.transaction_get(txid).map_err(map_error)
    }

    fn block_time(&self, height: u32) -> ChainResult<u64> {
        let header = self.client.block_header(height as usize).map_err(map_error)?;
        Ok(header.time as u64)
    }

    fn broadcast(&self, tx: &Transaction) -> ChainResult<Txid> {
        self.client.transaction_broadcast(tx).map_err(|e| match map_error(e) {
            ChainError::Protocol(msg) => ChainError::Rejected(msg),
            other => other,
        })
    }
}
