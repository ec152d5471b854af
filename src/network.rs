//! Network selection. Drives coin type, address HRP and default Electrum server.

use crate::error::{Result, WalletError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Bitcoin,
    #[default]
    Testnet,
    Signet,
    Regtest,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self { Network::Bitcoin => "bitcoin", Network::Testnet => "testnet", Network::Signet => "signet", Network::Regtest => "regtest" }
    }

    /// Parse a bridge-supplied network name. `None` selects testnet.
    pub fn parse(value: Option<&str>) -> Result<Self> {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(Network::default()),
            Some(v) if v.is_empty() => Ok(Network::default()),
            Some(v) => match v.as_str() {
                "bitcoin" | "mainnet" => Ok(Network::Bitcoin),
                "testnet" => Ok(Network::Testnet),
                "signet" => Ok(Network::Signet),
                "regtest" => Ok(Network::Regtest),
                other => Err(WalletError::InvalidArgument(format!("unknown network '{}'", other))),
            },
        }
    }

    pub fn to_bitcoin(&self) -> bitcoin::Network {
        match self { Network::Bitcoin => bitcoin::Network::Bitcoin, Network::Testnet => bitcoin::Network::Testnet, Network::Signet => bitcoin::Network::Signet, Network::Regtest => bitcoin::Network::Regtest }
    }

    /// BIP44 coin type: 0 on mainnet, 1 everywhere else.
    pub fn coin_type(&self) -> u32 {
        match self { Network::Bitcoin => 0, _ => 1 }
    }

    pub fn default_electrum_url(&self) -> &'static str {
        match self {
            Network::Bitcoin => "ssl://electrum.blockstream.info:50002",
            Network::Testnet => "ssl://electrum.blockstream.info:60002",
            Network::Signet => "ssl://mempool.space:60602",
            Network::Regtest => "tcp://127.0.0.1:60401",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}
