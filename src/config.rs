//! Wallet configuration - passed in by host bridges or the CLI.

use crate::error::{Result, WalletError};
use crate::network::Network;
use zeroize::Zeroizing;

/// Electrum backend settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub endpoint: String,
    pub socks5: Option<String>,
    /// Extra attempts per backend call after the first.
    pub retry: u8,
    /// Socket timeout in seconds. `None` waits forever.
    pub timeout: Option<u8>,
    pub stop_gap: u32,
}

impl ChainConfig {
    pub const DEFAULT_RETRY: u8 = 5;
    pub const DEFAULT_STOP_GAP: u32 = 10;

    pub fn for_network(network: Network) -> Self {
        Self {
            endpoint: network.default_electrum_url().to_string(),
            socks5: None,
            retry: Self::DEFAULT_RETRY,
            timeout: None,
            stop_gap: Self::DEFAULT_STOP_GAP,
        }
    }

    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self { self.endpoint = url.into(); self }
    pub fn with_socks5(mut self, proxy: impl Into<String>) -> Self { self.socks5 = Some(proxy.into()); self }
    pub fn with_retry(mut self, retry: u8) -> Self { self.retry = retry; self }
    pub fn with_timeout(mut self, secs: u8) -> Self { self.timeout = Some(secs); self }
    pub fn with_stop_gap(mut self, gap: u32) -> Self { self.stop_gap = gap; self }

    /// `tcp://host:port`, `ssl://host:port` or bare `host:port`.
    pub fn validate(&self) -> Result<()> {
        let rest = match self.endpoint.trim().split_once("://") {
            Some(("tcp" | "ssl", rest)) => rest,
            Some((scheme, _)) => {
                return Err(WalletError::InvalidEndpoint(format!("unsupported scheme '{}'", scheme)))
            }
            None => self.endpoint.trim(),
        };
        check_host_port(rest).map_err(|e| WalletError::InvalidEndpoint(format!("{}: {}", self.endpoint, e)))?;
        if let Some(proxy) = &self.socks5 {
            check_host_port(proxy).map_err(|e| WalletError::InvalidEndpoint(format!("socks5 {}: {}", proxy, e)))?;
        }
        if self.stop_gap == 0 {
            return Err(WalletError::InvalidArgument("stop gap must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for ChainConfig {
    fn default() -> Self { Self::for_network(Network::default()) }
}

fn check_host_port(s: &str) -> std::result::Result<(), &'static str> {
    let (host, port) = s.rsplit_once(':').ok_or("missing port")?;
    if host.is_empty() || host.contains('/') {
        return Err("bad host");
    }
    port.parse::<u16>().map_err(|_| "bad port")?;
    Ok(())
}

/// Everything `create_or_import_wallet` needs. Secrets are zeroized on drop.
#[derive(Clone, Default)]
pub struct WalletOptions {
    pub network: Network,
    pub mnemonic: Option<Zeroizing<String>>,
    pub password: Option<Zeroizing<String>>,
    pub xprv: Option<Zeroizing<String>>,
    /// Ready-made (external, internal) pair; skips key derivation.
    pub descriptors: Option<(Zeroizing<String>, Zeroizing<String>)>,
    pub chain: Option<ChainConfig>,
}

impl WalletOptions {
    pub fn new(network: Network) -> Self { Self { network, ..Default::default() } }
    pub fn with_mnemonic(mut self, m: impl Into<String>) -> Self { self.mnemonic = Some(Zeroizing::new(m.into())); self }
    pub fn with_password(mut self, p: impl Into<String>) -> Self { self.password = Some(Zeroizing::new(p.into())); self }
    pub fn with_xprv(mut self, x: impl Into<String>) -> Self { self.xprv = Some(Zeroizing::new(x.into())); self }
    pub fn with_descriptors(mut self, external: impl Into<String>, internal: impl Into<String>) -> Self {
        self.descriptors = Some((Zeroizing::new(external.into()), Zeroizing::new(internal.into())));
        self
    }
    pub fn with_chain(mut self, c: ChainConfig) -> Self { self.chain = Some(c); self }

    /// Chain settings, falling back to the network defaults.
    pub fn chain_config(&self) -> ChainConfig {
        self.chain.clone().unwrap_or_else(|| ChainConfig::for_network(self.network))
    }

    /// Build from the string-typed arguments mobile bridges forward.
    pub fn from_bridge_args(args: BridgeArgs<'_>) -> Result<Self> {
        let network = Network::parse(args.network)?;
        let mut chain = ChainConfig::for_network(network);
        if let Some(url) = non_empty(args.endpoint) {
            chain.endpoint = url.to_string();
        }
        chain.socks5 = non_empty(args.socks5).map(str::to_string);
        if let Some(retry) = non_empty(args.retry) {
            chain.retry = parse_number("retry", retry)?;
        }
        chain.timeout = non_empty(args.timeout).map(|t| parse_number("timeout", t)).transpose()?;
        if let Some(gap) = non_empty(args.stop_gap) {
            chain.stop_gap = parse_number("stop gap", gap)?;
        }

        let mut options = WalletOptions::new(network).with_chain(chain);
        if let Some(m) = non_empty(args.mnemonic) {
            options = options.with_mnemonic(m);
        }
        if let Some(p) = args.password.filter(|p| !p.is_empty()) {
            options = options.with_password(p);
        }
        if let Some(x) = non_empty(args.xprv) {
            options = options.with_xprv(x);
        }
        match (non_empty(args.external_descriptor), non_empty(args.internal_descriptor)) {
            (Some(e), Some(i)) => options = options.with_descriptors(e, i),
            (None, None) => {}
            _ => return Err(WalletError::InvalidArgument("descriptors come in external/internal pairs".into())),
        }
        Ok(options)
    }
}

impl std::fmt::Debug for WalletOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletOptions")
            .field("network", &self.network)
            .field("mnemonic", &self.mnemonic.as_ref().map(|_| "<redacted>"))
            .field("xprv", &self.xprv.as_ref().map(|_| "<redacted>"))
            .field("descriptors", &self.descriptors.as_ref().map(|_| "<redacted>"))
            .field("chain", &self.chain)
            .finish()
    }
}

/// Raw bridge arguments. Empty strings count as absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeArgs<'a> {
    pub mnemonic: Option<&'a str>,
    pub password: Option<&'a str>,
    pub xprv: Option<&'a str>,
    pub network: Option<&'a str>,
    pub endpoint: Option<&'a str>,
    pub socks5: Option<&'a str>,
    pub retry: Option<&'a str>,
    pub timeout: Option<&'a str>,
    pub stop_gap: Option<&'a str>,
    pub external_descriptor: Option<&'a str>,
    pub internal_descriptor: Option<&'a str>,
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_number<T: std::str::FromStr>(what: &str, s: &str) -> Result<T> {
    s.parse().map_err(|_| WalletError::InvalidArgument(format!("{} '{}' is not a valid number", what, s)))
}
