//! Key derivation - mnemonic or xprv in, BIP32 root key out.
//!
//! Derivation is pure: identical inputs always give the identical root key.
//! The seed lives only inside [`derive`] and is zeroized on the way out.

use crate::error::{Result, WalletError};
use crate::network::Network;
use bip39::Mnemonic;
use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, Xpriv};
use bitcoin::secp256k1::Secp256k1;
use bitcoin::NetworkKind;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Allowed BIP39 phrase lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum WordCount {
    #[default]
    Words12,
    Words15,
    Words18,
    Words21,
    Words24,
}

impl WordCount {
    pub fn words(&self) -> usize {
        match self { WordCount::Words12 => 12, WordCount::Words15 => 15, WordCount::Words18 => 18, WordCount::Words21 => 21, WordCount::Words24 => 24 }
    }

    /// 32 bits of entropy per 3 words.
    fn entropy_bytes(&self) -> usize {
        self.words() / 3 * 4
    }
}

impl TryFrom<usize> for WordCount {
    type Error = WalletError;

    fn try_from(n: usize) -> Result<Self> {
        match n {
            12 => Ok(WordCount::Words12),
            15 => Ok(WordCount::Words15),
            18 => Ok(WordCount::Words18),
            21 => Ok(WordCount::Words21),
            24 => Ok(WordCount::Words24),
            _ => Err(WalletError::InvalidArgument(format!(
                "word count {} not one of 12, 15, 18, 21, 24",
                n
            ))),
        }
    }
}

impl From<WordCount> for usize {
    fn from(w: WordCount) -> usize { w.words() }
}

/// Fresh mnemonic from OS randomness.
pub fn generate_mnemonic(count: WordCount) -> Result<Mnemonic> {
    let mut entropy = [0u8; 32];
    let len = count.entropy_bytes();
    rand::thread_rng().fill_bytes(&mut entropy[..len]);
    let mnemonic = Mnemonic::from_entropy(&entropy[..len])
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()));
    entropy.zeroize();
    mnemonic
}

pub fn parse_mnemonic(phrase: &str) -> Result<Mnemonic> {
    Mnemonic::parse_normalized(phrase.trim()).map_err(|e| WalletError::InvalidMnemonic(e.to_string()))
}

/// Where the root key comes from. Exactly one source per wallet.
pub enum KeySource<'a> {
    Mnemonic(&'a str),
    Xprv(&'a str),
}

impl<'a> KeySource<'a> {
    /// Pick the single supplied source. Neither or both is a usage error.
    pub fn select(mnemonic: Option<&'a str>, xprv: Option<&'a str>) -> Result<Self> {
        let mnemonic = mnemonic.filter(|m| !m.trim().is_empty());
        let xprv = xprv.filter(|x| !x.trim().is_empty());
        match (mnemonic, xprv) {
            (Some(m), None) => Ok(KeySource::Mnemonic(m)),
            (None, Some(x)) => Ok(KeySource::Xprv(x)),
            (None, None) => Err(WalletError::InvalidArgument("supply a mnemonic or an extended key".into())),
            (Some(_), Some(_)) => Err(WalletError::InvalidArgument("supply a mnemonic or an extended key, not both".into())),
        }
    }
}

/// BIP32 master key bound to a network.
pub struct RootKey {
    xprv: Xpriv,
    network: Network,
}

impl RootKey {
    pub fn xprv(&self) -> &Xpriv { &self.xprv }
    pub fn network(&self) -> Network { self.network }

    pub fn fingerprint(&self) -> Fingerprint {
        self.xprv.fingerprint(&Secp256k1::signing_only())
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootKey").field("fingerprint", &self.fingerprint()).field("network", &self.network).finish()
    }
}

impl Drop for RootKey {
    fn drop(&mut self) {
        self.xprv.private_key.non_secure_erase();
    }
}

/// Derive the root key. The passphrase only applies to the mnemonic flow.
pub fn derive(source: KeySource<'_>, passphrase: Option<&str>, network: Network) -> Result<RootKey> {
    let xprv = match source {
        KeySource::Mnemonic(phrase) => {
            let mnemonic = parse_mnemonic(phrase)?;
            let seed = Zeroizing::new(mnemonic.to_seed_normalized(passphrase.unwrap_or("")));
            Xpriv::new_master(network.to_bitcoin(), &seed[..])
                .map_err(|e| WalletError::InvalidKeyEncoding(e.to_string()))?
        }
        KeySource::Xprv(encoded) => {
            let xprv = Xpriv::from_str(encoded.trim())
                .map_err(|e| WalletError::InvalidKeyEncoding(e.to_string()))?;
            if xprv.network != NetworkKind::from(network.to_bitcoin()) {
                return Err(WalletError::InvalidKeyEncoding(format!("key is not for {}", network)));
            }
            xprv
        }
    };
    Ok(RootKey { xprv, network })
}

/// Parse `m / purpose' / coin' / account' / chain / index`, any prefix of it.
pub fn parse_path(path: &str) -> Result<DerivationPath> {
    let trimmed = path.trim();
    if trimmed != "m" && !trimmed.starts_with("m/") {
        return Err(WalletError::InvalidDerivationPath(format!("'{}' must start with m", path)));
    }
    let parsed = DerivationPath::from_str(trimmed)
        .map_err(|e| WalletError::InvalidDerivationPath(format!("{}: {}", path, e)))?;
    let steps: &[ChildNumber] = parsed.as_ref();
    if steps.len() > 5 {
        return Err(WalletError::InvalidDerivationPath(format!("'{}' deeper than m/purpose'/coin'/account'/chain/index", path)));
    }
    for (depth, step) in steps.iter().enumerate() {
        let want_hardened = depth < 3;
        if step.is_hardened() != want_hardened {
            return Err(WalletError::InvalidDerivationPath(format!(
                "'{}': component {} must be {}",
                path,
                depth + 1,
                if want_hardened { "hardened" } else { "non-hardened" }
            )));
        }
    }
    Ok(parsed)
}

/// Child key at `path` below the root.
pub fn extend(root: &RootKey, path: &str) -> Result<Xpriv> {
    let path = parse_path(path)?;
    root.xprv
        .derive_priv(&Secp256k1::signing_only(), &path)
        .map_err(|e| WalletError::InvalidDerivationPath(e.to_string()))
}

/// Exported key bundle for hosts that back up keys themselves.
#[derive(Clone, Serialize, Zeroize, ZeroizeOnDrop)]
pub struct ExtendedKeyInfo {
    pub fingerprint: String,
    pub mnemonic: String,
    pub xprv: String,
}

impl std::fmt::Debug for ExtendedKeyInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendedKeyInfo").field("fingerprint", &self.fingerprint).finish_non_exhaustive()
    }
}

/// Root xprv + fingerprint for a mnemonic, generating a 12-word one when absent.
pub fn create_extended_key(network: Network, mnemonic: Option<&str>, password: Option<&str>) -> Result<ExtendedKeyInfo> {
    let phrase = match mnemonic.filter(|m| !m.trim().is_empty()) {
        Some(m) => Zeroizing::new(parse_mnemonic(m)?.to_string()),
        None => Zeroizing::new(generate_mnemonic(WordCount::Words12)?.to_string()),
    };
    let root = derive(KeySource::Mnemonic(&phrase), password, network)?;
    Ok(ExtendedKeyInfo {
        fingerprint: root.fingerprint().to_string(),
        mnemonic: phrase.to_string(),
        xprv: root.xprv.to_string(),
    })
}
