//! Descriptors - BIP84 `wpkh` receive/change pair.
//!
//! The builder renders `wpkh([fp/84'/coin'/0']xprv/<branch>/*)`; [`WalletDescriptor`]
//! is the parsed form used everywhere else (scripts, addresses, signing keys).

use crate::error::{Result, WalletError};
use crate::keys::{self, RootKey};
use crate::network::Network;
use bdk_wallet::miniscript::descriptor::{
    DescriptorPublicKey, DescriptorSecretKey, DescriptorType, DescriptorXKey, KeyMap, Wildcard,
};
use bdk_wallet::miniscript::{Descriptor, ForEachKey};
use bdk_wallet::KeychainKind;
use bitcoin::bip32::{ChildNumber, Xpriv};
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::{Secp256k1, Signing};
use bitcoin::{Address, NetworkKind, PrivateKey, ScriptBuf};
use zeroize::Zeroizing;

/// BIP84 purpose.
pub const PURPOSE: u32 = 84;
/// Only account 0 is supported.
pub const ACCOUNT: u32 = 0;

pub fn branch(keychain: KeychainKind) -> u32 {
    match keychain { KeychainKind::External => 0, KeychainKind::Internal => 1 }
}

/// `m/84'/coin'/0'` for the network.
pub fn account_path(network: Network) -> String {
    format!("m/{}'/{}'/{}'", PURPOSE, network.coin_type(), ACCOUNT)
}

/// Receive + change descriptors, private keys included.
pub struct DescriptorPair {
    pub external: Zeroizing<String>,
    pub internal: Zeroizing<String>,
}

pub fn build_external(root: &RootKey) -> Result<Zeroizing<String>> {
    build(root, KeychainKind::External)
}

pub fn build_internal(root: &RootKey) -> Result<Zeroizing<String>> {
    build(root, KeychainKind::Internal)
}

pub fn build_pair(root: &RootKey) -> Result<DescriptorPair> {
    Ok(DescriptorPair { external: build_external(root)?, internal: build_internal(root)? })
}

fn build(root: &RootKey, keychain: KeychainKind) -> Result<Zeroizing<String>> {
    let network = root.network();
    let account = keys::extend(root, &account_path(network))?;
    let raw = Zeroizing::new(format!(
        "wpkh([{}/{}'/{}'/{}']{}/{}/*)",
        root.fingerprint(),
        PURPOSE,
        network.coin_type(),
        ACCOUNT,
        account,
        branch(keychain)
    ));
    // Round-trip through miniscript so the text is canonical and checksummed.
    let (descriptor, mut key_map) = parse_with_keys(&raw)?;
    let text = Zeroizing::new(descriptor.to_string_with_secret(&key_map));
    wipe(&mut key_map);
    Ok(text)
}

fn parse_with_keys(text: &str) -> Result<(Descriptor<DescriptorPublicKey>, KeyMap)> {
    let secp = Secp256k1::signing_only();
    Descriptor::<DescriptorPublicKey>::parse_descriptor(&secp, text)
        .map_err(|e| WalletError::InvalidDescriptor(e.to_string()))
}

/// Overwrite every private key miniscript handed back alongside a descriptor.
fn wipe(key_map: &mut KeyMap) {
    for secret in key_map.values_mut() {
        match secret {
            DescriptorSecretKey::Single(single) => single.key.inner.non_secure_erase(),
            DescriptorSecretKey::XPrv(x) => x.xkey.private_key.non_secure_erase(),
            DescriptorSecretKey::MultiXPrv(x) => x.xkey.private_key.non_secure_erase(),
        }
    }
}

/// Parsed single-branch descriptor.
pub struct WalletDescriptor {
    keychain: KeychainKind,
    network: Network,
    descriptor: Descriptor<DescriptorPublicKey>,
    secret: Option<DescriptorXKey<Xpriv>>,
}

impl WalletDescriptor {
    pub fn parse(text: &str, keychain: KeychainKind, network: Network) -> Result<Self> {
        let (descriptor, mut key_map) = parse_with_keys(text.trim())?;
        let secret = key_map.values().find_map(|k| match k {
            DescriptorSecretKey::XPrv(x) => Some(x.clone()),
            _ => None,
        });
        wipe(&mut key_map);
        // from here on the copy is erased by `Drop`, including on the error paths below
        let parsed = Self { keychain, network, descriptor, secret };
        let descriptor = &parsed.descriptor;

        if descriptor.desc_type() != DescriptorType::Wpkh {
            return Err(WalletError::InvalidDescriptor(format!("{:?} not supported, expected wpkh", descriptor.desc_type())));
        }
        if descriptor.is_multipath() || !descriptor.has_wildcard() {
            return Err(WalletError::InvalidDescriptor("expected a single-path wildcard descriptor".into()));
        }
        let kind = NetworkKind::from(network.to_bitcoin());
        let keys_ok = descriptor.for_each_key(|key| match key {
            DescriptorPublicKey::XPub(x) => x.xkey.network == kind && x.wildcard == Wildcard::Unhardened,
            _ => false,
        });
        if !keys_ok {
            return Err(WalletError::InvalidDescriptor(format!(
                "key must be an unhardened-wildcard extended key for {}",
                network
            )));
        }
        Ok(parsed)
    }

    pub fn keychain(&self) -> KeychainKind { self.keychain }
    pub fn has_secret(&self) -> bool { self.secret.is_some() }

    /// Public (watch-only) text form.
    pub fn public_string(&self) -> String {
        self.descriptor.to_string()
    }

    pub fn public_descriptor(&self) -> &Descriptor<DescriptorPublicKey> {
        &self.descriptor
    }

    pub fn script_at(&self, index: u32) -> Result<ScriptBuf> {
        script_at(&self.descriptor, index)
    }

    pub fn address_at(&self, index: u32) -> Result<Address> {
        self.descriptor
            .at_derivation_index(index)
            .map_err(|e| WalletError::InvalidDerivationPath(format!("index {}: {}", index, e)))?
            .address(self.network.to_bitcoin())
            .map_err(|e| WalletError::InvalidDescriptor(e.to_string()))
    }

    /// Private key for `index`, checked against the script it must unlock.
    pub fn signing_key<C: Signing>(&self, secp: &Secp256k1<C>, index: u32, script: &ScriptBuf) -> Result<PrivateKey> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| WalletError::SigningFailed(format!("no private key for {:?} branch", self.keychain)))?;
        let child = ChildNumber::from_normal_idx(index)
            .map_err(|e| WalletError::SigningFailed(e.to_string()))?;
        let path = secret.derivation_path.child(child);
        let derived = secret
            .xkey
            .derive_priv(secp, &path)
            .map_err(|e| WalletError::SigningFailed(e.to_string()))?;
        let private_key = PrivateKey::new(derived.private_key, self.network.to_bitcoin());
        let public_key = CompressedPublicKey::from_private_key(secp, &private_key)
            .map_err(|e| WalletError::SigningFailed(e.to_string()))?;
        if ScriptBuf::new_p2wpkh(&public_key.wpubkey_hash()) != *script {
            return Err(WalletError::SigningFailed(format!("key at index {} does not match script", index)));
        }
        Ok(private_key)
    }
}

impl Drop for WalletDescriptor {
    fn drop(&mut self) {
        if let Some(secret) = self.secret.as_mut() {
            secret.xkey.private_key.non_secure_erase();
        }
    }
}

/// Script for `index` of a public descriptor.
pub fn script_at(descriptor: &Descriptor<DescriptorPublicKey>, index: u32) -> Result<ScriptBuf> {
    Ok(descriptor
        .at_derivation_index(index)
        .map_err(|e| WalletError::InvalidDerivationPath(format!("index {}: {}", index, e)))?
        .script_pubkey())
}
