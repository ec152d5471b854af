//! WalletStore - descriptor pair, address cursors, UTXO cache, transaction records.
//!
//! Purely in-memory. The cache changes only through [`WalletStore::apply_update`]
//! (a chain observation) and [`WalletStore::apply_broadcast`] (our own accepted broadcast).

use crate::chain::{BlockTime, KeychainPlan, SyncPlan, SyncUpdate};
use crate::descriptor::WalletDescriptor;
use crate::error::{Result, WalletError};
use crate::network::Network;
use bdk_wallet::KeychainKind;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{OutPoint, PrivateKey, ScriptBuf, Transaction, TxOut, Txid};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Highest non-hardened child index.
const MAX_INDEX: u32 = (1 << 31) - 1;

/// Which address to hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressIndex {
    /// Advance the cursor and return a never-issued address.
    New,
    /// Lowest issued address not yet seen on chain; issues one if none.
    LastUnused,
    /// Address at an index, cursor untouched.
    Peek(u32),
}

impl AddressIndex {
    /// Bridge form: `new`, `lastUnused` / `last_unused`, or `peek` + index.
    pub fn parse(kind: &str, index: Option<u32>) -> Result<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(AddressIndex::New),
            "lastunused" | "last_unused" => Ok(AddressIndex::LastUnused),
            "peek" => index
                .map(AddressIndex::Peek)
                .ok_or_else(|| WalletError::InvalidArgument("peek requires an index".into())),
            other => Err(WalletError::InvalidArgument(format!("unknown address index '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressState {
    Unused,
    Used,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressInfo {
    pub address: String,
    pub keychain: KeychainKind,
    pub index: u32,
    pub state: AddressState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value: u64,
    pub script_pubkey: ScriptBuf,
    pub keychain: KeychainKind,
    pub index: u32,
    pub is_spent: bool,
    /// `None` while unconfirmed.
    pub confirmation_height: Option<u32>,
}

impl Utxo {
    pub fn txout(&self) -> TxOut {
        TxOut { value: bitcoin::Amount::from_sat(self.value), script_pubkey: self.script_pubkey.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRecord {
    pub txid: Txid,
    pub sent: u64,
    pub received: u64,
    pub fee: Option<u64>,
    /// `None` while pending.
    pub confirmation: Option<BlockTime>,
}

impl TransactionRecord {
    pub fn is_confirmed(&self) -> bool { self.confirmation.is_some() }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub confirmed: u64,
    pub pending: u64,
    pub locked: u64,
    /// Spendable: unspent and unlocked.
    pub total: u64,
}

/// What a merge changed. All zero means the update was a no-op.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub newly_used: usize,
    pub new_utxos: usize,
    pub updated_utxos: usize,
    pub spent_utxos: usize,
    pub new_txs: usize,
    pub updated_txs: usize,
}

impl SyncStats {
    pub fn is_empty(&self) -> bool {
        *self == SyncStats::default()
    }
}

struct Keychain {
    descriptor: WalletDescriptor,
    next_index: u32,
    used: BTreeSet<u32>,
}

struct OpenWallet {
    network: Network,
    secp: Secp256k1<All>,
    external: Keychain,
    internal: Keychain,
    spks: HashMap<ScriptBuf, (KeychainKind, u32)>,
    utxos: BTreeMap<OutPoint, Utxo>,
    locked: BTreeSet<OutPoint>,
    txs: BTreeMap<Txid, TransactionRecord>,
    raw: HashMap<Txid, Arc<Transaction>>,
    /// Broadcast by us, not yet reported back by the backend.
    local_pending: BTreeSet<Txid>,
}

/// Holds at most one open wallet.
#[derive(Default)]
pub struct WalletStore {
    open: Option<OpenWallet>,
}

impl WalletStore {
    pub fn new() -> Self { Self::default() }

    pub fn is_open(&self) -> bool { self.open.is_some() }

    pub fn open(&mut self, external: &str, internal: &str, network: Network) -> Result<()> {
        if self.open.is_some() {
            return Err(WalletError::AlreadyOpen);
        }
        let ext = WalletDescriptor::parse(external, KeychainKind::External, network)?;
        let int = WalletDescriptor::parse(internal, KeychainKind::Internal, network)?;
        if ext.public_string() == int.public_string() {
            return Err(WalletError::InvalidDescriptor("external and internal descriptors are identical".into()));
        }
        self.open = Some(OpenWallet {
            network,
            secp: Secp256k1::new(),
            external: Keychain { descriptor: ext, next_index: 0, used: BTreeSet::new() },
            internal: Keychain { descriptor: int, next_index: 0, used: BTreeSet::new() },
            spks: HashMap::new(),
            utxos: BTreeMap::new(),
            locked: BTreeSet::new(),
            txs: BTreeMap::new(),
            raw: HashMap::new(),
            local_pending: BTreeSet::new(),
        });
        Ok(())
    }

    /// Drop every descriptor and cached record. Later calls fail with `Closed`.
    pub fn close(&mut self) -> Result<()> {
        self.open.take().map(|_| ()).ok_or(WalletError::Closed)
    }

    fn wallet(&self) -> Result<&OpenWallet> {
        self.open.as_ref().ok_or(WalletError::Closed)
    }

    fn wallet_mut(&mut self) -> Result<&mut OpenWallet> {
        self.open.as_mut().ok_or(WalletError::Closed)
    }

    pub fn network(&self) -> Result<Network> { Ok(self.wallet()?.network) }

    pub fn public_descriptor(&self, keychain: KeychainKind) -> Result<String> {
        Ok(self.wallet()?.keychain(keychain).descriptor.public_string())
    }

    pub fn can_sign(&self) -> Result<bool> {
        let w = self.wallet()?;
        Ok(w.external.descriptor.has_secret() && w.internal.descriptor.has_secret())
    }

    pub fn issue_address(&mut self, keychain: KeychainKind, mode: AddressIndex) -> Result<AddressInfo> {
        let w = self.wallet_mut()?;
        let index = match mode {
            AddressIndex::New => w.reveal_next(keychain)?,
            AddressIndex::LastUnused => {
                let kc = w.keychain(keychain);
                match (0..kc.next_index).find(|i| !kc.used.contains(i)) {
                    Some(index) => index,
                    None => w.reveal_next(keychain)?,
                }
            }
            AddressIndex::Peek(index) => index,
        };
        w.address_info(keychain, index)
    }

    /// Change script a new transaction would use, without touching the cursor.
    pub fn peek_change(&self) -> Result<(ScriptBuf, u32)> {
        let w = self.wallet()?;
        let kc = &w.internal;
        let index = (0..kc.next_index).find(|i| !kc.used.contains(i)).unwrap_or(kc.next_index);
        Ok((kc.descriptor.script_at(index)?, index))
    }

    pub fn owner_of(&self, script: &ScriptBuf) -> Result<Option<(KeychainKind, u32)>> {
        Ok(self.wallet()?.spks.get(script).copied())
    }

    pub fn utxo(&self, outpoint: &OutPoint) -> Result<Option<Utxo>> {
        Ok(self.wallet()?.utxos.get(outpoint).cloned())
    }

    pub fn is_locked(&self, outpoint: &OutPoint) -> Result<bool> {
        Ok(self.wallet()?.locked.contains(outpoint))
    }

    /// Unspent, unlocked outputs: the input selection candidates.
    pub fn spendable_utxos(&self) -> Result<Vec<Utxo>> {
        let w = self.wallet()?;
        Ok(w.utxos.values().filter(|u| !u.is_spent && !w.locked.contains(&u.outpoint)).cloned().collect())
    }

    pub fn list_unspent(&self) -> Result<Vec<Utxo>> {
        Ok(self.wallet()?.utxos.values().filter(|u| !u.is_spent).cloned().collect())
    }

    /// Every output ever cached, spent ones included.
    pub fn list_outputs(&self) -> Result<Vec<Utxo>> {
        Ok(self.wallet()?.utxos.values().cloned().collect())
    }

    /// Pending first, then confirmed by descending height.
    pub fn list_transactions(&self) -> Result<Vec<TransactionRecord>> {
        let mut txs: Vec<_> = self.wallet()?.txs.values().cloned().collect();
        txs.sort_by(|a, b| {
            let height = |t: &TransactionRecord| t.confirmation.map(|c| c.height).unwrap_or(u32::MAX);
            height(b).cmp(&height(a)).then_with(|| a.txid.cmp(&b.txid))
        });
        Ok(txs)
    }

    pub fn transaction(&self, txid: &Txid) -> Result<Option<TransactionRecord>> {
        Ok(self.wallet()?.txs.get(txid).cloned())
    }

    pub fn balance(&self) -> Result<Balance> {
        let w = self.wallet()?;
        let mut balance = Balance::default();
        for utxo in w.utxos.values().filter(|u| !u.is_spent) {
            if w.locked.contains(&utxo.outpoint) {
                balance.locked += utxo.value;
                continue;
            }
            match utxo.confirmation_height {
                Some(_) => balance.confirmed += utxo.value,
                None => balance.pending += utxo.value,
            }
            balance.total += utxo.value;
        }
        Ok(balance)
    }

    pub fn lock_unspent(&mut self, outpoint: OutPoint) -> Result<()> {
        let w = self.wallet_mut()?;
        match w.utxos.get(&outpoint) {
            Some(u) if !u.is_spent => {
                w.locked.insert(outpoint);
                Ok(())
            }
            _ => Err(WalletError::InvalidArgument(format!("{} is not an unspent wallet output", outpoint))),
        }
    }

    /// Returns whether the outpoint was locked.
    pub fn unlock_unspent(&mut self, outpoint: &OutPoint) -> Result<bool> {
        Ok(self.wallet_mut()?.locked.remove(outpoint))
    }

    pub fn signing_key(&self, keychain: KeychainKind, index: u32, script: &ScriptBuf) -> Result<PrivateKey> {
        let w = self.wallet()?;
        w.keychain(keychain).descriptor.signing_key(&w.secp, index, script)
    }

    pub fn secp(&self) -> Result<&Secp256k1<All>> { Ok(&self.wallet()?.secp) }

    /// Snapshot of what a sync needs, taken so probing can run without the store.
    pub fn sync_plan(&self) -> Result<SyncPlan> {
        let w = self.wallet()?;
        Ok(SyncPlan {
            keychains: [&w.external, &w.internal]
                .into_iter()
                .map(|kc| KeychainPlan {
                    keychain: kc.descriptor.keychain(),
                    descriptor: kc.descriptor.public_descriptor().clone(),
                    issued: kc.next_index,
                })
                .collect(),
            known_txs: w.raw.clone(),
        })
    }

    /// Merge a sync result. Confirmations only move forward; a conflicting height overwrites.
    pub fn apply_update(&mut self, update: SyncUpdate) -> Result<SyncStats> {
        let w = self.wallet_mut()?;
        let mut stats = SyncStats::default();

        for act in &update.scripts {
            w.spks.entry(act.script.clone()).or_insert((act.keychain, act.index));
            let kc = w.keychain_mut(act.keychain);
            if kc.used.insert(act.index) {
                stats.newly_used += 1;
            }
            kc.next_index = kc.next_index.max(act.index.saturating_add(1));
        }
        for (txid, tx) in &update.txs {
            w.raw.entry(*txid).or_insert_with(|| tx.clone());
        }
        for txid in update.positions.keys() {
            w.local_pending.remove(txid);
        }

        // Backend view of what is unspent, plus effects of our unreported broadcasts.
        let mut unspent: BTreeMap<OutPoint, Utxo> = BTreeMap::new();
        for act in &update.scripts {
            for item in &act.unspent {
                unspent.insert(item.outpoint, Utxo {
                    outpoint: item.outpoint,
                    value: item.value,
                    script_pubkey: act.script.clone(),
                    keychain: act.keychain,
                    index: act.index,
                    is_spent: false,
                    confirmation_height: item.height,
                });
            }
        }
        for txid in &w.local_pending {
            let Some(tx) = w.raw.get(txid) else { continue };
            for input in &tx.input {
                unspent.remove(&input.previous_output);
            }
            for (vout, out) in tx.output.iter().enumerate() {
                if let Some(&(keychain, index)) = w.spks.get(&out.script_pubkey) {
                    let outpoint = OutPoint { txid: *txid, vout: vout as u32 };
                    unspent.entry(outpoint).or_insert(Utxo {
                        outpoint,
                        value: out.value.to_sat(),
                        script_pubkey: out.script_pubkey.clone(),
                        keychain,
                        index,
                        is_spent: false,
                        confirmation_height: None,
                    });
                }
            }
        }

        for (outpoint, utxo) in w.utxos.iter_mut() {
            if !utxo.is_spent && !unspent.contains_key(outpoint) {
                utxo.is_spent = true;
                stats.spent_utxos += 1;
            }
        }
        for (outpoint, fresh) in unspent {
            match w.utxos.get_mut(&outpoint) {
                None => {
                    w.utxos.insert(outpoint, fresh);
                    stats.new_utxos += 1;
                }
                Some(cached) => {
                    let height = fresh.confirmation_height.or(cached.confirmation_height);
                    if cached.is_spent || cached.confirmation_height != height {
                        cached.is_spent = false;
                        cached.confirmation_height = height;
                        stats.updated_utxos += 1;
                    }
                }
            }
        }
        let spent: Vec<OutPoint> = w.locked.iter().filter(|op| w.utxos.get(*op).map_or(true, |u| u.is_spent)).copied().collect();
        for outpoint in spent {
            w.locked.remove(&outpoint);
        }

        let mut positions: Vec<_> = update.positions.iter().collect();
        positions.sort_by_key(|(txid, _)| **txid);
        for (txid, position) in positions {
            let Some(tx) = w.raw.get(txid).cloned() else { continue };
            let mut record = w.record_for(&tx, *position, &update.prevouts);
            match w.txs.get(txid) {
                None => {
                    w.txs.insert(*txid, record);
                    stats.new_txs += 1;
                }
                Some(existing) => {
                    if existing.confirmation.is_some() && record.confirmation.is_none() {
                        record.confirmation = existing.confirmation;
                    }
                    record.fee = record.fee.or(existing.fee);
                    if *existing != record {
                        w.txs.insert(*txid, record);
                        stats.updated_txs += 1;
                    }
                }
            }
        }

        debug!(?stats, "merged sync update");
        Ok(stats)
    }

    /// Record a transaction the backend accepted from us.
    pub fn apply_broadcast(&mut self, tx: &Transaction, fee: Option<u64>) -> Result<TransactionRecord> {
        let (change_script, change_index) = self.peek_change()?;
        let w = self.wallet_mut()?;
        if tx.output.iter().any(|o| o.script_pubkey == change_script) {
            w.register(KeychainKind::Internal, change_index)?;
        }
        let txid = tx.compute_txid();
        let tx = Arc::new(tx.clone());
        w.raw.insert(txid, tx.clone());

        let record = w.record_for(&tx, None, &HashMap::new());
        for input in &tx.input {
            if let Some(utxo) = w.utxos.get_mut(&input.previous_output) {
                utxo.is_spent = true;
            }
            w.locked.remove(&input.previous_output);
        }
        for (vout, out) in tx.output.iter().enumerate() {
            let Some(&(keychain, index)) = w.spks.get(&out.script_pubkey) else { continue };
            let outpoint = OutPoint { txid, vout: vout as u32 };
            w.utxos.entry(outpoint).or_insert(Utxo {
                outpoint,
                value: out.value.to_sat(),
                script_pubkey: out.script_pubkey.clone(),
                keychain,
                index,
                is_spent: false,
                confirmation_height: None,
            });
            let kc = w.keychain_mut(keychain);
            kc.used.insert(index);
            kc.next_index = kc.next_index.max(index.saturating_add(1));
        }
        let record = TransactionRecord { fee: fee.or(record.fee), ..record };
        w.txs.entry(txid).or_insert_with(|| record.clone());
        w.local_pending.insert(txid);
        Ok(record)
    }
}

impl OpenWallet {
    fn keychain(&self, keychain: KeychainKind) -> &Keychain {
        match keychain { KeychainKind::External => &self.external, KeychainKind::Internal => &self.internal }
    }

    fn keychain_mut(&mut self, keychain: KeychainKind) -> &mut Keychain {
        match keychain { KeychainKind::External => &mut self.external, KeychainKind::Internal => &mut self.internal }
    }

    fn register(&mut self, keychain: KeychainKind, index: u32) -> Result<ScriptBuf> {
        let script = self.keychain(keychain).descriptor.script_at(index)?;
        self.spks.insert(script.clone(), (keychain, index));
        Ok(script)
    }

    fn reveal_next(&mut self, keychain: KeychainKind) -> Result<u32> {
        let index = self.keychain(keychain).next_index;
        if index > MAX_INDEX {
            return Err(WalletError::InvalidDerivationPath(format!("{:?} branch exhausted", keychain)));
        }
        self.register(keychain, index)?;
        self.keychain_mut(keychain).next_index = index + 1;
        Ok(index)
    }

    fn address_info(&self, keychain: KeychainKind, index: u32) -> Result<AddressInfo> {
        let kc = self.keychain(keychain);
        Ok(AddressInfo {
            address: kc.descriptor.address_at(index)?.to_string(),
            keychain,
            index,
            state: if kc.used.contains(&index) { AddressState::Used } else { AddressState::Unused },
        })
    }

    fn prevout(&self, outpoint: &OutPoint, fetched: &HashMap<OutPoint, TxOut>) -> Option<TxOut> {
        self.raw
            .get(&outpoint.txid)
            .and_then(|tx| tx.output.get(outpoint.vout as usize).cloned())
            .or_else(|| fetched.get(outpoint).cloned())
    }

    fn record_for(&self, tx: &Transaction, confirmation: Option<BlockTime>, fetched: &HashMap<OutPoint, TxOut>) -> TransactionRecord {
        let received = tx
            .output
            .iter()
            .filter(|o| self.spks.contains_key(&o.script_pubkey))
            .map(|o| o.value.to_sat())
            .sum();

        let mut sent = 0u64;
        let mut input_total = Some(0u64);
        for input in &tx.input {
            match self.prevout(&input.previous_output, fetched) {
                Some(prev) => {
                    if self.spks.contains_key(&prev.script_pubkey) {
                        sent += prev.value.to_sat();
                    }
                    input_total = input_total.map(|t| t + prev.value.to_sat());
                }
                None => input_total = None,
            }
        }
        let output_total: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
        let fee = if tx.is_coinbase() { None } else { input_total.and_then(|t| t.checked_sub(output_total)) };

        TransactionRecord { txid: tx.compute_txid(), sent, received, fee, confirmation }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ScriptActivity, UnspentItem};
    use crate::descriptor::build_pair;
    use crate::keys::{derive, KeySource};
    use bitcoin::hashes::Hash;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn open_store() -> WalletStore {
        let root = derive(KeySource::Mnemonic(TEST_MNEMONIC), None, Network::Regtest).unwrap();
        let pair = build_pair(&root).unwrap();
        let mut store = WalletStore::new();
        store.open(&pair.external, &pair.internal, Network::Regtest).unwrap();
        store
    }

    fn outpoint(n: u8) -> OutPoint {
        OutPoint { txid: Txid::from_byte_array([n; 32]), vout: 0 }
    }

    fn activity(store: &WalletStore, index: u32, unspent: Vec<UnspentItem>) -> ScriptActivity {
        let plan = store.sync_plan().unwrap();
        let script = crate::descriptor::script_at(&plan.keychains[0].descriptor, index).unwrap();
        ScriptActivity { keychain: KeychainKind::External, index, script, unspent }
    }

    #[test]
    fn open_twice_fails_and_close_releases() {
        let mut store = open_store();
        assert_eq!(store.open("x", "y", Network::Regtest), Err(WalletError::AlreadyOpen));
        assert!(store.balance().is_ok());
        store.close().unwrap();
        assert_eq!(store.balance(), Err(WalletError::Closed));
        assert_eq!(store.issue_address(KeychainKind::External, AddressIndex::New), Err(WalletError::Closed));
        assert_eq!(store.close(), Err(WalletError::Closed));
    }

    #[test]
    fn identical_descriptors_rejected() {
        let root = derive(KeySource::Mnemonic(TEST_MNEMONIC), None, Network::Regtest).unwrap();
        let pair = build_pair(&root).unwrap();
        let mut store = WalletStore::new();
        assert!(matches!(
            store.open(&pair.external, &pair.external, Network::Regtest),
            Err(WalletError::InvalidDescriptor(_))
        ));
        assert!(!store.is_open());
    }

    #[test]
    fn new_addresses_advance() {
        let mut store = open_store();
        let indices: Vec<u32> = (0..5)
            .map(|_| store.issue_address(KeychainKind::External, AddressIndex::New).unwrap().index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn last_unused_is_idempotent_until_used() {
        let mut store = open_store();
        let a = store.issue_address(KeychainKind::External, AddressIndex::LastUnused).unwrap();
        let b = store.issue_address(KeychainKind::External, AddressIndex::LastUnused).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.index, 0);

        let update = SyncUpdate { scripts: vec![activity(&store, 0, vec![])], ..Default::default() };
        store.apply_update(update).unwrap();
        let c = store.issue_address(KeychainKind::External, AddressIndex::LastUnused).unwrap();
        assert_eq!(c.index, 1);
        assert_eq!(c.state, AddressState::Unused);
        let peek = store.issue_address(KeychainKind::External, AddressIndex::Peek(0)).unwrap();
        assert_eq!(peek.state, AddressState::Used);
    }

    #[test]
    fn peek_leaves_cursor_alone() {
        let mut store = open_store();
        store.issue_address(KeychainKind::External, AddressIndex::Peek(7)).unwrap();
        let next = store.issue_address(KeychainKind::External, AddressIndex::New).unwrap();
        assert_eq!(next.index, 0);
    }

    #[test]
    fn update_merge_is_idempotent_and_forward_only() {
        let mut store = open_store();
        let op = outpoint(1);
        let pending = UnspentItem { outpoint: op, value: 50_000, height: None };
        let update = SyncUpdate { scripts: vec![activity(&store, 0, vec![pending])], ..Default::default() };

        let first = store.apply_update(update.clone()).unwrap();
        assert_eq!(first.new_utxos, 1);
        assert!(store.apply_update(update.clone()).unwrap().is_empty());
        assert_eq!(store.balance().unwrap(), Balance { confirmed: 0, pending: 50_000, locked: 0, total: 50_000 });

        let confirmed = UnspentItem { outpoint: op, value: 50_000, height: Some(101) };
        let update2 = SyncUpdate { scripts: vec![activity(&store, 0, vec![confirmed])], ..Default::default() };
        store.apply_update(update2).unwrap();
        // a lagging pending view does not undo the confirmation
        store.apply_update(update).unwrap();
        assert_eq!(store.utxo(&op).unwrap().unwrap().confirmation_height, Some(101));
        assert_eq!(store.balance().unwrap().confirmed, 50_000);
    }

    #[test]
    fn vanished_output_is_marked_spent() {
        let mut store = open_store();
        let op = outpoint(2);
        let item = UnspentItem { outpoint: op, value: 10_000, height: Some(5) };
        store.apply_update(SyncUpdate { scripts: vec![activity(&store, 0, vec![item])], ..Default::default() }).unwrap();
        let stats = store
            .apply_update(SyncUpdate { scripts: vec![activity(&store, 0, vec![])], ..Default::default() })
            .unwrap();
        assert_eq!(stats.spent_utxos, 1);
        assert!(store.list_unspent().unwrap().is_empty());
        assert_eq!(store.list_outputs().unwrap().len(), 1);
        assert_eq!(store.balance().unwrap().total, 0);
    }

    #[test]
    fn locked_outputs_leave_balance() {
        let mut store = open_store();
        let op = outpoint(3);
        let item = UnspentItem { outpoint: op, value: 20_000, height: Some(9) };
        store.apply_update(SyncUpdate { scripts: vec![activity(&store, 0, vec![item])], ..Default::default() }).unwrap();
        store.lock_unspent(op).unwrap();
        assert_eq!(store.balance().unwrap(), Balance { confirmed: 0, pending: 0, locked: 20_000, total: 0 });
        assert!(store.spendable_utxos().unwrap().is_empty());
        assert!(store.unlock_unspent(&op).unwrap());
        assert_eq!(store.balance().unwrap().total, 20_000);
        assert!(store.lock_unspent(outpoint(9)).is_err());
    }

    #[test]
    fn bridge_address_index_names() {
        assert_eq!(AddressIndex::parse("new", None).unwrap(), AddressIndex::New);
        assert_eq!(AddressIndex::parse("lastUnused", None).unwrap(), AddressIndex::LastUnused);
        assert_eq!(AddressIndex::parse("peek", Some(3)).unwrap(), AddressIndex::Peek(3));
        assert!(AddressIndex::parse("peek", None).is_err());
        assert!(AddressIndex::parse("reset", None).is_err());
    }
}
