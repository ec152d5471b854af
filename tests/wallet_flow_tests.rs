//! End-to-end wallet flows against the in-memory chain.
//!
//! Every test drives the public `WalletEngine` surface only: load, address issuance, sync,
//! build, sign, broadcast, and the reconciliation that follows a mined block.

use beewallet::{
    AddressIndex, ChainConfig, ChainError, KeychainKind, MemoryChain, Network, SyncEvent, SyncObserver, WalletEngine, WalletError,
    WalletOptions,
};
use bitcoin::{Address, OutPoint, ScriptBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// "abandon" x11 + "about", the BIP84 reference seed
const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

// BIP84 reference vectors for the seed above
const MAINNET_RECEIVE_0: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";
const MAINNET_RECEIVE_1: &str = "bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g";
const MAINNET_CHANGE_0: &str = "bc1q8c6fshw2dlwun7ekn9qwf37cu2rn755upcp6el";
const SIGNET_RECEIVE_0: &str = "tb1q6rz28mcfaxtmd6v789l9rrlrusdprr9pqcpvkl";

fn script_of(address: &str) -> ScriptBuf {
    Address::from_str(address).unwrap().assume_checked().script_pubkey()
}

fn options() -> WalletOptions {
    WalletOptions::new(Network::Signet).with_mnemonic(TEST_MNEMONIC)
}

/// A signet wallet backed by a fresh in-memory chain.
fn online_wallet() -> (WalletEngine, Arc<MemoryChain>) {
    let chain = Arc::new(MemoryChain::new());
    let engine = WalletEngine::new();
    engine
        .create_or_import_with_source(options().with_chain(ChainConfig::for_network(Network::Signet).with_stop_gap(5)), chain.clone())
        .unwrap();
    (engine, chain)
}

/// Someone else's signet address.
fn foreign_address() -> String {
    let script = ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_str("0000000000000000000000000000000000000042").unwrap());
    Address::from_script(&script, bitcoin::Network::Signet).unwrap().to_string()
}

fn fund_and_confirm(engine: &WalletEngine, chain: &MemoryChain, value: u64) -> OutPoint {
    let address = engine.get_address(AddressIndex::LastUnused).unwrap().address;
    let outpoint = chain.fund(&script_of(&address), value);
    chain.mine(1);
    engine.sync_wallet().unwrap();
    outpoint
}

#[test]
fn derivation_matches_reference_vectors() {
    let engine = WalletEngine::new();
    let loaded = engine.create_or_import_wallet(WalletOptions::new(Network::Bitcoin).with_mnemonic(TEST_MNEMONIC)).unwrap();
    assert_eq!(loaded.address, MAINNET_RECEIVE_0);
    assert_eq!(engine.get_address(AddressIndex::Peek(1)).unwrap().address, MAINNET_RECEIVE_1);
    assert_eq!(engine.get_address_for(KeychainKind::Internal, AddressIndex::Peek(0)).unwrap().address, MAINNET_CHANGE_0);

    let signet = WalletEngine::new();
    assert_eq!(signet.create_or_import_wallet(options()).unwrap().address, SIGNET_RECEIVE_0);
}

#[test]
fn same_seed_same_wallet() {
    let a = WalletEngine::new();
    let b = WalletEngine::new();
    a.create_or_import_wallet(options()).unwrap();
    b.create_or_import_wallet(options()).unwrap();
    assert_eq!(a.public_descriptors().unwrap(), b.public_descriptors().unwrap());
    for keychain in [KeychainKind::External, KeychainKind::Internal] {
        for i in 0..5 {
            let x = a.get_address_for(keychain, AddressIndex::Peek(i)).unwrap();
            let y = b.get_address_for(keychain, AddressIndex::Peek(i)).unwrap();
            assert_eq!(x.address, y.address);
        }
    }

    let (external, internal) = a.public_descriptors().unwrap();
    assert!(external.starts_with("wpkh([73c5da0a/84'/1'/0']tpub"));
    assert!(internal.contains("/1/*"));
    assert!(!external.contains("tprv"));

    // a passphrase is a different wallet
    let c = WalletEngine::new();
    c.create_or_import_wallet(options().with_password("TREZOR")).unwrap();
    assert_ne!(c.public_descriptors().unwrap(), a.public_descriptors().unwrap());
}

#[test]
fn address_issuance_modes() {
    let engine = WalletEngine::new();
    let loaded = engine.create_or_import_wallet(options()).unwrap();

    // loading issued index 0 and nothing has paid to it yet
    let last = engine.get_address(AddressIndex::LastUnused).unwrap();
    assert_eq!((last.index, last.address.as_str()), (0, loaded.address.as_str()));
    assert_eq!(engine.get_address(AddressIndex::LastUnused).unwrap().index, 0);

    let next = engine.get_address(AddressIndex::New).unwrap();
    assert_eq!(next.index, 1);
    assert_eq!(engine.get_address(AddressIndex::New).unwrap().index, 2);

    // peeking far ahead moves nothing
    let peeked = engine.get_address(AddressIndex::Peek(40)).unwrap();
    assert_eq!(peeked.index, 40);
    assert_eq!(engine.get_address(AddressIndex::New).unwrap().index, 3);
    assert_eq!(engine.get_address(AddressIndex::Peek(1)).unwrap().address, next.address);
}

#[test]
fn incoming_payment_pending_then_confirmed() {
    let (engine, chain) = online_wallet();
    let address = engine.get_address(AddressIndex::LastUnused).unwrap();
    let outpoint = chain.fund(&script_of(&address.address), 50_000);

    let stats = engine.sync_wallet().unwrap();
    assert_eq!((stats.new_utxos, stats.new_txs, stats.newly_used), (1, 1, 1));
    let balance = engine.get_balance().unwrap();
    assert_eq!((balance.pending, balance.confirmed, balance.total), (50_000, 0, 50_000));
    let utxos = engine.list_unspent().unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].outpoint, outpoint);
    assert_eq!(utxos[0].confirmation_height, None);

    // the paid address is used now, so LastUnused moves on
    assert_ne!(engine.get_address(AddressIndex::LastUnused).unwrap().index, address.index);

    let height = chain.mine(1);
    engine.sync_wallet().unwrap();
    let balance = engine.get_balance().unwrap();
    assert_eq!((balance.pending, balance.confirmed), (0, 50_000));
    let txs = engine.list_transactions().unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].received, 50_000);
    assert_eq!(txs[0].confirmation.map(|c| c.height), Some(height));
}

#[test]
fn repeated_sync_is_a_no_op() {
    let (engine, chain) = online_wallet();
    fund_and_confirm(&engine, &chain, 20_000);
    let before = (engine.get_balance().unwrap(), engine.list_transactions().unwrap(), engine.list_unspent().unwrap());
    assert!(engine.sync_wallet().unwrap().is_empty());
    assert!(engine.sync_wallet().unwrap().is_empty());
    let after = (engine.get_balance().unwrap(), engine.list_transactions().unwrap(), engine.list_unspent().unwrap());
    assert_eq!(before, after);
}

#[test]
fn activity_past_issued_indices_is_discovered() {
    let (engine, chain) = online_wallet();
    // index 3 was never handed out but is inside the gap
    let far = engine.get_address(AddressIndex::Peek(3)).unwrap();
    chain.fund(&script_of(&far.address), 7_000);
    chain.mine(1);
    engine.sync_wallet().unwrap();
    assert_eq!(engine.get_balance().unwrap().confirmed, 7_000);
    // issuance resumes past the discovered index
    assert_eq!(engine.get_address(AddressIndex::New).unwrap().index, 4);
}

#[test]
fn send_round_trip() {
    let (engine, chain) = online_wallet();
    fund_and_confirm(&engine, &chain, 100_000);

    let unsigned = engine.create_transaction(&foreign_address(), 30_000, 2.0).unwrap();
    assert_eq!(unsigned.details.sent, 100_000);
    let change = unsigned.details.received;
    assert_eq!(100_000 - 30_000 - unsigned.details.fee, change);

    let sent = engine.send_transaction(&unsigned).unwrap();
    assert_eq!(sent.txid, unsigned.txid());
    assert_eq!(sent.fee, unsigned.details.fee);
    assert_eq!(chain.position(&sent.txid), Some(None));

    // pending locally before any sync
    let record = engine.list_transactions().unwrap().into_iter().find(|t| t.txid == sent.txid).unwrap();
    assert!(record.confirmation.is_none());
    assert_eq!((record.sent, record.received, record.fee), (100_000, change, Some(sent.fee)));
    let balance = engine.get_balance().unwrap();
    assert_eq!((balance.confirmed, balance.pending), (0, change));

    // the change landed on the first internal address
    let utxos = engine.list_unspent().unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!((utxos[0].keychain, utxos[0].index), (KeychainKind::Internal, 0));

    // the mempool sync changes nothing we did not already know
    engine.sync_wallet().unwrap();
    assert_eq!(engine.get_balance().unwrap().pending, change);

    let height = chain.mine(1);
    engine.sync_wallet().unwrap();
    let balance = engine.get_balance().unwrap();
    assert_eq!((balance.confirmed, balance.pending, balance.total), (change, 0, change));
    let txs = engine.list_transactions().unwrap();
    assert_eq!(txs.len(), 2);
    assert_eq!(txs[0].txid, sent.txid);
    assert_eq!(txs[0].confirmation.map(|c| c.height), Some(height));
    assert!(engine.sync_wallet().unwrap().is_empty());

    // the next change goes to a fresh internal index
    let next = engine.create_transaction(&foreign_address(), 10_000, 1.0).unwrap();
    let change_out = next.psbt.unsigned_tx.output.iter().find(|o| o.script_pubkey != script_of(&foreign_address())).unwrap();
    let change_1 = engine.get_address_for(KeychainKind::Internal, AddressIndex::Peek(1)).unwrap();
    assert_eq!(change_out.script_pubkey, script_of(&change_1.address));
}

#[test]
fn insufficient_funds_reserves_nothing() {
    let (engine, chain) = online_wallet();
    fund_and_confirm(&engine, &chain, 10_000);
    let err = engine.create_transaction(&foreign_address(), 50_000, 1.0).unwrap_err();
    assert!(matches!(err, WalletError::InsufficientFunds { available: 10_000, .. }));
    assert_eq!(engine.list_unspent().unwrap().len(), 1);
    assert!(engine.create_transaction(&foreign_address(), 5_000, 1.0).is_ok());
}

#[test]
fn abandoned_build_leaves_no_trace() {
    let (engine, chain) = online_wallet();
    fund_and_confirm(&engine, &chain, 40_000);
    let first = engine.create_transaction(&foreign_address(), 15_000, 1.0).unwrap();
    let second = engine.create_transaction(&foreign_address(), 15_000, 1.0).unwrap();
    // nothing was reserved: both builds pick the same input and the same change index
    assert_eq!(first, second);
    assert_eq!(engine.get_balance().unwrap().total, 40_000);
}

#[test]
fn failed_sync_leaves_cache_untouched() {
    let (engine, chain) = online_wallet();
    fund_and_confirm(&engine, &chain, 30_000);
    let before = (engine.get_balance().unwrap(), engine.list_transactions().unwrap());

    let address = engine.get_address(AddressIndex::New).unwrap();
    chain.fund(&script_of(&address.address), 9_000);
    chain.fail_next(1_000);
    assert!(matches!(engine.sync_wallet(), Err(WalletError::SyncFailed(_))));
    assert!(!engine.is_syncing());
    assert_eq!((engine.get_balance().unwrap(), engine.list_transactions().unwrap()), before);

    chain.fail_next(0);
    engine.sync_wallet().unwrap();
    assert_eq!(engine.get_balance().unwrap().total, 39_000);
}

#[test]
fn sync_timeout_surfaces_and_keeps_cache() {
    let (engine, chain) = online_wallet();
    fund_and_confirm(&engine, &chain, 25_000);
    let before = (engine.get_balance().unwrap(), engine.list_transactions().unwrap(), engine.list_unspent().unwrap());

    let address = engine.get_address(AddressIndex::New).unwrap();
    chain.fund(&script_of(&address.address), 4_000);
    chain.fail_next_with(1_000, ChainError::Timeout);
    assert_eq!(engine.sync_wallet(), Err(WalletError::Timeout));
    assert!(!engine.is_syncing());
    let after = (engine.get_balance().unwrap(), engine.list_transactions().unwrap(), engine.list_unspent().unwrap());
    assert_eq!(before, after);

    chain.fail_next(0);
    engine.sync_wallet().unwrap();
    assert_eq!(engine.get_balance().unwrap().total, 29_000);
}

#[test]
fn unreachable_backend_on_send_records_nothing() {
    let (engine, chain) = online_wallet();
    fund_and_confirm(&engine, &chain, 60_000);
    let unsigned = engine.create_transaction(&foreign_address(), 20_000, 1.0).unwrap();
    let before = (engine.get_balance().unwrap(), engine.list_transactions().unwrap(), engine.list_unspent().unwrap());

    chain.fail_next_with(1_000, ChainError::Connection("connection reset".into()));
    assert_eq!(engine.send_transaction(&unsigned), Err(WalletError::NotConnected));
    let after = (engine.get_balance().unwrap(), engine.list_transactions().unwrap(), engine.list_unspent().unwrap());
    assert_eq!(before, after);
    assert!(after.1.iter().all(|t| t.txid != unsigned.txid()));

    chain.fail_next(0);
    assert_eq!(chain.position(&unsigned.txid()), None);
    assert_eq!(engine.send_transaction(&unsigned).unwrap().txid, unsigned.txid());
}

#[test]
fn transient_failures_are_retried() {
    let (engine, chain) = online_wallet();
    let address = engine.get_address(AddressIndex::LastUnused).unwrap();
    chain.fund(&script_of(&address.address), 12_000);
    // fewer than the default retry budget of a single call
    chain.fail_next(3);
    engine.sync_wallet().unwrap();
    assert_eq!(engine.get_balance().unwrap().pending, 12_000);
}

#[test]
fn rejected_broadcast_changes_nothing() {
    let (engine, chain) = online_wallet();
    fund_and_confirm(&engine, &chain, 60_000);
    let unsigned = engine.create_transaction(&foreign_address(), 20_000, 1.0).unwrap();

    chain.reject_broadcasts(Some("min relay fee not met"));
    assert!(matches!(engine.send_transaction(&unsigned), Err(WalletError::BroadcastRejected(_))));
    assert_eq!(engine.get_balance().unwrap().confirmed, 60_000);
    assert_eq!(engine.list_transactions().unwrap().len(), 1);
    assert_eq!(chain.position(&unsigned.txid()), None);

    chain.reject_broadcasts(None);
    engine.send_transaction(&unsigned).unwrap();
    assert_eq!(engine.get_balance().unwrap().confirmed, 0);
}

#[test]
fn offline_wallet_cannot_sync_or_spend() {
    let engine = WalletEngine::new();
    engine.create_or_import_wallet(options()).unwrap();
    assert_eq!(engine.sync_wallet(), Err(WalletError::NotConnected));
    assert!(matches!(
        engine.create_transaction(&foreign_address(), 10_000, 1.0),
        Err(WalletError::InsufficientFunds { available: 0, .. })
    ));
}

#[test]
fn locked_outputs_are_not_selected() {
    let (engine, chain) = online_wallet();
    let big = fund_and_confirm(&engine, &chain, 80_000);
    let small = fund_and_confirm(&engine, &chain, 30_000);

    engine.lock_unspent(big).unwrap();
    let balance = engine.get_balance().unwrap();
    assert_eq!((balance.locked, balance.total), (80_000, 30_000));
    let unsigned = engine.create_transaction(&foreign_address(), 20_000, 1.0).unwrap();
    let inputs: Vec<OutPoint> = unsigned.psbt.unsigned_tx.input.iter().map(|i| i.previous_output).collect();
    assert_eq!(inputs, vec![small]);
    assert!(matches!(
        engine.create_transaction(&foreign_address(), 50_000, 1.0),
        Err(WalletError::InsufficientFunds { available: 30_000, .. })
    ));

    assert!(engine.unlock_unspent(&big).unwrap());
    assert!(!engine.unlock_unspent(&big).unwrap());
    let unsigned = engine.create_transaction(&foreign_address(), 20_000, 1.0).unwrap();
    assert_eq!(unsigned.psbt.unsigned_tx.input[0].previous_output, big);

    let unknown = OutPoint { txid: big.txid, vout: 9 };
    assert!(matches!(engine.lock_unspent(unknown), Err(WalletError::InvalidArgument(_))));
}

#[test]
fn reorg_moves_confirmation() {
    let (engine, chain) = online_wallet();
    let outpoint = fund_and_confirm(&engine, &chain, 25_000);
    let first = engine.list_transactions().unwrap()[0].confirmation.unwrap().height;

    chain.mine(3);
    chain.reorg(&outpoint.txid, first + 2);
    engine.sync_wallet().unwrap();
    let moved = engine.list_transactions().unwrap()[0].confirmation.unwrap();
    assert_eq!(moved.height, first + 2);
    assert_eq!(engine.list_unspent().unwrap()[0].confirmation_height, Some(first + 2));
}

#[derive(Default)]
struct Recorder(Mutex<Vec<SyncEvent>>);

impl SyncObserver for Recorder {
    fn on_event(&self, event: &SyncEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

#[test]
fn observer_sees_progress() {
    let (engine, chain) = online_wallet();
    let recorder = Arc::new(Recorder::default());
    engine.set_sync_observer(recorder.clone());
    fund_and_confirm(&engine, &chain, 5_000);

    let events = recorder.0.lock().unwrap().clone();
    assert_eq!(events.first(), Some(&SyncEvent::Started { keychains: 2 }));
    assert!(matches!(events.last(), Some(SyncEvent::Finished { active_scripts: 1, transactions: 1 })));
    assert!(events.contains(&SyncEvent::AddressProbed { keychain: KeychainKind::External, index: 0, active: true }));
    assert!(events.contains(&SyncEvent::UtxosFetched { keychain: KeychainKind::External, index: 0, count: 1 }));
}

#[test]
fn psbt_survives_a_host_round_trip() {
    let (engine, chain) = online_wallet();
    fund_and_confirm(&engine, &chain, 70_000);
    let unsigned = engine.create_transaction(&foreign_address(), 25_000, 3.0).unwrap();

    let decoded = engine.decode_transaction(&unsigned.to_base64()).unwrap();
    assert_eq!(decoded.txid(), unsigned.txid());
    assert_eq!(decoded.details.fee, unsigned.details.fee);
    assert_eq!(decoded.details.received, unsigned.details.received);

    let signed = engine.sign_transaction(&decoded).unwrap();
    assert_eq!(signed, engine.sign_transaction(&unsigned).unwrap());
    assert!(matches!(engine.decode_transaction("bm90IGEgcHNidA=="), Err(WalletError::InvalidArgument(_))));
}

#[test]
fn watch_only_wallet_tracks_but_cannot_sign() {
    let (full, chain) = online_wallet();
    let (external, internal) = full.public_descriptors().unwrap();

    let watch = WalletEngine::new();
    let loaded = watch
        .create_or_import_with_source(WalletOptions::new(Network::Signet).with_descriptors(external, internal), chain.clone())
        .unwrap();
    assert_eq!(loaded.address, SIGNET_RECEIVE_0);
    assert!(loaded.mnemonic.is_none());

    fund_and_confirm(&watch, &chain, 45_000);
    assert_eq!(watch.get_balance().unwrap().confirmed, 45_000);
    let unsigned = watch.create_transaction(&foreign_address(), 10_000, 1.0).unwrap();
    assert!(matches!(watch.sign_transaction(&unsigned), Err(WalletError::SigningFailed(_))));
    assert!(matches!(watch.send_transaction(&unsigned), Err(WalletError::SigningFailed(_))));

    // the full wallet signs what the watch-only one built
    full.sync_wallet().unwrap();
    assert!(full.send_transaction(&unsigned).is_ok());
}
