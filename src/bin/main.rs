//! Beewallet CLI - one-shot wallet commands, JSON out.
//!
//!   beewallet mnemonic [--words N]           → {"mnemonic": "..."}
//!   beewallet address [--new]                → {"address": "bcrt1q...", "index": 0, ...}
//!   beewallet balance                        → sync, then {"confirmed": .., "total": ..}
//!   beewallet sync                           → merge stats
//!   beewallet transactions | utxos           → JSON arrays
//!   beewallet send <address> <sat> [--fee-rate R]
//!
//! Configuration (flags win over env, `.env` is loaded first):
//!   --mnemonic / BEEWALLET_MNEMONIC, --password / BEEWALLET_PASSWORD,
//!   --network / BEEWALLET_NETWORK, --electrum / BEEWALLET_ELECTRUM

use anyhow::{anyhow, bail, Context};
use beewallet::logging::init_logging;
use beewallet::{AddressIndex, ChainConfig, Network, WalletEngine, WalletError, WalletOptions};
use serde_json::{json, Value};
use std::env;
use std::io::IsTerminal;
use tracing::debug;

fn main() {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);

    if opts.help {
        print_usage();
        return;
    }
    if opts.version {
        println!("beewallet {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match opts.command.as_deref() {
        Some("mnemonic") => cmd_mnemonic(&opts),
        Some("address") => cmd_address(&opts),
        Some("balance") => cmd_balance(&opts),
        Some("sync") => cmd_sync(&opts),
        Some("transactions") | Some("txs") => cmd_transactions(&opts),
        Some("utxos") => cmd_utxos(&opts),
        Some("send") => cmd_send(&opts),
        Some(cmd) => Err(anyhow!("unknown command: {}", cmd)),
        None => {
            print_usage();
            return;
        }
    };

    let pretty = opts.pretty || std::io::stdout().is_terminal();
    let render = |v: &Value| {
        let encoded = if pretty { serde_json::to_string_pretty(v) } else { serde_json::to_string(v) };
        encoded.unwrap_or_else(|_| v.to_string())
    };
    match result {
        Ok(output) => println!("{}", render(&output)),
        Err(e) => {
            let err = match e.downcast_ref::<WalletError>() {
                Some(w) => json!({"error": format!("{:#}", e), "kind": w.kind(), "code": w.code()}),
                None => json!({"error": format!("{:#}", e)}),
            };
            eprintln!("{}", render(&err));
            std::process::exit(1);
        }
    }
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    positional: Vec<String>,
    mnemonic: Option<String>,
    password: Option<String>,
    network: Option<String>,
    electrum_url: Option<String>,
    words: Option<String>,
    fee_rate: Option<String>,
    new_address: bool,
    pretty: bool,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        load_dotenv();

        let mut opts = ParsedArgs::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let mut value = || iter.next().cloned();
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--pretty" => opts.pretty = true,
                "--new" => opts.new_address = true,
                "--mnemonic" | "-m" => opts.mnemonic = value(),
                "--password" => opts.password = value(),
                "--network" | "-n" => opts.network = value(),
                "--electrum" | "-e" => opts.electrum_url = value(),
                "--words" | "-w" => opts.words = value(),
                "--fee-rate" | "-f" => opts.fee_rate = value(),
                _ if !arg.starts_with('-') => opts.positional.push(arg.clone()),
                other => debug!(flag = other, "ignoring unknown flag"),
            }
        }
        if !opts.positional.is_empty() {
            opts.command = Some(opts.positional.remove(0));
        }

        let from_env = |key: &str| env::var(key).ok().filter(|s| !s.is_empty());
        opts.mnemonic = opts.mnemonic.or_else(|| from_env("BEEWALLET_MNEMONIC"));
        opts.password = opts.password.or_else(|| from_env("BEEWALLET_PASSWORD"));
        opts.network = opts.network.or_else(|| from_env("BEEWALLET_NETWORK"));
        opts.electrum_url = opts.electrum_url.or_else(|| from_env("BEEWALLET_ELECTRUM"));
        opts
    }
}

/// `KEY=value` lines from `./.env`; existing variables win.
fn load_dotenv() {
    let Ok(contents) = std::fs::read_to_string(".env") else { return };
    for line in contents.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"');
            if !value.is_empty() && env::var(key.trim()).is_err() {
                env::set_var(key.trim(), value);
            }
        }
    }
}

fn print_usage() {
    println!(
        r#"beewallet - BIP84 wallet

USAGE:
    beewallet <command> [args] [options]

COMMANDS:
    mnemonic                      Generate a mnemonic (--words 12|15|18|21|24)
    address                       Receive address (--new to advance)
    balance                       Sync, then print the balance
    sync                          Sync and print what changed
    transactions                  Sync, then list transactions
    utxos                         Sync, then list unspent outputs
    send <address> <amount_sat>   Build, sign and broadcast (--fee-rate sat/vB, default 1)

OPTIONS:
    -m, --mnemonic <words>    Wallet mnemonic [env: BEEWALLET_MNEMONIC]
        --password <pass>     BIP39 passphrase [env: BEEWALLET_PASSWORD]
    -n, --network <net>       bitcoin | testnet | signet | regtest [env: BEEWALLET_NETWORK]
    -e, --electrum <url>      Electrum server [env: BEEWALLET_ELECTRUM]
        --pretty              Pretty-print JSON (default on a tty)
    -h, --help                Show this help
    -V, --version             Show version"#
    );
}

fn chain_config(opts: &ParsedArgs, network: Network) -> ChainConfig {
    let chain = ChainConfig::for_network(network);
    match &opts.electrum_url {
        Some(url) => chain.with_endpoint(url.as_str()),
        None => chain,
    }
}

/// Load the wallet; `online` also connects to Electrum and syncs.
fn open_wallet(opts: &ParsedArgs, online: bool) -> anyhow::Result<WalletEngine> {
    let network = Network::parse(opts.network.as_deref())?;
    let mnemonic = opts.mnemonic.as_deref().context("no mnemonic: pass --mnemonic or set BEEWALLET_MNEMONIC")?;
    let mut options = WalletOptions::new(network).with_mnemonic(mnemonic);
    if let Some(password) = &opts.password {
        options = options.with_password(password.as_str());
    }
    if online {
        options = options.with_chain(chain_config(opts, network));
    }

    let engine = WalletEngine::new();
    engine.create_or_import_wallet(options)?;
    if online {
        engine.sync_wallet().context("sync")?;
    }
    Ok(engine)
}

fn cmd_mnemonic(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let words = match &opts.words {
        Some(w) => w.parse().with_context(|| format!("--words '{}'", w))?,
        None => 12,
    };
    let mnemonic = WalletEngine::new().generate_mnemonic(words)?;
    Ok(json!({ "mnemonic": mnemonic }))
}

fn cmd_address(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let engine = open_wallet(opts, false)?;
    // Loading issues index 0; LastUnused hands that one back.
    let mode = if opts.new_address { AddressIndex::New } else { AddressIndex::LastUnused };
    Ok(serde_json::to_value(engine.get_address(mode)?)?)
}

fn cmd_balance(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let engine = open_wallet(opts, true)?;
    Ok(serde_json::to_value(engine.get_balance()?)?)
}

fn cmd_sync(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let network = Network::parse(opts.network.as_deref())?;
    let engine = open_wallet(opts, false)?;
    engine.set_blockchain(chain_config(opts, network))?;
    Ok(serde_json::to_value(engine.sync_wallet()?)?)
}

fn cmd_transactions(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let engine = open_wallet(opts, true)?;
    Ok(serde_json::to_value(engine.list_transactions()?)?)
}

fn cmd_utxos(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let engine = open_wallet(opts, true)?;
    Ok(serde_json::to_value(engine.list_unspent()?)?)
}

fn cmd_send(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let [address, amount] = opts.positional.as_slice() else {
        bail!("usage: beewallet send <address> <amount_sat>");
    };
    let amount: u64 = amount.parse().with_context(|| format!("amount '{}'", amount))?;
    let fee_rate: f32 = match &opts.fee_rate {
        Some(r) => r.parse().with_context(|| format!("--fee-rate '{}'", r))?,
        None => 1.0,
    };

    let engine = open_wallet(opts, true)?;
    let unsigned = engine.create_transaction(address, amount, fee_rate)?;
    let sent = engine.send_transaction(&unsigned)?;
    Ok(json!({
        "txid": sent.txid,
        "fee": sent.fee,
        "fee_rate": unsigned.details.fee_rate,
        "vsize": unsigned.details.vsize,
    }))
}
