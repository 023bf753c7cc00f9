//! wallet-channel CLI - inspect channel identity and run a relay session.
//!
//! This is the main binary entry point. See the `wallet_channel` library
//! for the core functionality.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use wallet_channel::key_agreement::{self, KeyAgreement};
use wallet_channel::relay::session::SESSION_SCOPE;
use wallet_channel::relay::{RelayConnection, RelayListener, RelaySession, WebSocketConnector};
use wallet_channel::{Config, FileStorage, ScopedStorage, Storage};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Storage scope for this CLI's own key material.
const CLI_SCOPE: &str = "wallet-channel";

#[derive(Parser)]
#[command(name = "wallet-channel")]
#[command(version = VERSION)]
#[command(about = "Encrypted dapp-to-wallet channels")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print this installation's ECDH public key
    Identity {
        /// Generate a fresh key pair first
        #[arg(long)]
        reset: bool,
    },
    /// Print the relay session id and link state
    Session {
        /// Replace the stored session with a new one
        #[arg(long)]
        new: bool,
    },
    /// Host the stored session on the relay until Ctrl-C
    Relay,
}

/// Logs every relay update. Decrypted metadata values stay out of the log.
struct LoggingListener;

impl RelayListener for LoggingListener {
    fn linked_updated(&self, linked: bool) {
        log::info!("linked: {linked}");
    }

    fn connected_updated(&self, connected: bool) {
        log::info!("connected: {connected}");
    }

    fn chain_updated(&self, _chain_id: &str, _json_rpc_url: &str) {
        log::info!("chain updated");
    }

    fn account_updated(&self, _address: &str) {
        log::info!("account updated");
    }

    fn metadata_updated(&self, key: &str, _value: &str) {
        log::info!("metadata updated: {key}");
    }

    fn web3_response(&self, id: &str, _response: &serde_json::Value) {
        log::info!("web3 response for request {id}");
    }

    fn reset_and_reload(&self) {
        log::warn!("session destroyed by wallet; run `wallet-channel session --new`");
    }
}

fn open_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    let path = config.storage_path()?;
    let storage = FileStorage::open(&path)
        .with_context(|| format!("Failed to open storage at {}", path.display()))?;
    Ok(Arc::new(storage))
}

fn identity(storage: Arc<dyn Storage>, reset: bool) -> Result<()> {
    let scoped = ScopedStorage::new(CLI_SCOPE, Some(key_agreement::STORAGE_MODULE), storage);
    let mut keys = KeyAgreement::new(scoped);
    if reset {
        keys.clear()?;
        log::info!("Generated a new key pair");
    }
    println!("{}", keys.get_own_public_key()?.to_hex()?);
    Ok(())
}

fn session(storage: Arc<dyn Storage>, new: bool) -> Result<()> {
    let scoped = ScopedStorage::new(SESSION_SCOPE, None, storage);
    let session = if new {
        if let Some(old) = RelaySession::load(scoped.clone())? {
            old.clear()?;
        }
        RelaySession::create(scoped)?
    } else {
        RelaySession::load_or_create(scoped)?
    };
    println!("session: {}", session.id());
    println!("linked:  {}", session.linked());
    Ok(())
}

async fn relay(config: &Config, storage: Arc<dyn Storage>) -> Result<()> {
    let scoped = ScopedStorage::new(SESSION_SCOPE, None, storage);
    let session = RelaySession::load_or_create(scoped)?;
    println!("Hosting relay session {} on {}", session.id(), config.relay_url);

    let connection = RelayConnection::new(
        session,
        config.relay_config(),
        Arc::new(WebSocketConnector),
        Arc::new(LoggingListener),
    )?;
    connection.connect()?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    println!("Shutting down...");
    connection.destroy().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let storage = open_storage(&config)?;

    match cli.command {
        Commands::Identity { reset } => identity(storage, reset),
        Commands::Session { new } => session(storage, new),
        Commands::Relay => relay(&config, storage).await,
    }
}
