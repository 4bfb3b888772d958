mod cli;
mod config;
mod logins;
mod storage;
mod sync;

use std::sync::Arc;

use crate::cli::{Command, ConfigCommand};
use clap::Parser;
use color_eyre::Result;
use logins_core::{storage::LoginsStorage, LoginsError};
use logins_storage::SyncableLoginsStorage;
use logins_sync::SyncManager;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        command => run_with_storage(command, &config).await?,
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("logins {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

/// Open the adapter, run one command, then close the connection.
async fn run_with_storage(command: Command, config: &config::Config) -> Result<()> {
    let manager = Arc::new(SyncManager::new());
    let storage = storage::storage_from_config(config, manager.clone())?;
    let result = execute(command, &storage, &manager, config).await;
    match storage.close() {
        // Commands that never touched the database leave nothing to close.
        Ok(()) | Err(LoginsError::NotInitialized) => {}
        Err(err) => warn!("failed to close logins storage: {err}"),
    }
    result
}

async fn execute(
    command: Command,
    storage: &SyncableLoginsStorage,
    manager: &SyncManager,
    config: &config::Config,
) -> Result<()> {
    match command {
        Command::Add { entry, upsert } => {
            let guid = logins::add(storage, entry.into(), upsert).await?;
            println!("Stored login {guid}");
        }
        Command::Get {
            guid,
            show_password,
        } => logins::show(storage, &guid, show_password).await?,
        Command::List {
            domain,
            show_passwords,
        } => logins::list(storage, domain.as_deref(), show_passwords).await?,
        Command::Update { guid, entry } => logins::update(storage, &guid, entry.into()).await?,
        Command::Touch { guid } => {
            storage.touch(&guid).await?;
            println!("Touched {guid}");
        }
        Command::Delete { guid } => logins::delete(storage, &guid).await?,
        Command::Wipe { yes } => {
            if !yes {
                color_eyre::eyre::bail!("refusing to wipe without --yes");
            }
            storage.wipe_local().await?;
            println!("Local logins wiped.");
        }
        Command::Health => {
            logins::health(storage).await?;
            println!("Storage: ok");
        }
        Command::Sync {
            token,
            expires_in,
            json,
        } => {
            let ping = sync::run(config, storage, manager, token, expires_in).await?;
            sync::print_ping(&ping, json)?;
        }
        Command::Version | Command::Config(_) => {}
    }
    Ok(())
}
