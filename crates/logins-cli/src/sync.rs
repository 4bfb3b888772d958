use chrono::{Duration, Utc};
use color_eyre::Result;
use logins_core::storage::LoginsStorage;
use logins_storage::SyncableLoginsStorage;
use logins_sync::{SyncManager, SyncTelemetryPing, SyncUnlockInfo};
use tracing::info;

use crate::config;

const TOKEN_ENV: &str = "LOGINS_SYNC_TOKEN";

/// Register the logins store and run one sync with the configured account.
pub async fn run(
    cfg: &config::Config,
    storage: &SyncableLoginsStorage,
    manager: &SyncManager,
    token: Option<String>,
    expires_in: i64,
) -> Result<SyncTelemetryPing> {
    let unlock = unlock_info(cfg, token, expires_in)?;
    storage.warm_up().await?;
    storage.register_with_sync_manager()?;
    let ping = manager.sync(&unlock)?;
    info!(flow_id = %ping.flow_id, took_ms = ping.took_ms, "sync finished");
    Ok(ping)
}

pub fn print_ping(ping: &SyncTelemetryPing, json: bool) -> Result<()> {
    if json {
        println!("{}", ping.to_json()?);
        return Ok(());
    }
    for engine in &ping.engines {
        match &engine.failure_reason {
            Some(reason) => println!("{}: failed ({reason})", engine.name),
            None => println!("{}: {} outgoing", engine.name, engine.outgoing),
        }
    }
    Ok(())
}

fn unlock_info(
    cfg: &config::Config,
    token: Option<String>,
    expires_in: i64,
) -> Result<SyncUnlockInfo> {
    let account = cfg.sync.as_ref().ok_or_else(|| {
        color_eyre::eyre::eyre!("no [sync] section in config; run `logins config init` and edit it")
    })?;
    let token = token
        .or_else(|| std::env::var(TOKEN_ENV).ok())
        .ok_or_else(|| color_eyre::eyre::eyre!("pass --token or set {TOKEN_ENV}"))?;
    Ok(SyncUnlockInfo {
        kid: account.kid.clone(),
        fxa_access_token: token,
        sync_key: account.sync_key.clone(),
        token_server_url: account.token_server_url.clone(),
        expires_at: Utc::now() + Duration::seconds(expires_in),
    })
}
