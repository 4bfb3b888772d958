use std::{path::PathBuf, sync::Arc};

use crate::config::{self, Config};
use color_eyre::Result;
use dirs::data_dir;
use logins_storage::{
    FilePreferences, KeyringPreferences, LoginStorageConnection, LoginsCrypto,
    SyncableLoginsStorage,
};
use logins_sync::SyncManager;
use tracing::debug;

/// Resolve the default data directory for the logins database.
pub fn default_data_dir() -> Result<PathBuf> {
    config::app_dir(data_dir(), "data")
}

/// Data directory from config, falling back to the platform default.
pub fn resolve_data_dir(config: &Config) -> Result<PathBuf> {
    match &config.data_dir {
        Some(root) => Ok(root.clone()),
        None => default_data_dir(),
    }
}

/// Build the storage adapter: key in the OS keychain, canary in a plain
/// preferences file next to the database.
pub fn storage_from_config(
    config: &Config,
    sync_manager: Arc<SyncManager>,
) -> Result<SyncableLoginsStorage> {
    let root = resolve_data_dir(config)?;
    debug!(?root, "initializing logins storage");
    let crypto = LoginsCrypto::new(
        KeyringPreferences::new(config.keyring_service()),
        FilePreferences::new(root.join(format!("{}.json", config.prefs_name()))),
    );
    let storage = SyncableLoginsStorage::new(
        root.join(config.db_name()),
        Arc::new(LoginStorageConnection::new()),
        crypto,
        sync_manager,
    )?;
    Ok(storage)
}

/// Helper for tests: storage rooted at a temp dir with in-memory preferences.
#[cfg(test)]
pub fn test_storage(
    root: impl Into<PathBuf>,
    sync_manager: Arc<SyncManager>,
) -> SyncableLoginsStorage {
    use logins_core::prefs::InMemoryPreferences;

    let root = root.into();
    SyncableLoginsStorage::new(
        root.join(logins_storage::DB_NAME),
        Arc::new(LoginStorageConnection::new()),
        LoginsCrypto::new(InMemoryPreferences::new(), InMemoryPreferences::new()),
        sync_manager,
    )
    .expect("test storage")
}
