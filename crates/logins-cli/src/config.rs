use std::{
    fs, io,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};

/// Directory name under the platform config and data roots, and the default
/// keychain service.
pub const APP_NAME: &str = "logins";

const CONFIG_FILE: &str = "config.toml";

/// User-level configuration loaded from `~/.config/logins/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the data directory (database and plain preferences).
    pub data_dir: Option<PathBuf>,
    /// Database file name inside the data directory.
    pub db_name: Option<String>,
    /// OS keychain service the encryption key is stored under.
    pub keyring_service: Option<String>,
    /// Plain preferences file name (without extension) inside the data directory.
    pub prefs_name: Option<String>,
    /// Sync account settings (optional).
    pub sync: Option<SyncConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SyncConfig {
    pub kid: String,
    pub sync_key: String,
    pub token_server_url: String,
}

impl Config {
    pub fn db_name(&self) -> &str {
        self.db_name.as_deref().unwrap_or(logins_storage::DB_NAME)
    }

    pub fn keyring_service(&self) -> &str {
        self.keyring_service.as_deref().unwrap_or(APP_NAME)
    }

    pub fn prefs_name(&self) -> &str {
        self.prefs_name.as_deref().unwrap_or(logins_storage::PREFS_NAME)
    }
}

/// Load config from [`default_path`].
pub fn load() -> Result<Config> {
    load_from_path(default_path()?)
}

/// Parse the TOML file at `path`. A missing or blank file means defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let contents = match fs::read_to_string(path.as_ref()) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(err) => return Err(err.into()),
    };
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(toml::from_str(&contents)?)
}

/// `<config root>/logins/config.toml`.
pub fn default_path() -> Result<PathBuf> {
    Ok(app_dir(config_dir(), "config")?.join(CONFIG_FILE))
}

/// `APP_NAME` under a platform root such as `dirs::data_dir()`; `kind`
/// names the root in the error when the platform has none.
pub fn app_dir(root: Option<PathBuf>, kind: &str) -> Result<PathBuf> {
    root.map(|root| root.join(APP_NAME))
        .ok_or_else(|| color_eyre::eyre::eyre!("no {kind} dir available"))
}

/// Write the config to the default path unless a file is already there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_to_path_if_missing(config, &default_path()?)
}

/// Write `config` to `path`, creating parent directories as needed. An
/// existing file is left alone so user edits are never clobbered.
pub fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}
