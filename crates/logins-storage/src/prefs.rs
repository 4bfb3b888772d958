use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use logins_core::prefs::{Preferences, PreferencesError};
use tempfile::NamedTempFile;
use tracing::instrument;

/// OS keychain-backed preferences. Each preference is one keychain entry
/// under `service`, with the preference name as the account.
pub struct KeyringPreferences {
    service: String,
}

impl KeyringPreferences {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, PreferencesError> {
        keyring::Entry::new(&self.service, key).map_err(backend_err)
    }
}

#[async_trait]
impl Preferences for KeyringPreferences {
    async fn get_string(&self, key: &str) -> Result<Option<String>, PreferencesError> {
        // Keyring operations are synchronous; wrap in async for trait compatibility.
        match self.entry(key)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(backend_err(err)),
        }
    }

    async fn put_string(&self, key: &str, value: &str) -> Result<(), PreferencesError> {
        self.entry(key)?.set_password(value).map_err(backend_err)
    }

    async fn remove(&self, key: &str) -> Result<(), PreferencesError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(backend_err(err)),
        }
    }
}

/// Plain preferences stored as a JSON object in a single file.
pub struct FilePreferences {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), PreferencesError> {
        let _guard = self.lock.lock().map_err(backend_err)?;
        let mut values = read_values(&self.path)?;
        f(&mut values);
        write_values(&self.path, &values)
    }
}

#[async_trait]
impl Preferences for FilePreferences {
    #[instrument(skip_all, fields(key))]
    async fn get_string(&self, key: &str) -> Result<Option<String>, PreferencesError> {
        let _guard = self.lock.lock().map_err(backend_err)?;
        Ok(read_values(&self.path)?.remove(key))
    }

    #[instrument(skip_all, fields(key))]
    async fn put_string(&self, key: &str, value: &str) -> Result<(), PreferencesError> {
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    #[instrument(skip_all, fields(key))]
    async fn remove(&self, key: &str) -> Result<(), PreferencesError> {
        self.update(|values| {
            values.remove(key);
        })
    }
}

fn read_values(path: &Path) -> Result<BTreeMap<String, String>, PreferencesError> {
    match fs::read(path) {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BTreeMap::new()),
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(backend_err),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(err) => Err(backend_err(err)),
    }
}

fn write_values(path: &Path, values: &BTreeMap<String, String>) -> Result<(), PreferencesError> {
    let parent = path.parent().ok_or_else(|| PreferencesError::Backend {
        reason: "invalid preferences path".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(backend_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(backend_err)?;
    let json = serde_json::to_vec_pretty(values).map_err(backend_err)?;
    tmp.write_all(&json).map_err(backend_err)?;
    tmp.flush().map_err(backend_err)?;
    tmp.persist(path).map_err(|e| backend_err(e.error))?;
    Ok(())
}

fn backend_err<E: ToString>(err: E) -> PreferencesError {
    PreferencesError::Backend {
        reason: err.to_string(),
    }
}
