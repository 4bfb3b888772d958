use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by preference store implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreferencesError {
    /// Underlying backend failure (keychain, filesystem, ...).
    #[error("preferences backend failure: {reason}")]
    Backend { reason: String },
}

impl From<PreferencesError> for crate::error::LoginsError {
    fn from(err: PreferencesError) -> Self {
        crate::error::LoginsError::engine(err)
    }
}

/// String key/value store used to persist key material and its canary.
#[async_trait]
pub trait Preferences: Send + Sync {
    /// Value for `key`, or `None` if never written.
    async fn get_string(&self, key: &str) -> Result<Option<String>, PreferencesError>;

    /// Persist a value, overwriting any existing one.
    async fn put_string(&self, key: &str, value: &str) -> Result<(), PreferencesError>;

    /// Remove a key (idempotent).
    async fn remove(&self, key: &str) -> Result<(), PreferencesError>;
}

/// In-memory preferences for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPreferences {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Preferences for InMemoryPreferences {
    async fn get_string(&self, key: &str) -> Result<Option<String>, PreferencesError> {
        let map = self.inner.lock().map_err(poisoned)?;
        Ok(map.get(key).cloned())
    }

    async fn put_string(&self, key: &str, value: &str) -> Result<(), PreferencesError> {
        let mut map = self.inner.lock().map_err(poisoned)?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PreferencesError> {
        let mut map = self.inner.lock().map_err(poisoned)?;
        map.remove(key);
        Ok(())
    }
}

fn poisoned<E: std::fmt::Display>(err: E) -> PreferencesError {
    PreferencesError::Backend {
        reason: format!("lock poisoned: {err}"),
    }
}
