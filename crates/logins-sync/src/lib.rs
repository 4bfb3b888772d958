//! Sync coordinator. Stores register with a [`SyncManager`]; the manager
//! validates the account credentials for a run and drives every live engine.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, Weak},
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use logins_core::{sync::SyncEngine, LoginsError};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use url::Url;
use uuid::Uuid;

const SYNC_KEY_LEN: usize = 64;
const PING_VERSION: u32 = 1;

/// Account material needed to run a sync.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SyncUnlockInfo {
    /// Key identifier of the sync key.
    pub kid: String,
    pub fxa_access_token: String,
    /// Base64url-encoded sync key.
    pub sync_key: String,
    pub token_server_url: String,
    /// When the access token stops being accepted.
    pub expires_at: DateTime<Utc>,
}

impl SyncUnlockInfo {
    /// Reject credentials that cannot possibly authenticate.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), LoginsError> {
        if self.fxa_access_token.trim().is_empty() {
            return Err(auth_invalid("access token is empty"));
        }
        if self.expires_at <= now {
            return Err(auth_invalid("access token has expired"));
        }
        if self.kid.trim().is_empty() {
            return Err(auth_invalid("key id is empty"));
        }
        match URL_SAFE_NO_PAD.decode(self.sync_key.trim()) {
            Ok(bytes) if bytes.len() == SYNC_KEY_LEN => {}
            _ => return Err(auth_invalid("sync key is malformed")),
        }
        Url::parse(&self.token_server_url)
            .map_err(|e| auth_invalid(format!("token server url: {e}")))?;
        Ok(())
    }
}

/// Outcome of one engine within a sync run.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct EngineTelemetry {
    pub name: String,
    pub outgoing: usize,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// Telemetry describing a completed sync run.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SyncTelemetryPing {
    pub version: u32,
    pub uid: String,
    pub flow_id: Uuid,
    pub when: DateTime<Utc>,
    pub took_ms: i64,
    pub engines: Vec<EngineTelemetry>,
}

impl SyncTelemetryPing {
    pub fn to_json(&self) -> Result<String, LoginsError> {
        serde_json::to_string(self).map_err(LoginsError::engine)
    }

    pub fn failures(&self) -> impl Iterator<Item = &EngineTelemetry> {
        self.engines.iter().filter(|e| e.failure_reason.is_some())
    }
}

/// Registry of syncable stores keyed by collection name.
///
/// Engines are held weakly: a store that has been dropped silently leaves
/// the registry on the next run.
#[derive(Default)]
pub struct SyncManager {
    engines: Mutex<BTreeMap<&'static str, Weak<dyn SyncEngine>>>,
}

impl SyncManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `engine` under its collection name, replacing any previous
    /// registration. Returns `false` if the same engine was already registered.
    pub fn register(&self, engine: &Arc<dyn SyncEngine>) -> Result<bool, LoginsError> {
        let mut engines = self.engines.lock().map_err(poisoned)?;
        let name = engine.collection_name();
        if let Some(existing) = engines.get(name).and_then(Weak::upgrade) {
            if Arc::ptr_eq(&existing, engine) {
                return Ok(false);
            }
        }
        engines.insert(name, Arc::downgrade(engine));
        info!(collection = name, "registered sync engine");
        Ok(true)
    }

    /// Collections with a live engine.
    pub fn registered_collections(&self) -> Result<Vec<&'static str>, LoginsError> {
        let engines = self.engines.lock().map_err(poisoned)?;
        Ok(engines
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(name, _)| *name)
            .collect())
    }

    /// Run a sync for every live engine.
    ///
    /// Invalid credentials fail the whole run with `SyncAuthInvalid`; an
    /// individual engine failure is reported in the ping instead.
    #[instrument(skip_all, fields(kid = %info.kid))]
    pub fn sync(&self, info: &SyncUnlockInfo) -> Result<SyncTelemetryPing, LoginsError> {
        let started = Utc::now();
        info.validate(started)?;

        let live: Vec<Arc<dyn SyncEngine>> = {
            let mut engines = self.engines.lock().map_err(poisoned)?;
            engines.retain(|_, weak| weak.strong_count() > 0);
            engines.values().filter_map(Weak::upgrade).collect()
        };

        let mut results = Vec::with_capacity(live.len());
        for engine in live {
            let name = engine.collection_name();
            let telemetry = match engine.sync_finished() {
                Ok(outgoing) => EngineTelemetry {
                    name: name.to_string(),
                    outgoing,
                    failure_reason: None,
                },
                Err(err) => {
                    warn!(collection = name, "sync engine failed: {err}");
                    EngineTelemetry {
                        name: name.to_string(),
                        outgoing: 0,
                        failure_reason: Some(err.to_string()),
                    }
                }
            };
            results.push(telemetry);
        }

        let finished = Utc::now();
        Ok(SyncTelemetryPing {
            version: PING_VERSION,
            uid: info.kid.clone(),
            flow_id: Uuid::new_v4(),
            when: finished,
            took_ms: (finished - started).num_milliseconds(),
            engines: results,
        })
    }

    /// Reset sync state of one collection, if it is registered.
    pub fn reset(&self, collection: &str) -> Result<bool, LoginsError> {
        let engine = {
            let engines = self.engines.lock().map_err(poisoned)?;
            engines.get(collection).and_then(Weak::upgrade)
        };
        match engine {
            Some(engine) => engine.reset().map(|_| true),
            None => Ok(false),
        }
    }
}

fn auth_invalid(reason: impl Into<String>) -> LoginsError {
    LoginsError::SyncAuthInvalid {
        reason: reason.into(),
    }
}

fn poisoned<E: std::fmt::Display>(err: E) -> LoginsError {
    LoginsError::engine(format!("lock poisoned: {err}"))
}
