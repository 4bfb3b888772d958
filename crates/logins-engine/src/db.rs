use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::Utc;
use logins_core::{
    engine::LoginsEngine, EncryptedLogin, InvalidLogin, Login, LoginEntry, LoginsError,
    RecordFields, SecureLoginFields,
};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{crypto::EncryptorDecryptor, domain::base_domain};

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum SyncStatus {
    /// Never uploaded.
    New,
    /// Uploaded once, modified locally since.
    Changed,
    Synced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredLogin {
    #[serde(flatten)]
    login: EncryptedLogin,
    sync_status: SyncStatus,
}

impl StoredLogin {
    fn mark_changed(&mut self) {
        if self.sync_status == SyncStatus::Synced {
            self.sync_status = SyncStatus::Changed;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Database {
    version: u32,
    logins: Vec<StoredLogin>,
    /// Guids deleted locally after having been uploaded.
    #[serde(default)]
    tombstones: Vec<String>,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            logins: Vec::new(),
            tombstones: Vec::new(),
        }
    }
}

impl Database {
    fn position(&self, guid: &str) -> Option<usize> {
        self.logins.iter().position(|l| l.login.record.id == guid)
    }

    /// Decrypted logins stored for the same origin and target as `entry`.
    fn same_target<'a>(
        &'a self,
        entry: &'a LoginEntry,
        encdec: &'a EncryptorDecryptor,
    ) -> impl Iterator<Item = Result<Login, LoginsError>> + 'a {
        self.logins
            .iter()
            .filter(move |stored| {
                let fields = &stored.login.fields;
                fields.origin == entry.origin
                    && fields.form_action_origin == entry.form_action_origin
                    && fields.http_realm == entry.http_realm
            })
            .map(move |stored| {
                let sec: SecureLoginFields = encdec.decrypt_struct(&stored.login.sec_fields)?;
                Ok(Login::from_parts(
                    stored.login.record.clone(),
                    stored.login.fields.clone(),
                    sec,
                ))
            })
    }

    fn check_dupe(
        &self,
        entry: &LoginEntry,
        encdec: &EncryptorDecryptor,
        ignore_guid: Option<&str>,
    ) -> Result<(), LoginsError> {
        for candidate in self.same_target(entry, encdec) {
            let candidate = candidate?;
            if Some(candidate.guid.as_str()) != ignore_guid && candidate.username == entry.username
            {
                return Err(InvalidLogin::Duplicate.into());
            }
        }
        Ok(())
    }

    fn find_to_update(
        &self,
        entry: &LoginEntry,
        encdec: &EncryptorDecryptor,
    ) -> Result<Option<Login>, LoginsError> {
        let mut fallback = None;
        for candidate in self.same_target(entry, encdec) {
            let candidate = candidate?;
            if candidate.username == entry.username {
                return Ok(Some(candidate));
            }
            if candidate.username.is_empty() && fallback.is_none() {
                fallback = Some(candidate);
            }
        }
        Ok(fallback)
    }

    fn insert(
        &mut self,
        entry: LoginEntry,
        encdec: &EncryptorDecryptor,
    ) -> Result<EncryptedLogin, LoginsError> {
        self.check_dupe(&entry, encdec, None)?;

        let now = Utc::now();
        let login = EncryptedLogin {
            record: RecordFields {
                id: Uuid::new_v4().to_string(),
                times_used: 1,
                time_created: now,
                time_last_used: now,
                time_password_changed: now,
            },
            fields: entry.fields(),
            sec_fields: encdec.encrypt_struct(&entry.sec_fields())?,
        };
        self.logins.push(StoredLogin {
            login: login.clone(),
            sync_status: SyncStatus::New,
        });
        Ok(login)
    }

    fn apply_update(
        &mut self,
        guid: &str,
        entry: LoginEntry,
        encdec: &EncryptorDecryptor,
    ) -> Result<EncryptedLogin, LoginsError> {
        let idx = self
            .position(guid)
            .ok_or_else(|| LoginsError::no_such_record(guid))?;
        self.check_dupe(&entry, encdec, Some(guid))?;

        let stored = &mut self.logins[idx];
        let previous: SecureLoginFields = encdec.decrypt_struct(&stored.login.sec_fields)?;
        let now = Utc::now();

        let record = &mut stored.login.record;
        record.times_used += 1;
        record.time_last_used = now;
        if previous.password != entry.password {
            record.time_password_changed = now;
        }
        stored.login.fields = entry.fields();
        stored.login.sec_fields = encdec.encrypt_struct(&entry.sec_fields())?;
        stored.mark_changed();
        Ok(stored.login.clone())
    }
}

/// Logins database persisted as a single JSON file.
///
/// Every mutation is applied to a copy of the in-memory state and only
/// swapped in once the new file has been written, so a failed write leaves
/// both disk and memory untouched.
pub struct DatabaseLoginsStorage {
    path: PathBuf,
    state: Mutex<Option<Database>>,
}

impl DatabaseLoginsStorage {
    /// Open the database at `path`, creating it (and its parents) if missing.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, LoginsError> {
        let path = path.as_ref().to_path_buf();
        let db = if path.exists() {
            read_db(&path)?
        } else {
            let db = Database::default();
            write_db(&path, &db)?;
            db
        };
        debug!(?path, logins = db.logins.len(), "opened logins database");
        Ok(Self {
            path,
            state: Mutex::new(Some(db)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read<T>(&self, f: impl FnOnce(&Database) -> Result<T, LoginsError>) -> Result<T, LoginsError> {
        let guard = self.state.lock().map_err(poisoned)?;
        let db = guard.as_ref().ok_or_else(closed)?;
        f(db)
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Database) -> Result<T, LoginsError>,
    ) -> Result<T, LoginsError> {
        let mut guard = self.state.lock().map_err(poisoned)?;
        let db = guard.as_mut().ok_or_else(closed)?;
        let mut next = db.clone();
        let out = f(&mut next)?;
        write_db(&self.path, &next)?;
        *db = next;
        Ok(out)
    }
}

impl LoginsEngine for DatabaseLoginsStorage {
    #[instrument(skip_all)]
    fn get(&self, guid: &str) -> Result<Option<EncryptedLogin>, LoginsError> {
        self.read(|db| Ok(db.position(guid).map(|idx| db.logins[idx].login.clone())))
    }

    #[instrument(skip_all)]
    fn list(&self) -> Result<Vec<EncryptedLogin>, LoginsError> {
        self.read(|db| Ok(db.logins.iter().map(|l| l.login.clone()).collect()))
    }

    #[instrument(skip_all)]
    fn get_by_base_domain(&self, origin: &str) -> Result<Vec<EncryptedLogin>, LoginsError> {
        let Some(wanted) = base_domain(origin) else {
            return Ok(Vec::new());
        };
        self.read(|db| {
            Ok(db
                .logins
                .iter()
                .filter(|l| base_domain(&l.login.fields.origin).as_deref() == Some(wanted.as_str()))
                .map(|l| l.login.clone())
                .collect())
        })
    }

    #[instrument(skip_all)]
    fn add(&self, entry: LoginEntry, key: &str) -> Result<EncryptedLogin, LoginsError> {
        entry.validate()?;
        let encdec = EncryptorDecryptor::new(key)?;
        self.mutate(|db| db.insert(entry, &encdec))
    }

    #[instrument(skip_all)]
    fn update(
        &self,
        guid: &str,
        entry: LoginEntry,
        key: &str,
    ) -> Result<EncryptedLogin, LoginsError> {
        entry.validate()?;
        let encdec = EncryptorDecryptor::new(key)?;
        self.mutate(|db| db.apply_update(guid, entry, &encdec))
    }

    #[instrument(skip_all)]
    fn add_or_update(&self, entry: LoginEntry, key: &str) -> Result<EncryptedLogin, LoginsError> {
        entry.validate()?;
        let encdec = EncryptorDecryptor::new(key)?;
        self.mutate(|db| match db.find_to_update(&entry, &encdec)? {
            Some(existing) => db.apply_update(&existing.guid, entry, &encdec),
            None => db.insert(entry, &encdec),
        })
    }

    #[instrument(skip_all)]
    fn touch(&self, guid: &str) -> Result<(), LoginsError> {
        self.mutate(|db| {
            let idx = db
                .position(guid)
                .ok_or_else(|| LoginsError::no_such_record(guid))?;
            let stored = &mut db.logins[idx];
            stored.login.record.times_used += 1;
            stored.login.record.time_last_used = Utc::now();
            stored.mark_changed();
            Ok(())
        })
    }

    #[instrument(skip_all)]
    fn delete(&self, guid: &str) -> Result<bool, LoginsError> {
        if self.read(|db| Ok(db.position(guid).is_none()))? {
            return Ok(false);
        }
        self.mutate(|db| {
            let Some(idx) = db.position(guid) else {
                return Ok(false);
            };
            let removed = db.logins.remove(idx);
            if removed.sync_status != SyncStatus::New {
                db.tombstones.push(removed.login.record.id);
            }
            Ok(true)
        })
    }

    #[instrument(skip_all)]
    fn wipe_local(&self) -> Result<(), LoginsError> {
        self.mutate(|db| {
            db.logins.clear();
            db.tombstones.clear();
            Ok(())
        })
    }

    #[instrument(skip_all)]
    fn find_login_to_update(
        &self,
        entry: &LoginEntry,
        key: &str,
    ) -> Result<Option<Login>, LoginsError> {
        let encdec = EncryptorDecryptor::new(key)?;
        self.read(|db| db.find_to_update(entry, &encdec))
    }

    #[instrument(skip_all)]
    fn reset_sync(&self) -> Result<(), LoginsError> {
        self.mutate(|db| {
            for stored in &mut db.logins {
                stored.sync_status = SyncStatus::New;
            }
            db.tombstones.clear();
            Ok(())
        })
    }

    #[instrument(skip_all)]
    fn mark_synced(&self) -> Result<usize, LoginsError> {
        self.mutate(|db| {
            let mut outgoing = db.tombstones.len();
            db.tombstones.clear();
            for stored in &mut db.logins {
                if stored.sync_status != SyncStatus::Synced {
                    stored.sync_status = SyncStatus::Synced;
                    outgoing += 1;
                }
            }
            Ok(outgoing)
        })
    }

    fn close(&self) -> Result<(), LoginsError> {
        let mut guard = self.state.lock().map_err(poisoned)?;
        if guard.take().is_some() {
            debug!(path = ?self.path, "closed logins database");
        }
        Ok(())
    }
}

fn read_db(path: &Path) -> Result<Database, LoginsError> {
    let bytes = fs::read(path).map_err(LoginsError::engine)?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Database::default());
    }
    let db: Database = serde_json::from_slice(&bytes).map_err(LoginsError::engine)?;
    if db.version > SCHEMA_VERSION {
        return Err(LoginsError::engine(format!(
            "unsupported database version {} (max {SCHEMA_VERSION})",
            db.version
        )));
    }
    Ok(db)
}

fn write_db(path: &Path, db: &Database) -> Result<(), LoginsError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(LoginsError::engine)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(LoginsError::engine)?;
    let json = serde_json::to_vec(db).map_err(LoginsError::engine)?;
    tmp.write_all(&json).map_err(LoginsError::engine)?;
    tmp.flush().map_err(LoginsError::engine)?;
    tmp.persist(path).map_err(|e| LoginsError::engine(e.error))?;
    Ok(())
}

fn poisoned<E: std::fmt::Display>(err: E) -> LoginsError {
    LoginsError::engine(format!("lock poisoned: {err}"))
}

fn closed() -> LoginsError {
    LoginsError::engine("database is closed")
}
