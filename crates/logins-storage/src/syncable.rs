use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Instant,
};

use async_trait::async_trait;
use logins_core::{
    engine::LoginsEngine, storage::LoginsStorage, sync::SyncEngine, EncryptedLogin, Login,
    LoginEntry, LoginsError,
};
use logins_sync::SyncManager;
use tracing::{info, instrument, warn};

use crate::{
    connection::LoginStorageConnection,
    crypto::{LoginsCrypto, ManagedKey},
    worker::Worker,
};

/// Collection name the adapter registers under.
pub const COLLECTION_NAME: &str = "passwords";

struct Inner {
    db_path: PathBuf,
    connection: Arc<LoginStorageConnection>,
    crypto: LoginsCrypto,
    opened: Mutex<bool>,
    /// Set when a replacement key was generated and the local records it
    /// cannot read are not yet wiped.
    recovery_pending: AtomicBool,
}

impl Inner {
    /// Engine handle, opening the connection on first use. After the
    /// connection is closed this fails with `NotInitialized` instead of
    /// reopening it.
    fn storage(&self) -> Result<Arc<dyn LoginsEngine>, LoginsError> {
        {
            let mut opened = self
                .opened
                .lock()
                .map_err(|e| LoginsError::engine(format!("lock poisoned: {e}")))?;
            if !*opened {
                self.connection.initialize(&self.db_path)?;
                *opened = true;
            }
        }
        self.connection.handle()
    }

    /// Resolve the key; a replaced key makes existing records unreadable,
    /// so they are wiped before the new key is used.
    ///
    /// The engine is opened first, and the wipe is retried on every call
    /// until it succeeds: the replacement key is cached and persisted as
    /// soon as it is generated, so it never reports recovery twice.
    async fn resolve_key(&self) -> Result<ManagedKey, LoginsError> {
        let storage = self.storage()?;
        let managed = self.crypto.get_or_generate_key().await?;
        self.note_recovery(&managed);
        if self.recovery_pending.load(Ordering::SeqCst) {
            warn!("wiping logins encrypted with an unusable key");
            storage.wipe_local()?;
            self.recovery_pending.store(false, Ordering::SeqCst);
        }
        Ok(managed)
    }

    fn note_recovery(&self, managed: &ManagedKey) {
        if managed.needs_recovery() {
            warn!(reason = ?managed.was_generated, "logins key replaced");
            self.recovery_pending.store(true, Ordering::SeqCst);
        }
    }

    fn decrypt_all(
        &self,
        logins: Vec<EncryptedLogin>,
        key: &ManagedKey,
    ) -> Result<Vec<Login>, LoginsError> {
        logins
            .into_iter()
            .map(|login| self.crypto.decrypt_login(login, key))
            .collect()
    }
}

/// Sync-facing view of the adapter. Resolves the engine at sync time, so a
/// closed connection shows up as a per-engine failure in the sync ping.
struct LoginsSyncEngine {
    connection: Arc<LoginStorageConnection>,
}

impl SyncEngine for LoginsSyncEngine {
    fn collection_name(&self) -> &'static str {
        COLLECTION_NAME
    }

    fn sync_finished(&self) -> Result<usize, LoginsError> {
        self.connection.handle()?.mark_synced()
    }

    fn reset(&self) -> Result<(), LoginsError> {
        self.connection.handle()?.reset_sync()
    }
}

/// Asynchronous logins storage over a shared engine connection.
///
/// Every operation runs on this adapter's dedicated worker, so calls issued
/// one after another by a caller execute in that order.
pub struct SyncableLoginsStorage {
    inner: Arc<Inner>,
    worker: Worker,
    sync_manager: Arc<SyncManager>,
    sync_engine: Arc<dyn SyncEngine>,
    registered: AtomicBool,
}

impl SyncableLoginsStorage {
    pub fn new(
        db_path: impl Into<PathBuf>,
        connection: Arc<LoginStorageConnection>,
        crypto: LoginsCrypto,
        sync_manager: Arc<SyncManager>,
    ) -> Result<Self, LoginsError> {
        let sync_engine: Arc<dyn SyncEngine> = Arc::new(LoginsSyncEngine {
            connection: connection.clone(),
        });
        Ok(Self {
            inner: Arc::new(Inner {
                db_path: db_path.into(),
                connection,
                crypto,
                opened: Mutex::new(false),
                recovery_pending: AtomicBool::new(false),
            }),
            worker: Worker::spawn("logins-storage")?,
            sync_manager,
            sync_engine,
            registered: AtomicBool::new(false),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.inner.db_path
    }

    /// Register with the sync manager. Only the first call has an effect;
    /// the connection is not touched.
    pub fn register_with_sync_manager(&self) -> Result<(), LoginsError> {
        if self.registered.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(err) = self.sync_manager.register(&self.sync_engine) {
            self.registered.store(false, Ordering::SeqCst);
            return Err(err);
        }
        Ok(())
    }

    /// Stop the worker and close the shared connection.
    pub fn close(&self) -> Result<(), LoginsError> {
        self.worker.shutdown();
        self.inner.connection.close()
    }

    async fn dispatch<F, Fut, T>(&self, f: F) -> Result<T, LoginsError>
    where
        F: FnOnce(Arc<Inner>) -> Fut,
        Fut: std::future::Future<Output = Result<T, LoginsError>> + Send + 'static,
        T: Send + 'static,
    {
        self.worker.run(f(self.inner.clone())).await
    }
}

#[async_trait]
impl LoginsStorage for SyncableLoginsStorage {
    #[instrument(skip_all)]
    async fn warm_up(&self) -> Result<(), LoginsError> {
        self.dispatch(|inner| async move {
            let started = Instant::now();
            inner.storage()?;
            info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "warmed up logins storage"
            );
            Ok(())
        })
        .await
    }

    #[instrument(skip_all)]
    async fn get(&self, guid: &str) -> Result<Option<Login>, LoginsError> {
        let guid = guid.to_string();
        self.dispatch(|inner| async move {
            let key = inner.resolve_key().await?;
            let Some(encrypted) = inner.storage()?.get(&guid)? else {
                return Ok(None);
            };
            inner.crypto.decrypt_login(encrypted, &key).map(Some)
        })
        .await
    }

    #[instrument(skip_all)]
    async fn list(&self) -> Result<Vec<Login>, LoginsError> {
        self.dispatch(|inner| async move {
            let key = inner.resolve_key().await?;
            let logins = inner.storage()?.list()?;
            inner.decrypt_all(logins, &key)
        })
        .await
    }

    #[instrument(skip_all)]
    async fn get_by_base_domain(&self, origin: &str) -> Result<Vec<Login>, LoginsError> {
        let origin = origin.to_string();
        self.dispatch(|inner| async move {
            let key = inner.resolve_key().await?;
            let logins = inner.storage()?.get_by_base_domain(&origin)?;
            inner.decrypt_all(logins, &key)
        })
        .await
    }

    #[instrument(skip_all)]
    async fn add(&self, entry: LoginEntry) -> Result<EncryptedLogin, LoginsError> {
        self.dispatch(|inner| async move {
            let key = inner.resolve_key().await?;
            inner.storage()?.add(entry, &key.key)
        })
        .await
    }

    #[instrument(skip_all)]
    async fn update(&self, guid: &str, entry: LoginEntry) -> Result<EncryptedLogin, LoginsError> {
        let guid = guid.to_string();
        self.dispatch(|inner| async move {
            let key = inner.resolve_key().await?;
            inner.storage()?.update(&guid, entry, &key.key)
        })
        .await
    }

    #[instrument(skip_all)]
    async fn add_or_update(&self, entry: LoginEntry) -> Result<EncryptedLogin, LoginsError> {
        self.dispatch(|inner| async move {
            let key = inner.resolve_key().await?;
            inner.storage()?.add_or_update(entry, &key.key)
        })
        .await
    }

    #[instrument(skip_all)]
    async fn touch(&self, guid: &str) -> Result<(), LoginsError> {
        let guid = guid.to_string();
        self.dispatch(|inner| async move { inner.storage()?.touch(&guid) })
            .await
    }

    #[instrument(skip_all)]
    async fn delete(&self, guid: &str) -> Result<bool, LoginsError> {
        let guid = guid.to_string();
        self.dispatch(|inner| async move { inner.storage()?.delete(&guid) })
            .await
    }

    #[instrument(skip_all)]
    async fn wipe_local(&self) -> Result<(), LoginsError> {
        self.dispatch(|inner| async move { inner.storage()?.wipe_local() })
            .await
    }

    #[instrument(skip_all)]
    async fn find_login_to_update(&self, entry: LoginEntry) -> Result<Option<Login>, LoginsError> {
        self.dispatch(|inner| async move {
            let key = inner.resolve_key().await?;
            inner.storage()?.find_login_to_update(&entry, &key.key)
        })
        .await
    }

    /// Pure transform: runs on the caller's task and keeps working after
    /// `close`. A key replaced here leaves the wipe to the next engine call.
    #[instrument(skip_all)]
    async fn decrypt_login(&self, login: EncryptedLogin) -> Result<Login, LoginsError> {
        let key = self.inner.crypto.get_or_generate_key().await?;
        self.inner.note_recovery(&key);
        self.inner.crypto.decrypt_login(login, &key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use logins_core::{
        prefs::{InMemoryPreferences, Preferences, PreferencesError},
        InvalidLogin,
    };
    use logins_engine::{create_key, DatabaseLoginsStorage};

    use super::*;
    use crate::crypto::KEY_PREF;

    /// Secure preferences that count reads of the key.
    struct CountingPreferences {
        inner: InMemoryPreferences,
        reads: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Preferences for CountingPreferences {
        async fn get_string(&self, key: &str) -> Result<Option<String>, PreferencesError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get_string(key).await
        }

        async fn put_string(&self, key: &str, value: &str) -> Result<(), PreferencesError> {
            self.inner.put_string(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), PreferencesError> {
            self.inner.remove(key).await
        }
    }

    /// Connection whose first open fails.
    fn flaky_connection() -> LoginStorageConnection {
        let attempts = AtomicUsize::new(0);
        LoginStorageConnection::with_factory(move |path| {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(LoginsError::engine("transient io"));
            }
            let engine: Arc<dyn LoginsEngine> = Arc::new(DatabaseLoginsStorage::new(path)?);
            Ok(engine)
        })
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        storage: SyncableLoginsStorage,
        connection: Arc<LoginStorageConnection>,
        sync_manager: Arc<SyncManager>,
        secure: InMemoryPreferences,
        plain: InMemoryPreferences,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let connection = Arc::new(LoginStorageConnection::new());
            let sync_manager = Arc::new(SyncManager::new());
            let (secure, plain) = (InMemoryPreferences::new(), InMemoryPreferences::new());
            let storage = SyncableLoginsStorage::new(
                dir.path().join("db"),
                connection.clone(),
                LoginsCrypto::new(secure.clone(), plain.clone()),
                sync_manager.clone(),
            )
            .expect("storage");
            Self {
                _dir: dir,
                storage,
                connection,
                sync_manager,
                secure,
                plain,
            }
        }

        /// A second adapter over the same database and preferences.
        fn reopen(&self) -> SyncableLoginsStorage {
            self.reopen_with(LoginStorageConnection::new(), self.secure.clone())
        }

        fn reopen_with(
            &self,
            connection: LoginStorageConnection,
            secure: impl Preferences + 'static,
        ) -> SyncableLoginsStorage {
            SyncableLoginsStorage::new(
                self.storage.db_path(),
                Arc::new(connection),
                LoginsCrypto::new(secure, self.plain.clone()),
                self.sync_manager.clone(),
            )
            .expect("storage")
        }
    }

    fn entry() -> LoginEntry {
        LoginEntry::for_form("example.com", "example.com", "", "p")
    }

    #[tokio::test]
    async fn add_get_delete_scenario() {
        let fx = Fixture::new();

        let added = fx.storage.add(entry()).await.expect("add");
        let login = fx
            .storage
            .get(added.guid())
            .await
            .expect("get")
            .expect("present");
        assert_eq!(login.to_entry(), entry());
        assert_eq!(login.guid, added.record.id);

        assert!(fx.storage.delete(added.guid()).await.expect("delete"));
        assert_eq!(fx.storage.get(added.guid()).await.expect("get"), None);
        assert!(!fx.storage.delete(added.guid()).await.expect("delete absent"));
    }

    #[tokio::test]
    async fn get_absent_guid_is_none() {
        let fx = Fixture::new();
        assert_eq!(fx.storage.get("missing").await.expect("get"), None);
    }

    #[tokio::test]
    async fn invalid_entries_are_rejected() {
        let fx = Fixture::new();

        let mut blank = entry();
        blank.password = String::new();
        assert_eq!(
            fx.storage.add(blank).await,
            Err(LoginsError::InvalidRecord(InvalidLogin::EmptyPassword))
        );

        let mut both = entry();
        both.http_realm = Some("realm".into());
        assert_eq!(
            fx.storage.add(both).await,
            Err(LoginsError::InvalidRecord(InvalidLogin::BothTargets))
        );

        let mut neither = entry();
        neither.form_action_origin = None;
        assert_eq!(
            fx.storage.add(neither).await,
            Err(LoginsError::InvalidRecord(InvalidLogin::NoTarget))
        );

        assert!(fx.storage.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn update_missing_guid_is_no_such_record() {
        let fx = Fixture::new();
        let added = fx.storage.add(entry()).await.expect("add");

        let err = fx
            .storage
            .update("missing", LoginEntry::for_realm("https://x.org", "r", "u", "p"))
            .await
            .expect_err("missing");
        assert_eq!(err, LoginsError::no_such_record("missing"));

        let logins = fx.storage.list().await.expect("list");
        assert_eq!(logins.len(), 1);
        assert_eq!(logins[0].guid, added.record.id);
        assert_eq!(logins[0].to_entry(), entry());
    }

    #[tokio::test]
    async fn update_touch_and_upsert() {
        let fx = Fixture::new();
        let added = fx.storage.add(entry()).await.expect("add");

        let mut changed = entry();
        changed.password = "p2".into();
        fx.storage
            .update(added.guid(), changed.clone())
            .await
            .expect("update");
        fx.storage.touch(added.guid()).await.expect("touch");

        let login = fx
            .storage
            .get(added.guid())
            .await
            .expect("get")
            .expect("present");
        assert_eq!(login.password, "p2");
        assert_eq!(login.times_used, 3);

        assert!(matches!(
            fx.storage.touch("missing").await,
            Err(LoginsError::NoSuchRecord { .. })
        ));

        let found = fx
            .storage
            .find_login_to_update(changed.clone())
            .await
            .expect("find")
            .expect("match");
        assert_eq!(found.guid, added.record.id);

        changed.password = "p3".into();
        let upserted = fx.storage.add_or_update(changed).await.expect("upsert");
        assert_eq!(upserted.record.id, added.record.id);
        assert_eq!(fx.storage.list().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn base_domain_and_wipe() {
        let fx = Fixture::new();
        fx.storage
            .add(LoginEntry::for_form(
                "https://login.example.com",
                "https://login.example.com",
                "a",
                "p",
            ))
            .await
            .expect("add");
        fx.storage
            .add(LoginEntry::for_realm("https://other.net", "realm", "b", "p"))
            .await
            .expect("add");

        let found = fx
            .storage
            .get_by_base_domain("https://www.example.com")
            .await
            .expect("by domain");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].username, "a");

        fx.storage.wipe_local().await.expect("wipe");
        assert!(fx.storage.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn decrypt_login_round_trips_added_record() {
        let fx = Fixture::new();
        let added = fx.storage.add(entry()).await.expect("add");
        let login = fx.storage.decrypt_login(added).await.expect("decrypt");
        assert_eq!(login.to_entry(), entry());
    }

    #[tokio::test]
    async fn data_survives_a_new_adapter_with_the_same_key() {
        let fx = Fixture::new();
        let added = fx.storage.add(entry()).await.expect("add");
        fx.storage.close().expect("close");

        let reopened = fx.reopen();
        let login = reopened
            .get(added.guid())
            .await
            .expect("get")
            .expect("present");
        assert_eq!(login.password, "p");
    }

    #[tokio::test]
    async fn lost_key_wipes_unreadable_logins() {
        let fx = Fixture::new();
        fx.storage.add(entry()).await.expect("add");
        fx.storage.close().expect("close");
        fx.secure.remove(KEY_PREF).await.expect("drop key");

        let reopened = fx.reopen();
        assert!(reopened.list().await.expect("list").is_empty());
        reopened.add(entry()).await.expect("add with new key");
    }

    #[tokio::test]
    async fn failed_open_during_key_recovery_still_wipes() {
        let fx = Fixture::new();
        fx.storage.add(entry()).await.expect("add");
        fx.storage.close().expect("close");
        fx.secure.remove(KEY_PREF).await.expect("drop key");

        let reopened = fx.reopen_with(flaky_connection(), fx.secure.clone());
        assert!(matches!(
            reopened.list().await,
            Err(LoginsError::Engine { .. })
        ));
        assert!(reopened.list().await.expect("list").is_empty());
        reopened.add(entry()).await.expect("add with new key");
        assert_eq!(reopened.list().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn key_replaced_by_decrypt_is_wiped_by_next_call() {
        let fx = Fixture::new();
        let added = fx.storage.add(entry()).await.expect("add");
        fx.storage.close().expect("close");
        fx.secure.remove(KEY_PREF).await.expect("drop key");

        let reopened = fx.reopen();
        assert_eq!(
            reopened.decrypt_login(added).await,
            Err(LoginsError::IncorrectKey)
        );
        assert!(reopened.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn decrypt_login_works_after_close() {
        let fx = Fixture::new();
        let added = fx.storage.add(entry()).await.expect("add");
        fx.storage.close().expect("close");

        let login = fx.storage.decrypt_login(added).await.expect("decrypt");
        assert_eq!(login.password, "p");
    }

    #[tokio::test]
    async fn batch_reads_resolve_the_key_once() {
        let fx = Fixture::new();
        for user in ["a", "b", "c"] {
            fx.storage
                .add(LoginEntry::for_form(
                    "https://www.example.com",
                    "https://www.example.com",
                    user,
                    "p",
                ))
                .await
                .expect("add");
        }
        fx.storage.close().expect("close");

        let reads = Arc::new(AtomicUsize::new(0));
        let reopened = fx.reopen_with(
            LoginStorageConnection::new(),
            CountingPreferences {
                inner: fx.secure.clone(),
                reads: reads.clone(),
            },
        );
        assert_eq!(reopened.list().await.expect("list").len(), 3);
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        let same_domain = reopened
            .get_by_base_domain("https://login.example.com")
            .await
            .expect("by domain");
        assert_eq!(same_domain.len(), 3);
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wrong_key_is_incorrect_key() {
        let fx = Fixture::new();
        let added = fx.storage.add(entry()).await.expect("add");

        let mut foreign = added.clone();
        foreign.sec_fields = logins_engine::EncryptorDecryptor::new(&create_key())
            .expect("cipher")
            .encrypt(b"{}")
            .expect("encrypt");
        assert_eq!(
            fx.storage.decrypt_login(foreign).await,
            Err(LoginsError::IncorrectKey)
        );
    }

    #[tokio::test]
    async fn operations_after_close_are_not_initialized() {
        let fx = Fixture::new();
        fx.storage.warm_up().await.expect("warm up");
        assert!(fx.connection.is_initialized());

        fx.storage.close().expect("close");
        assert!(matches!(
            fx.connection.handle(),
            Err(LoginsError::NotInitialized)
        ));
        assert_eq!(fx.storage.list().await, Err(LoginsError::NotInitialized));
        assert_eq!(fx.storage.get("g").await, Err(LoginsError::NotInitialized));
        assert_eq!(fx.storage.close(), Err(LoginsError::NotInitialized));
    }

    #[tokio::test]
    async fn close_without_use_is_not_initialized() {
        let fx = Fixture::new();
        assert_eq!(fx.storage.close(), Err(LoginsError::NotInitialized));
    }

    #[tokio::test]
    async fn registration_happens_once_and_drives_sync() {
        let fx = Fixture::new();
        fx.storage.register_with_sync_manager().expect("register");
        fx.storage.register_with_sync_manager().expect("register again");
        assert_eq!(
            fx.sync_manager.registered_collections().expect("collections"),
            vec![COLLECTION_NAME]
        );

        fx.storage.add(entry()).await.expect("add");
        let ping = fx
            .sync_manager
            .sync(&logins_sync::SyncUnlockInfo {
                kid: "1-a".into(),
                fxa_access_token: "t".into(),
                sync_key: base64_sync_key(),
                token_server_url: "https://token.example.com".into(),
                expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
            })
            .expect("sync");
        assert_eq!(ping.engines[0].outgoing, 1);

        drop(fx.storage);
        assert!(fx
            .sync_manager
            .registered_collections()
            .expect("collections")
            .is_empty());
    }

    fn base64_sync_key() -> String {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
        URL_SAFE_NO_PAD.encode([1u8; 64])
    }
}
