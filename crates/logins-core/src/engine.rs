use crate::{
    error::LoginsError,
    login::{EncryptedLogin, Login, LoginEntry},
};

/// Surface of the storage engine that performs the actual persistence,
/// encryption and sync bookkeeping. Calls are blocking; callers are expected
/// to dispatch them off any latency-sensitive context.
///
/// `key` arguments are encoded key material as produced by the engine's
/// key creation routine.
pub trait LoginsEngine: Send + Sync {
    /// Fetch a single record; `Ok(None)` when absent.
    fn get(&self, guid: &str) -> Result<Option<EncryptedLogin>, LoginsError>;

    fn list(&self) -> Result<Vec<EncryptedLogin>, LoginsError>;

    /// Records whose origin shares the registrable domain of `origin`.
    fn get_by_base_domain(&self, origin: &str) -> Result<Vec<EncryptedLogin>, LoginsError>;

    fn add(&self, entry: LoginEntry, key: &str) -> Result<EncryptedLogin, LoginsError>;

    fn update(&self, guid: &str, entry: LoginEntry, key: &str)
        -> Result<EncryptedLogin, LoginsError>;

    fn add_or_update(&self, entry: LoginEntry, key: &str) -> Result<EncryptedLogin, LoginsError>;

    /// Record a use of the login (usage metadata only).
    fn touch(&self, guid: &str) -> Result<(), LoginsError>;

    /// Returns whether a record existed and was removed.
    fn delete(&self, guid: &str) -> Result<bool, LoginsError>;

    fn wipe_local(&self) -> Result<(), LoginsError>;

    /// Existing login an entry should be merged into, if any.
    fn find_login_to_update(&self, entry: &LoginEntry, key: &str)
        -> Result<Option<Login>, LoginsError>;

    /// Forget sync state: every record is treated as never uploaded.
    fn reset_sync(&self) -> Result<(), LoginsError>;

    /// Mark pending local changes as uploaded and return how many there were.
    fn mark_synced(&self) -> Result<usize, LoginsError>;

    fn close(&self) -> Result<(), LoginsError>;
}
