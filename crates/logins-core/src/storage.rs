use async_trait::async_trait;

use crate::{
    error::LoginsError,
    login::{EncryptedLogin, Login, LoginEntry},
};

/// Asynchronous contract for credential storage as seen by application code.
#[async_trait]
pub trait LoginsStorage: Send + Sync {
    /// Establish the underlying connection ahead of first use.
    async fn warm_up(&self) -> Result<(), LoginsError>;

    /// Fetch and decrypt a login; `Ok(None)` when no such guid exists.
    async fn get(&self, guid: &str) -> Result<Option<Login>, LoginsError>;

    /// All stored logins, decrypted.
    async fn list(&self) -> Result<Vec<Login>, LoginsError>;

    /// Logins sharing the registrable domain of `origin`, decrypted.
    async fn get_by_base_domain(&self, origin: &str) -> Result<Vec<Login>, LoginsError>;

    /// Persist a new login and return the stored record.
    async fn add(&self, entry: LoginEntry) -> Result<EncryptedLogin, LoginsError>;

    /// Replace the fields of an existing login.
    async fn update(&self, guid: &str, entry: LoginEntry) -> Result<EncryptedLogin, LoginsError>;

    /// Update the matching login if there is one, otherwise add.
    async fn add_or_update(&self, entry: LoginEntry) -> Result<EncryptedLogin, LoginsError>;

    /// Record a use of the login.
    async fn touch(&self, guid: &str) -> Result<(), LoginsError>;

    /// Remove a login; returns whether it existed.
    async fn delete(&self, guid: &str) -> Result<bool, LoginsError>;

    /// Remove every locally stored login.
    async fn wipe_local(&self) -> Result<(), LoginsError>;

    /// Existing login an entry would update, if any.
    async fn find_login_to_update(&self, entry: LoginEntry) -> Result<Option<Login>, LoginsError>;

    /// Decrypt a record previously returned by this storage.
    async fn decrypt_login(&self, login: EncryptedLogin) -> Result<Login, LoginsError>;
}
