//! Asynchronous logins storage adapter.
//!
//! Wraps a [`logins_core::engine::LoginsEngine`] behind a lock-guarded
//! connection, resolves the encryption key from preference stores (OS
//! keyring in production, memory in tests), and runs every operation on a
//! dedicated worker thread.

pub mod connection;
pub mod crypto;
pub mod prefs;
pub mod syncable;
pub mod worker;

pub use connection::LoginStorageConnection;
pub use crypto::{KeyGenerationReason, LoginsCrypto, ManagedKey, RecoveryReason};
pub use prefs::{FilePreferences, KeyringPreferences};
pub use syncable::SyncableLoginsStorage;

/// File name of the logins database inside the data directory.
pub const DB_NAME: &str = "logins2.json";

/// File name (without extension) of the plain preferences file.
pub const PREFS_NAME: &str = "logins";
