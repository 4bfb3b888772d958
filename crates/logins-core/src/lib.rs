//! Core contracts for logins storage: the login data model, the error
//! taxonomy, and the traits implemented by engines, adapters and preference
//! stores. Kept free of crypto and I/O dependencies.

pub mod engine;
pub mod error;
pub mod login;
pub mod prefs;
pub mod storage;
pub mod sync;

pub use error::{InvalidLogin, LoginsError};
pub use login::{EncryptedLogin, Login, LoginEntry, LoginFields, RecordFields, SecureLoginFields};
