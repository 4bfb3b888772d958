//! File-backed logins engine. Secure fields are encrypted per record with
//! AES-256-GCM under a caller-supplied key; the database itself is a JSON
//! document replaced atomically on every write.

pub mod crypto;
pub mod db;
pub mod domain;

pub use crypto::{create_key, decrypt_login, encrypt_login, EncryptorDecryptor};
pub use db::DatabaseLoginsStorage;
