use thiserror::Error;

/// Errors surfaced by the logins engine and the storage adapter.
///
/// Every operation either succeeds (absence is `Ok(None)` / `Ok(false)`) or
/// fails with exactly one of these kinds.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoginsError {
    /// The storage connection was used before `initialize` or after `close`.
    #[error("logins storage is not initialized")]
    NotInitialized,
    /// The entry would produce an invalid record.
    #[error("invalid login: {0}")]
    InvalidRecord(#[from] InvalidLogin),
    /// A guid-targeted operation referenced a record that does not exist.
    #[error("no login with guid: {guid}")]
    NoSuchRecord { guid: String },
    /// The key cannot encrypt or decrypt the stored data.
    #[error("encryption key is missing or incorrect")]
    IncorrectKey,
    /// Credentials passed to a sync are stale or invalid.
    #[error("sync auth invalid: {reason}")]
    SyncAuthInvalid { reason: String },
    /// Anything else: I/O, serialization, backend faults.
    #[error("logins engine failure: {reason}")]
    Engine { reason: String },
}

impl LoginsError {
    pub fn engine(reason: impl ToString) -> Self {
        LoginsError::Engine {
            reason: reason.to_string(),
        }
    }

    pub fn no_such_record(guid: impl Into<String>) -> Self {
        LoginsError::NoSuchRecord { guid: guid.into() }
    }
}

/// Reasons a login entry is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidLogin {
    #[error("origin is empty")]
    EmptyOrigin,
    #[error("password is empty")]
    EmptyPassword,
    #[error("login already exists")]
    Duplicate,
    #[error("both form action origin and http realm are set")]
    BothTargets,
    #[error("neither form action origin nor http realm is set")]
    NoTarget,
    #[error("illegal field value: {field}")]
    IllegalFieldValue { field: String },
}
