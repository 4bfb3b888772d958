use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvalidLogin;

/// Plaintext login supplied by a caller. Has no guid until it is persisted.
///
/// Exactly one of `form_action_origin` (web form submission target) and
/// `http_realm` (HTTP auth realm) must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginEntry {
    pub origin: String,
    pub form_action_origin: Option<String>,
    pub http_realm: Option<String>,
    pub username_field: String,
    pub password_field: String,
    pub username: String,
    pub password: String,
}

impl LoginEntry {
    /// Entry matched against a web form submitting to `form_action_origin`.
    pub fn for_form(
        origin: impl Into<String>,
        form_action_origin: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            form_action_origin: Some(form_action_origin.into()),
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Entry matched against an HTTP auth prompt for `http_realm`.
    pub fn for_realm(
        origin: impl Into<String>,
        http_realm: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            http_realm: Some(http_realm.into()),
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Structural validation applied before anything is written.
    pub fn validate(&self) -> Result<(), InvalidLogin> {
        if self.origin.trim().is_empty() {
            return Err(InvalidLogin::EmptyOrigin);
        }
        if self.password.trim().is_empty() {
            return Err(InvalidLogin::EmptyPassword);
        }
        match (&self.form_action_origin, &self.http_realm) {
            (Some(_), Some(_)) => return Err(InvalidLogin::BothTargets),
            (None, None) => return Err(InvalidLogin::NoTarget),
            _ => {}
        }

        let fields = [
            ("origin", Some(&self.origin)),
            ("form_action_origin", self.form_action_origin.as_ref()),
            ("http_realm", self.http_realm.as_ref()),
            ("username_field", Some(&self.username_field)),
            ("password_field", Some(&self.password_field)),
            ("username", Some(&self.username)),
            ("password", Some(&self.password)),
        ];
        for (name, value) in fields {
            if value.is_some_and(|v| v.contains('\0')) {
                return Err(InvalidLogin::IllegalFieldValue {
                    field: name.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn fields(&self) -> LoginFields {
        LoginFields {
            origin: self.origin.clone(),
            form_action_origin: self.form_action_origin.clone(),
            http_realm: self.http_realm.clone(),
            username_field: self.username_field.clone(),
            password_field: self.password_field.clone(),
        }
    }

    pub fn sec_fields(&self) -> SecureLoginFields {
        SecureLoginFields {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// Non-secret part of a stored login.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginFields {
    pub origin: String,
    pub form_action_origin: Option<String>,
    pub http_realm: Option<String>,
    pub username_field: String,
    pub password_field: String,
}

/// The part of a login that is encrypted at rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecureLoginFields {
    pub username: String,
    pub password: String,
}

/// Identity and usage metadata of a persisted login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordFields {
    pub id: String,
    pub times_used: u64,
    pub time_created: DateTime<Utc>,
    pub time_last_used: DateTime<Utc>,
    pub time_password_changed: DateTime<Utc>,
}

/// A login as persisted by the engine: secure fields are ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedLogin {
    pub record: RecordFields,
    pub fields: LoginFields,
    pub sec_fields: String,
}

impl EncryptedLogin {
    pub fn guid(&self) -> &str {
        &self.record.id
    }
}

/// Decrypted, caller-visible view of a login. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Login {
    pub guid: String,
    pub origin: String,
    pub form_action_origin: Option<String>,
    pub http_realm: Option<String>,
    pub username_field: String,
    pub password_field: String,
    pub username: String,
    pub password: String,
    pub times_used: u64,
    pub time_created: DateTime<Utc>,
    pub time_last_used: DateTime<Utc>,
    pub time_password_changed: DateTime<Utc>,
}

impl Login {
    pub fn from_parts(record: RecordFields, fields: LoginFields, sec: SecureLoginFields) -> Self {
        Self {
            guid: record.id,
            origin: fields.origin,
            form_action_origin: fields.form_action_origin,
            http_realm: fields.http_realm,
            username_field: fields.username_field,
            password_field: fields.password_field,
            username: sec.username,
            password: sec.password,
            times_used: record.times_used,
            time_created: record.time_created,
            time_last_used: record.time_last_used,
            time_password_changed: record.time_password_changed,
        }
    }

    /// Plaintext fields as an entry, e.g. to feed back into `update`.
    pub fn to_entry(&self) -> LoginEntry {
        LoginEntry {
            origin: self.origin.clone(),
            form_action_origin: self.form_action_origin.clone(),
            http_realm: self.http_realm.clone(),
            username_field: self.username_field.clone(),
            password_field: self.password_field.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    pub fn record(&self) -> RecordFields {
        RecordFields {
            id: self.guid.clone(),
            times_used: self.times_used,
            time_created: self.time_created,
            time_last_used: self.time_last_used,
            time_password_changed: self.time_password_changed,
        }
    }

    pub fn fields(&self) -> LoginFields {
        self.to_entry().fields()
    }

    pub fn sec_fields(&self) -> SecureLoginFields {
        SecureLoginFields {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}
