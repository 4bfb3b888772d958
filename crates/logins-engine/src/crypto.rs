use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use logins_core::{EncryptedLogin, Login, LoginsError, SecureLoginFields};
use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Generate fresh key material, base64 encoded. Never log the result.
pub fn create_key() -> String {
    let mut bytes = [0u8; KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// AES-256-GCM cipher bound to one key.
///
/// Ciphertexts are `base64url(nonce || ciphertext)` with a random 96-bit nonce.
pub struct EncryptorDecryptor {
    cipher: Aes256Gcm,
}

impl EncryptorDecryptor {
    pub fn new(key: &str) -> Result<Self, LoginsError> {
        let bytes = STANDARD
            .decode(key.trim())
            .map_err(|_| LoginsError::IncorrectKey)?;
        if bytes.len() != KEY_LEN {
            return Err(LoginsError::IncorrectKey);
        }
        let cipher = Aes256Gcm::new_from_slice(&bytes).map_err(|_| LoginsError::IncorrectKey)?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, LoginsError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| LoginsError::engine(format!("encrypt failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Any failure to authenticate the ciphertext is reported as a wrong key.
    pub fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, LoginsError> {
        let raw = URL_SAFE_NO_PAD
            .decode(ciphertext)
            .map_err(|_| LoginsError::IncorrectKey)?;
        if raw.len() < NONCE_LEN {
            return Err(LoginsError::IncorrectKey);
        }
        let (nonce, body) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| LoginsError::IncorrectKey)
    }

    pub fn encrypt_struct<T: Serialize>(&self, value: &T) -> Result<String, LoginsError> {
        let json = serde_json::to_vec(value).map_err(LoginsError::engine)?;
        self.encrypt(&json)
    }

    pub fn decrypt_struct<T: DeserializeOwned>(&self, ciphertext: &str) -> Result<T, LoginsError> {
        let json = self.decrypt(ciphertext)?;
        serde_json::from_slice(&json).map_err(LoginsError::engine)
    }
}

pub fn decrypt_login(login: EncryptedLogin, key: &str) -> Result<Login, LoginsError> {
    let sec: SecureLoginFields = EncryptorDecryptor::new(key)?.decrypt_struct(&login.sec_fields)?;
    Ok(Login::from_parts(login.record, login.fields, sec))
}

pub fn encrypt_login(login: &Login, key: &str) -> Result<EncryptedLogin, LoginsError> {
    let sec_fields = EncryptorDecryptor::new(key)?.encrypt_struct(&login.sec_fields())?;
    Ok(EncryptedLogin {
        record: login.record(),
        fields: login.fields(),
        sec_fields,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use logins_core::{LoginEntry, RecordFields};

    use super::*;

    fn sample_login() -> Login {
        let entry = LoginEntry::for_form(
            "https://example.com",
            "https://example.com",
            "alice",
            "hunter2",
        );
        let now = Utc::now();
        Login::from_parts(
            RecordFields {
                id: "guid-1".into(),
                times_used: 3,
                time_created: now,
                time_last_used: now,
                time_password_changed: now,
            },
            entry.fields(),
            entry.sec_fields(),
        )
    }

    #[test]
    fn encrypt_then_decrypt_is_identity() {
        let key = create_key();
        let login = sample_login();

        let encrypted = encrypt_login(&login, &key).expect("encrypt");
        assert!(!encrypted.sec_fields.contains("hunter2"));

        let decrypted = decrypt_login(encrypted, &key).expect("decrypt");
        assert_eq!(decrypted, login);
    }

    #[test]
    fn decrypting_with_another_key_is_incorrect_key() {
        let encrypted = encrypt_login(&sample_login(), &create_key()).expect("encrypt");
        let err = decrypt_login(encrypted, &create_key()).expect_err("wrong key");
        assert_eq!(err, LoginsError::IncorrectKey);
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(matches!(
            EncryptorDecryptor::new("not base64!"),
            Err(LoginsError::IncorrectKey)
        ));
        assert!(matches!(
            EncryptorDecryptor::new(&STANDARD.encode([0u8; 16])),
            Err(LoginsError::IncorrectKey)
        ));
    }

    #[test]
    fn nonces_are_not_reused() {
        let encdec = EncryptorDecryptor::new(&create_key()).expect("cipher");
        let first = encdec.encrypt(b"same").expect("encrypt");
        let second = encdec.encrypt(b"same").expect("encrypt");
        assert_ne!(first, second);
    }

    #[test]
    fn truncated_ciphertext_is_incorrect_key() {
        let encdec = EncryptorDecryptor::new(&create_key()).expect("cipher");
        let err = encdec.decrypt("AAAA").expect_err("too short");
        assert_eq!(err, LoginsError::IncorrectKey);
    }
}
