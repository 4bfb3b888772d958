use std::fmt;

use logins_core::{prefs::Preferences, EncryptedLogin, Login, LoginsError};
use logins_engine::{create_key, decrypt_login, EncryptorDecryptor};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Secure preference holding the encoded key material.
pub const KEY_PREF: &str = "passwords-key";
/// Plain preference holding a known phrase encrypted with the key.
pub const CANARY_PREF: &str = "canary-phrase";

const CANARY_PHRASE: &str = "a string for checking validity of the key";

/// Why a stored key could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryReason {
    /// The canary exists but the key is gone (e.g. keychain reset).
    Lost,
    /// The key does not decrypt the canary, or the canary is missing.
    Corrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGenerationReason {
    /// First use: nothing was stored yet.
    New,
    /// Replaced an unusable key; data encrypted with the old one is unreadable.
    RecoveryNeeded(RecoveryReason),
}

/// Key material plus whether this call had to create it.
#[derive(Clone, PartialEq, Eq)]
pub struct ManagedKey {
    pub key: String,
    pub was_generated: Option<KeyGenerationReason>,
}

impl ManagedKey {
    pub fn needs_recovery(&self) -> bool {
        matches!(
            self.was_generated,
            Some(KeyGenerationReason::RecoveryNeeded(_))
        )
    }
}

impl fmt::Debug for ManagedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedKey")
            .field("key", &"<redacted>")
            .field("was_generated", &self.was_generated)
            .finish()
    }
}

/// Resolves the logins encryption key, generating and persisting it on
/// first use. The resolved key is cached for the lifetime of this value.
pub struct LoginsCrypto {
    secure: Box<dyn Preferences>,
    plain: Box<dyn Preferences>,
    cached: Mutex<Option<String>>,
}

impl LoginsCrypto {
    /// `secure` stores the key itself; `plain` stores the canary used to
    /// detect a lost or corrupted key.
    pub fn new(secure: impl Preferences + 'static, plain: impl Preferences + 'static) -> Self {
        Self {
            secure: Box::new(secure),
            plain: Box::new(plain),
            cached: Mutex::new(None),
        }
    }

    /// Cached key, or the stored one, or a freshly generated one.
    ///
    /// Serialized by a single async lock: concurrent first callers all
    /// observe the same key, and only the call that generated it reports
    /// `was_generated`.
    #[instrument(skip_all)]
    pub async fn get_or_generate_key(&self) -> Result<ManagedKey, LoginsError> {
        let mut cached = self.cached.lock().await;
        if let Some(key) = cached.as_ref() {
            return Ok(ManagedKey {
                key: key.clone(),
                was_generated: None,
            });
        }

        let managed = self.load_or_generate().await?;
        *cached = Some(managed.key.clone());
        Ok(managed)
    }

    pub fn decrypt_login(
        &self,
        login: EncryptedLogin,
        key: &ManagedKey,
    ) -> Result<Login, LoginsError> {
        decrypt_login(login, &key.key)
    }

    async fn load_or_generate(&self) -> Result<ManagedKey, LoginsError> {
        let stored_key = self.secure.get_string(KEY_PREF).await?;
        let canary = self.plain.get_string(CANARY_PREF).await?;

        let reason = match (stored_key, canary) {
            (Some(key), Some(canary)) => {
                if canary_matches(&key, &canary) {
                    return Ok(ManagedKey {
                        key,
                        was_generated: None,
                    });
                }
                KeyGenerationReason::RecoveryNeeded(RecoveryReason::Corrupt)
            }
            (Some(_), None) => KeyGenerationReason::RecoveryNeeded(RecoveryReason::Corrupt),
            (None, Some(_)) => KeyGenerationReason::RecoveryNeeded(RecoveryReason::Lost),
            (None, None) => KeyGenerationReason::New,
        };
        self.generate(reason).await
    }

    async fn generate(&self, reason: KeyGenerationReason) -> Result<ManagedKey, LoginsError> {
        let key = create_key();
        let canary = EncryptorDecryptor::new(&key)?.encrypt(CANARY_PHRASE.as_bytes())?;

        self.secure.put_string(KEY_PREF, &key).await?;
        self.plain.put_string(CANARY_PREF, &canary).await?;

        match reason {
            KeyGenerationReason::New => info!("generated new logins key"),
            KeyGenerationReason::RecoveryNeeded(why) => {
                warn!(?why, "stored logins key unusable, generated a replacement")
            }
        }
        Ok(ManagedKey {
            key,
            was_generated: Some(reason),
        })
    }
}

fn canary_matches(key: &str, canary: &str) -> bool {
    EncryptorDecryptor::new(key)
        .and_then(|encdec| encdec.decrypt(canary))
        .is_ok_and(|plain| plain == CANARY_PHRASE.as_bytes())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use logins_core::prefs::InMemoryPreferences;

    use super::*;

    fn crypto_with(secure: &InMemoryPreferences, plain: &InMemoryPreferences) -> LoginsCrypto {
        LoginsCrypto::new(secure.clone(), plain.clone())
    }

    #[tokio::test]
    async fn first_key_is_new_then_cached() {
        let crypto = LoginsCrypto::new(InMemoryPreferences::new(), InMemoryPreferences::new());
        let first = crypto.get_or_generate_key().await.expect("key");
        assert_eq!(first.was_generated, Some(KeyGenerationReason::New));

        let second = crypto.get_or_generate_key().await.expect("key");
        assert_eq!(second.key, first.key);
        assert_eq!(second.was_generated, None);
    }

    #[tokio::test]
    async fn stored_key_is_reused_by_a_new_instance() {
        let (secure, plain) = (InMemoryPreferences::new(), InMemoryPreferences::new());
        let first = crypto_with(&secure, &plain)
            .get_or_generate_key()
            .await
            .expect("key");

        let again = crypto_with(&secure, &plain)
            .get_or_generate_key()
            .await
            .expect("key");
        assert_eq!(again.key, first.key);
        assert_eq!(again.was_generated, None);
    }

    #[tokio::test]
    async fn missing_key_with_canary_is_lost() {
        let (secure, plain) = (InMemoryPreferences::new(), InMemoryPreferences::new());
        let first = crypto_with(&secure, &plain)
            .get_or_generate_key()
            .await
            .expect("key");
        secure.remove(KEY_PREF).await.expect("remove");

        let replaced = crypto_with(&secure, &plain)
            .get_or_generate_key()
            .await
            .expect("key");
        assert_ne!(replaced.key, first.key);
        assert_eq!(
            replaced.was_generated,
            Some(KeyGenerationReason::RecoveryNeeded(RecoveryReason::Lost))
        );
        assert!(replaced.needs_recovery());
    }

    #[tokio::test]
    async fn mismatched_canary_is_corrupt() {
        let (secure, plain) = (InMemoryPreferences::new(), InMemoryPreferences::new());
        crypto_with(&secure, &plain)
            .get_or_generate_key()
            .await
            .expect("key");
        secure
            .put_string(KEY_PREF, &create_key())
            .await
            .expect("overwrite key");

        let replaced = crypto_with(&secure, &plain)
            .get_or_generate_key()
            .await
            .expect("key");
        assert_eq!(
            replaced.was_generated,
            Some(KeyGenerationReason::RecoveryNeeded(RecoveryReason::Corrupt))
        );
    }

    #[tokio::test]
    async fn key_without_canary_is_corrupt() {
        let (secure, plain) = (InMemoryPreferences::new(), InMemoryPreferences::new());
        secure
            .put_string(KEY_PREF, &create_key())
            .await
            .expect("seed key");

        let managed = crypto_with(&secure, &plain)
            .get_or_generate_key()
            .await
            .expect("key");
        assert_eq!(
            managed.was_generated,
            Some(KeyGenerationReason::RecoveryNeeded(RecoveryReason::Corrupt))
        );
        assert!(plain.get_string(CANARY_PREF).await.expect("get").is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_callers_share_one_key() {
        let secure = InMemoryPreferences::new();
        let crypto = Arc::new(crypto_with(&secure, &InMemoryPreferences::new()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let crypto = crypto.clone();
                tokio::spawn(async move { crypto.get_or_generate_key().await })
            })
            .collect();

        let mut keys = Vec::new();
        for handle in handles {
            keys.push(handle.await.expect("join").expect("key"));
        }

        let generated = keys.iter().filter(|k| k.was_generated.is_some()).count();
        assert_eq!(generated, 1);
        assert!(keys.iter().all(|k| k.key == keys[0].key));
        assert_eq!(
            secure.get_string(KEY_PREF).await.expect("get"),
            Some(keys[0].key.clone())
        );
    }

    #[test]
    fn debug_output_redacts_key() {
        let managed = ManagedKey {
            key: "very-secret".into(),
            was_generated: None,
        };
        assert!(!format!("{managed:?}").contains("very-secret"));
    }
}
