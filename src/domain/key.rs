//! Idempotency key derivation.
//!
//! Composite keys are `hex(SHA-256(domain || len-prefixed identity fields))`
//! truncated to the configured length. They depend on the identity triple only,
//! so amounts, currencies and metadata recomputed between attempts can never
//! change the key.

use super::operation::OperationIdentity;
use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Domain separator mixed into every composite key.
pub const KEY_DOMAIN: &str = "bulkpay:idempotency:v1";

/// Hex length of a full SHA-256 digest.
pub const MAX_KEY_LENGTH: usize = 64;
pub const MIN_KEY_LENGTH: usize = 16;
pub const DEFAULT_KEY_LENGTH: usize = 32;

/// Opaque token the ledger uses to collapse repeated requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Wraps a key obtained elsewhere (e.g. persisted by the caller).
    pub fn from_raw(raw: impl Into<String>) -> Result<Self, LedgerError> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > 255 || !raw.is_ascii() {
            return Err(LedgerError::ValidationError(format!(
                "Idempotency key must be 1..=255 ASCII characters, got {} bytes",
                raw.len()
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = LedgerError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::from_raw(raw)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key generation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    /// Deterministic function of the identity. Retry-safe on its own.
    #[default]
    Composite,
    /// Fresh UUID per call. Only safe if the caller stores the key and
    /// replays it on every retry.
    Random,
}

/// A key plus whether it protects against replays by itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedKey {
    pub key: IdempotencyKey,
    pub replay_protected: bool,
}

/// Derives the composite key for an identity.
///
/// `length` is clamped to `MIN_KEY_LENGTH..=MAX_KEY_LENGTH`.
pub fn derive(identity: &OperationIdentity, length: usize) -> IdempotencyKey {
    let mut hasher = Sha256::new();
    hasher.update(KEY_DOMAIN.as_bytes());
    for field in [
        identity.actor_id.as_bytes(),
        identity.subject_id.as_bytes(),
        identity.action.as_str().as_bytes(),
    ] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field);
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(length.clamp(MIN_KEY_LENGTH, MAX_KEY_LENGTH));
    IdempotencyKey(digest)
}

/// Issues keys according to a [`KeyMode`].
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    mode: KeyMode,
    length: usize,
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self::composite(DEFAULT_KEY_LENGTH)
    }
}

impl KeyDeriver {
    pub fn new(mode: KeyMode, length: usize) -> Result<Self, LedgerError> {
        if !(MIN_KEY_LENGTH..=MAX_KEY_LENGTH).contains(&length) {
            return Err(LedgerError::ConfigError(format!(
                "key length must be within {MIN_KEY_LENGTH}..={MAX_KEY_LENGTH}, got {length}"
            )));
        }
        Ok(Self { mode, length })
    }

    pub fn composite(length: usize) -> Self {
        Self {
            mode: KeyMode::Composite,
            length: length.clamp(MIN_KEY_LENGTH, MAX_KEY_LENGTH),
        }
    }

    pub fn issue(&self, identity: &OperationIdentity) -> IssuedKey {
        match self.mode {
            KeyMode::Composite => IssuedKey {
                key: derive(identity, self.length),
                replay_protected: true,
            },
            KeyMode::Random => {
                tracing::warn!(
                    actor_id = %identity.actor_id,
                    subject_id = %identity.subject_id,
                    action = %identity.action,
                    "Issuing random idempotency key; retries are only safe if the caller replays it"
                );
                IssuedKey {
                    key: IdempotencyKey(uuid::Uuid::new_v4().simple().to_string()),
                    replay_protected: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::operation::ActionKind;

    fn identity(actor: &str, subject: &str, action: ActionKind) -> OperationIdentity {
        OperationIdentity::new(actor, subject, action).unwrap()
    }

    #[test]
    fn test_composite_key_is_deterministic() {
        let id = identity("agency_042", "booking_7891", ActionKind::CreatePayment);
        let first = derive(&id, DEFAULT_KEY_LENGTH);
        for _ in 0..10 {
            assert_eq!(derive(&id, DEFAULT_KEY_LENGTH), first);
        }
        assert_eq!(first.as_str().len(), DEFAULT_KEY_LENGTH);
        assert!(first.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_distinct_identities_get_distinct_keys() {
        let a = derive(
            &identity("agency_042", "booking_7891", ActionKind::CreatePayment),
            DEFAULT_KEY_LENGTH,
        );
        let b = derive(
            &identity("agency_042", "booking_7892", ActionKind::CreatePayment),
            DEFAULT_KEY_LENGTH,
        );
        let c = derive(
            &identity("agency_042", "booking_7891", ActionKind::Refund),
            DEFAULT_KEY_LENGTH,
        );
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        // "a:b" + "c" must not collide with "a" + "b:c".
        let left = derive(&identity("a:b", "c", ActionKind::Refund), MAX_KEY_LENGTH);
        let right = derive(&identity("a", "b:c", ActionKind::Refund), MAX_KEY_LENGTH);
        assert_ne!(left, right);
    }

    #[test]
    fn test_length_is_clamped() {
        let id = identity("m", "o", ActionKind::Refund);
        assert_eq!(derive(&id, 4).as_str().len(), MIN_KEY_LENGTH);
        assert_eq!(derive(&id, 500).as_str().len(), MAX_KEY_LENGTH);
        assert!(KeyDeriver::new(KeyMode::Composite, 8).is_err());
    }

    #[test]
    fn test_random_mode_is_flagged_unprotected() {
        let deriver = KeyDeriver::new(KeyMode::Random, DEFAULT_KEY_LENGTH).unwrap();
        let id = identity("agency_042", "booking_7891", ActionKind::CreatePayment);
        let first = deriver.issue(&id);
        let second = deriver.issue(&id);
        assert!(!first.replay_protected);
        assert_ne!(first.key, second.key);

        let composite = KeyDeriver::default().issue(&id);
        assert!(composite.replay_protected);
        assert_eq!(composite.key, KeyDeriver::default().issue(&id).key);
    }

    #[test]
    fn test_from_raw_validation() {
        assert!(IdempotencyKey::from_raw("").is_err());
        assert!(IdempotencyKey::from_raw("x".repeat(256)).is_err());
        assert!(IdempotencyKey::from_raw("order-1-refund").is_ok());
    }

    #[test]
    fn test_deserialization_validates_like_from_raw() {
        let key: IdempotencyKey = serde_json::from_str("\"order-1-refund\"").unwrap();
        assert_eq!(key.as_str(), "order-1-refund");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"order-1-refund\"");

        assert!(serde_json::from_str::<IdempotencyKey>("\"\"").is_err());
        assert!(serde_json::from_str::<IdempotencyKey>("\"clé\"").is_err());
        let too_long = format!("\"{}\"", "x".repeat(256));
        assert!(serde_json::from_str::<IdempotencyKey>(&too_long).is_err());
    }
}
