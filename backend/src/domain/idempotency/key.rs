//! Idempotency key validation and storage key derivation.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum accepted length of a client-supplied idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

const STORAGE_PREFIX: &str = "idmp:";

/// Validation errors for [`IdempotencyKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyKeyValidationError {
    /// The key string was empty.
    EmptyKey,
    /// The key exceeded [`MAX_IDEMPOTENCY_KEY_LEN`] characters.
    TooLong {
        /// Length of the rejected key.
        length: usize,
    },
    /// The key contained whitespace, control or non-ASCII characters.
    InvalidCharacter,
}

impl fmt::Display for IdempotencyKeyValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyKey => write!(f, "idempotency key must not be empty"),
            Self::TooLong { length } => write!(
                f,
                "idempotency key must be at most {MAX_IDEMPOTENCY_KEY_LEN} characters, got {length}"
            ),
            Self::InvalidCharacter => {
                write!(f, "idempotency key must contain only visible ASCII characters")
            }
        }
    }
}

impl std::error::Error for IdempotencyKeyValidationError {}

/// Client-provided idempotency key.
///
/// Clients send this via the `Idempotency-Key` HTTP header to enable safe
/// request retries. The key is opaque; any visible ASCII token up to
/// [`MAX_IDEMPOTENCY_KEY_LEN`] characters is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Validate and construct an [`IdempotencyKey`] from a string.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyKeyValidationError`] when the input is empty,
    /// too long, or contains characters outside the visible ASCII range.
    ///
    /// # Example
    ///
    /// ```
    /// # use clinic_backend::domain::idempotency::IdempotencyKey;
    /// let key = IdempotencyKey::new("booking-42-attempt").expect("valid key");
    /// assert_eq!(key.as_ref(), "booking-42-attempt");
    /// ```
    pub fn new(key: impl AsRef<str>) -> Result<Self, IdempotencyKeyValidationError> {
        Self::from_owned(key.as_ref().to_owned())
    }

    fn from_owned(key: String) -> Result<Self, IdempotencyKeyValidationError> {
        if key.is_empty() {
            return Err(IdempotencyKeyValidationError::EmptyKey);
        }
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(IdempotencyKeyValidationError::TooLong { length: key.len() });
        }
        if !key.bytes().all(|byte| byte.is_ascii_graphic()) {
            return Err(IdempotencyKeyValidationError::InvalidCharacter);
        }
        Ok(Self(key))
    }

    /// Coordination store key under which the response snapshot lives.
    ///
    /// The raw key is hashed so client-controlled text never reaches the
    /// store's key space and the key length stays fixed.
    ///
    /// ```
    /// # use clinic_backend::domain::idempotency::IdempotencyKey;
    /// let key = IdempotencyKey::new("abc").expect("valid key");
    /// assert!(key.storage_key().starts_with("idmp:"));
    /// assert_eq!(key.storage_key().len(), "idmp:".len() + 64);
    /// ```
    pub fn storage_key(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        format!("{STORAGE_PREFIX}{}", hex::encode(digest))
    }
}

impl AsRef<str> for IdempotencyKey {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl From<IdempotencyKey> for String {
    fn from(value: IdempotencyKey) -> Self {
        value.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = IdempotencyKeyValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_owned(value)
    }
}
