//! Client identity used to key admission control.

use std::fmt;

use thiserror::Error;

/// Validation errors for [`ClientIdentity`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientIdentityValidationError {
    /// The identity was empty.
    #[error("client identity must not be empty")]
    Empty,
    /// The identity contained whitespace or control characters.
    #[error("client identity must not contain whitespace or control characters")]
    InvalidCharacter,
}

/// Identity a request is metered against.
///
/// The HTTP layer derives it from the peer address unless an upstream
/// collaborator (for example an authentication middleware) inserts a richer
/// identity into the request extensions first.
///
/// ```
/// # use clinic_backend::domain::ClientIdentity;
/// let identity = ClientIdentity::new("patient:1234").expect("valid identity");
/// assert_eq!(identity.as_str(), "patient:1234");
/// assert!(ClientIdentity::new("two words").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Identity used when neither an extension nor a peer address exists.
    pub const UNKNOWN: &'static str = "unknown";

    /// Validate and construct an identity.
    pub fn new(value: impl Into<String>) -> Result<Self, ClientIdentityValidationError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ClientIdentityValidationError::Empty);
        }
        if value
            .chars()
            .any(|ch| ch.is_whitespace() || ch.is_control())
        {
            return Err(ClientIdentityValidationError::InvalidCharacter);
        }
        Ok(Self(value))
    }

    /// Fallback identity shared by every unidentifiable client.
    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_owned())
    }

    /// Borrow the identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", ClientIdentityValidationError::Empty)]
    #[case("a b", ClientIdentityValidationError::InvalidCharacter)]
    #[case("line\nbreak", ClientIdentityValidationError::InvalidCharacter)]
    fn rejects_invalid_identities(
        #[case] input: &str,
        #[case] expected: ClientIdentityValidationError,
    ) {
        assert_eq!(ClientIdentity::new(input), Err(expected));
    }

    #[rstest]
    #[case("203.0.113.9")]
    #[case("2001:db8::1")]
    #[case("user:7f1c")]
    fn accepts_addresses_and_tokens(#[case] input: &str) {
        let identity = ClientIdentity::new(input).expect("valid identity");
        assert_eq!(identity.to_string(), input);
    }
}
