//! SMART Backend Services authorization.
//!
//! - [`key`] - private key descriptors and signing algorithms
//! - [`assertion`] - signed JWT client assertions
//! - [`authorizer`] - the client-credentials token exchange

pub mod assertion;
pub mod authorizer;
pub mod key;

use std::fmt;

pub use assertion::{
    ASSERTION_LIFETIME_SECONDS, AssertionSigner, CLIENT_ASSERTION_TYPE, ClientAssertionClaims,
    JwtAssertionSigner, SigningOptions, create_client_assertion, generate_jti,
};
pub use authorizer::{Authorizer, BACKEND_SERVICES_SCOPE};
pub use key::{KeyMaterial, KeyType, PrivateJwk, PrivateKey, SigningAlgorithm, SigningError};

/// Opaque bearer token issued by the token endpoint.
///
/// Cached for the lifetime of one export session and never refreshed.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `authorization` header value for this token.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_token_bearer_and_redaction() {
        let token = AccessToken::new("secret-token");
        assert_eq!(token.bearer(), "Bearer secret-token");
        assert_eq!(token.as_str(), "secret-token");
        assert!(!format!("{token:?}").contains("secret"));
    }
}
