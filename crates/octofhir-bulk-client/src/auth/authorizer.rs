//! Client-credentials token exchange.
//!
//! The authorizer signs a client assertion for the configured client and
//! posts it to the token endpoint:
//!
//! ```text
//! POST {token_endpoint}
//! Content-Type: application/x-www-form-urlencoded
//!
//! scope=system/*.read
//! &grant_type=client_credentials
//! &client_assertion_type=urn:ietf:params:oauth:client-assertion-type:jwt-bearer
//! &client_assertion={jwt}
//! ```
//!
//! A JSON body with a non-empty `access_token` is success; anything else is
//! [`BulkError::Authorization`] carrying the endpoint's status.

use std::sync::Arc;

use super::assertion::{AssertionSigner, CLIENT_ASSERTION_TYPE, ClientAssertionClaims, JwtAssertionSigner};
use super::AccessToken;
use crate::config::ClientConfig;
use crate::error::BulkError;
use crate::http::{HttpMethod, RequestDescriptor, ResponseDescriptor, Transport};
use crate::log::{ExchangeLog, TracingExchangeLog};

/// Scope requested for bulk export.
pub const BACKEND_SERVICES_SCOPE: &str = "system/*.read";

/// Exchanges signed client assertions for access tokens.
#[derive(Clone)]
pub struct Authorizer {
    transport: Arc<dyn Transport>,
    signer: Arc<dyn AssertionSigner>,
    log: Arc<dyn ExchangeLog>,
}

impl Authorizer {
    /// Creates an authorizer signing with [`JwtAssertionSigner`] and logging
    /// through `tracing`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            signer: Arc::new(JwtAssertionSigner::new()),
            log: Arc::new(TracingExchangeLog),
        }
    }

    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn AssertionSigner>) -> Self {
        self.signer = signer;
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: Arc<dyn ExchangeLog>) -> Self {
        self.log = log;
        self
    }

    /// Builds the token request for `config`, signing a fresh assertion.
    ///
    /// # Errors
    ///
    /// Returns an error if the config has no private key or signing fails.
    pub fn token_request(&self, config: &ClientConfig) -> Result<RequestDescriptor, BulkError> {
        let key = config.private_key.as_ref().ok_or_else(|| {
            BulkError::config("a private key is required to request an access token")
        })?;

        let claims = ClientAssertionClaims::new(&config.client_id, &config.token_endpoint);
        let assertion = self.signer.sign(claims.into_map(), key)?;

        Ok(RequestDescriptor::new(HttpMethod::Post, &config.token_endpoint)
            .with_header("accept", "application/json")
            .with_form([
                ("scope", BACKEND_SERVICES_SCOPE),
                ("grant_type", "client_credentials"),
                ("client_assertion_type", CLIENT_ASSERTION_TYPE),
                ("client_assertion", assertion.as_str()),
            ])
            .with_strict_ssl(config.strict_ssl))
    }

    /// Obtains an access token for `config`.
    ///
    /// # Errors
    ///
    /// - [`BulkError::Authorization`] if the endpoint returns no token
    /// - [`BulkError::Transport`] if the endpoint cannot be reached
    /// - [`BulkError::Signing`] / [`BulkError::Config`] if no assertion can be built
    pub async fn authorize(&self, config: &ClientConfig) -> Result<AccessToken, BulkError> {
        let request = self.token_request(config)?;
        self.log.log_request(&request, "Token Request");

        let response = self.transport.send(&request).await?;
        self.log.log_response(&response, "Token Response");

        match access_token(&response) {
            Some(token) => {
                tracing::debug!(client_id = %config.client_id, "Access token obtained");
                Ok(AccessToken::new(token))
            }
            None => Err(BulkError::authorization(
                response.status,
                response.status_text.clone(),
            )),
        }
    }
}

fn access_token(response: &ResponseDescriptor) -> Option<&str> {
    response
        .json()?
        .get("access_token")?
        .as_str()
        .filter(|token| !token.is_empty())
}
