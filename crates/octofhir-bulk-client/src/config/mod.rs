//! Client configuration.
//!
//! [`ClientConfig`] is the immutable per-session configuration shared by the
//! authorizer and the orchestrator. [`ExportOptions`] tunes polling. Both can
//! be built in code or loaded from a settings file with [`loader`].

pub mod loader;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::PrivateKey;
use crate::error::BulkError;

pub use loader::{BulkSettings, load_settings};

/// Immutable configuration of one client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// OAuth2 token endpoint URL.
    pub token_endpoint: String,
    /// Registered client identifier.
    pub client_id: String,
    /// Key used to sign client assertions. Required when `requires_auth`.
    pub private_key: Option<PrivateKey>,
    /// Reject invalid TLS certificates.
    pub strict_ssl: bool,
    /// Whether export requests carry a bearer token.
    pub requires_auth: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token_endpoint: String::new(),
            client_id: String::new(),
            private_key: None,
            strict_ssl: true,
            requires_auth: false,
        }
    }
}

impl ClientConfig {
    /// Configuration for a server that needs no authorization.
    #[must_use]
    pub fn open() -> Self {
        Self::default()
    }

    /// Configuration for SMART Backend Services authorization.
    #[must_use]
    pub fn backend_services(
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        private_key: PrivateKey,
    ) -> Self {
        Self {
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            private_key: Some(private_key),
            strict_ssl: true,
            requires_auth: true,
        }
    }

    #[must_use]
    pub fn with_strict_ssl(mut self, strict_ssl: bool) -> Self {
        self.strict_ssl = strict_ssl;
        self
    }

    #[must_use]
    pub fn with_requires_auth(mut self, requires_auth: bool) -> Self {
        self.requires_auth = requires_auth;
        self
    }

    /// Checks that everything needed for authorization is present.
    ///
    /// # Errors
    ///
    /// Returns [`BulkError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<(), BulkError> {
        if !self.requires_auth {
            return Ok(());
        }
        if self.token_endpoint.trim().is_empty() {
            return Err(BulkError::config(
                "token_endpoint is required when authorization is enabled",
            ));
        }
        if url::Url::parse(&self.token_endpoint).is_err() {
            return Err(BulkError::config(format!(
                "token_endpoint is not a valid URL: {}",
                self.token_endpoint
            )));
        }
        if self.client_id.trim().is_empty() {
            return Err(BulkError::config(
                "client_id is required when authorization is enabled",
            ));
        }
        if self.private_key.is_none() {
            return Err(BulkError::config(
                "private_key is required when authorization is enabled",
            ));
        }
        Ok(())
    }
}

/// Polling behaviour of the export orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Pause between status requests while the server answers 202.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Upper bound on status requests per wait. `None` polls until the
    /// server answers with something other than 202.
    pub max_poll_attempts: Option<u32>,
}

/// Default pause between status requests.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: None,
        }
    }
}

impl ExportOptions {
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn with_max_poll_attempts(mut self, attempts: u32) -> Self {
        self.max_poll_attempts = Some(attempts);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SigningAlgorithm;

    fn key() -> PrivateKey {
        PrivateKey::from_pem(SigningAlgorithm::ES384, None, "pem")
    }

    #[test]
    fn test_open_config_is_valid() {
        let config = ClientConfig::open();
        assert!(!config.requires_auth);
        assert!(config.strict_ssl);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_services_validation() {
        let config =
            ClientConfig::backend_services("https://auth.example.com/token", "client-1", key());
        assert!(config.validate().is_ok());

        let mut missing_client = config.clone();
        missing_client.client_id = String::new();
        assert!(missing_client.validate().unwrap_err().to_string().contains("client_id"));

        let mut bad_url = config.clone();
        bad_url.token_endpoint = "not a url".into();
        assert!(bad_url.validate().is_err());

        let mut no_key = config;
        no_key.private_key = None;
        assert!(matches!(no_key.validate(), Err(BulkError::Config { .. })));
    }

    #[test]
    fn test_export_options_defaults() {
        let options = ExportOptions::default();
        assert_eq!(options.poll_interval, Duration::from_secs(5));
        assert_eq!(options.max_poll_attempts, None);

        let options: ExportOptions =
            serde_json::from_str(r#"{"poll_interval": "250ms", "max_poll_attempts": 3}"#).unwrap();
        assert_eq!(options.poll_interval, Duration::from_millis(250));
        assert_eq!(options.max_poll_attempts, Some(3));
    }
}
