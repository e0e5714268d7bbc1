//! Error types for the bulk export client.
//!
//! Every failure the client can surface is a [`BulkError`]. The kinds map to
//! where the failure originated:
//!
//! - [`BulkError::Transport`] - connection-level problems (DNS, TLS, timeout).
//!   HTTP error status codes are *not* transport errors.
//! - [`BulkError::Authorization`] - the token endpoint did not issue a token.
//! - [`BulkError::ProtocolPrecondition`] - an operation was invoked out of order.
//! - [`BulkError::Assertion`] - a conformance expectation did not hold.

use crate::auth::SigningError;
use crate::expect::AssertionFailure;
use crate::http::TransportError;

/// Errors that can occur while driving a bulk export.
#[derive(Debug, thiserror::Error)]
pub enum BulkError {
    /// The HTTP request could not be completed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The token endpoint did not return an access token.
    #[error("Authorization failed: token endpoint answered {status}{}", fmt_status_text(.status_text))]
    Authorization {
        /// Status code returned by the token endpoint.
        status: u16,
        /// Status text returned by the token endpoint, if any.
        status_text: Option<String>,
    },

    /// An operation was called before the session reached the required state.
    #[error("Protocol precondition failed: {message}")]
    ProtocolPrecondition {
        /// What was missing.
        message: String,
    },

    /// A conformance expectation was violated.
    #[error(transparent)]
    Assertion(#[from] AssertionFailure),

    /// The client assertion could not be signed.
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// The merged request options do not describe a valid request.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of the problem.
        message: String,
    },

    /// The completion manifest has no output file at the requested index.
    #[error("Export manifest has no output at index {index} ({available} file(s) listed)")]
    MissingOutput {
        /// Requested index.
        index: usize,
        /// Number of files listed in the manifest.
        available: usize,
    },

    /// Polling stopped because the configured attempt limit was reached.
    #[error("Export still in progress after {attempts} status request(s)")]
    PollLimitExceeded {
        /// Number of status requests issued.
        attempts: u32,
    },

    /// The client configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },
}

fn fmt_status_text(text: &Option<String>) -> String {
    text.as_deref()
        .map(|t| format!(" {t}"))
        .unwrap_or_default()
}

impl BulkError {
    /// Creates a new `Authorization` error.
    #[must_use]
    pub fn authorization(status: u16, status_text: Option<String>) -> Self {
        Self::Authorization {
            status,
            status_text,
        }
    }

    /// Creates a new `ProtocolPrecondition` error.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::ProtocolPrecondition {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns `true` if the operation was invoked out of order.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::ProtocolPrecondition { .. })
    }

    /// Returns `true` if this failure came from the network layer.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
