//! Export session state.
//!
//! An [`ExportSession`] holds the last kick-off, status and cancel exchanges
//! plus the cached access token of one orchestrator. The protocol state
//! ([`ExportState`]) is derived from those exchanges rather than stored, so
//! it can never disagree with what was actually sent.

use std::fmt;

use crate::auth::AccessToken;
use crate::error::BulkError;
use crate::http::{RequestDescriptor, ResponseDescriptor};

/// A request together with the response it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub request: RequestDescriptor,
    pub response: ResponseDescriptor,
}

impl Exchange {
    #[must_use]
    pub fn new(request: RequestDescriptor, response: ResponseDescriptor) -> Self {
        Self { request, response }
    }
}

/// Where the export protocol currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportState {
    /// Nothing sent yet.
    Idle,
    /// A kick-off response exists, no status request was made.
    KickedOff,
    /// The last status response said "still processing".
    Polling,
    /// The last status response was a 2xx other than 202.
    Completed,
    /// The kick-off or the last status response was an error.
    Failed,
    /// A cancel request was sent.
    Cancelled,
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::KickedOff => "kicked-off",
            Self::Polling => "polling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// URL and credentials for requests addressed to a running export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTarget {
    /// Status URL from the kick-off `content-location` header.
    pub location: String,
    /// `authorization` header sent with the kick-off, if any.
    pub authorization: Option<String>,
}

/// Session state of one export orchestrator.
#[derive(Debug, Clone, Default)]
pub struct ExportSession {
    kick_off: Option<Exchange>,
    status: Option<Exchange>,
    cancel: Option<Exchange>,
    access_token: Option<AccessToken>,
}

impl ExportSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn kick_off(&self) -> Option<&Exchange> {
        self.kick_off.as_ref()
    }

    #[must_use]
    pub fn status(&self) -> Option<&Exchange> {
        self.status.as_ref()
    }

    #[must_use]
    pub fn cancel(&self) -> Option<&Exchange> {
        self.cancel.as_ref()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&AccessToken> {
        self.access_token.as_ref()
    }

    pub fn set_access_token(&mut self, token: AccessToken) {
        self.access_token = Some(token);
    }

    /// Records a kick-off. Status and cancel exchanges of a previous export
    /// are discarded; the access token is kept.
    pub fn record_kick_off(&mut self, exchange: Exchange) -> &Exchange {
        self.status = None;
        self.cancel = None;
        self.kick_off.insert(exchange)
    }

    pub fn record_status(&mut self, exchange: Exchange) -> &Exchange {
        self.status.insert(exchange)
    }

    pub fn record_cancel(&mut self, exchange: Exchange) -> &Exchange {
        self.cancel.insert(exchange)
    }

    /// Derives the protocol state from the recorded exchanges.
    #[must_use]
    pub fn state(&self) -> ExportState {
        if self.cancel.is_some() {
            return ExportState::Cancelled;
        }
        if let Some(status) = &self.status {
            let response = &status.response;
            return if response.is_still_processing() {
                ExportState::Polling
            } else if response.is_success() {
                ExportState::Completed
            } else {
                ExportState::Failed
            };
        }
        match &self.kick_off {
            None => ExportState::Idle,
            Some(kick_off) if kick_off.response.status >= 400 => ExportState::Failed,
            Some(_) => ExportState::KickedOff,
        }
    }

    /// Status URL and authorization for status and cancel requests.
    ///
    /// # Errors
    ///
    /// Returns [`BulkError::ProtocolPrecondition`] if no kick-off response
    /// exists or it carries no `content-location` header.
    pub fn status_target(&self) -> Result<StatusTarget, BulkError> {
        let kick_off = self
            .kick_off
            .as_ref()
            .ok_or_else(|| BulkError::precondition("no kick-off response is available"))?;
        let location = status_location(kick_off).ok_or_else(|| {
            BulkError::precondition(format!(
                "the kick-off response ({}) has no content-location header",
                kick_off.response.status
            ))
        })?;
        Ok(StatusTarget {
            location: location.to_string(),
            authorization: kick_off.request.authorization().map(str::to_string),
        })
    }

    /// `true` if the kick-off was accepted (202) and named a status URL.
    #[must_use]
    pub fn is_cancellable(&self) -> bool {
        self.kick_off.as_ref().is_some_and(|kick_off| {
            kick_off.response.is_still_processing() && status_location(kick_off).is_some()
        })
    }
}

/// Non-blank `content-location` of a kick-off exchange.
fn status_location(kick_off: &Exchange) -> Option<&str> {
    kick_off
        .response
        .content_location()
        .filter(|location| !location.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;

    fn kick_off(status: u16, location: Option<&str>) -> Exchange {
        let request = RequestDescriptor::new(HttpMethod::Get, "https://fhir.example.com/$export")
            .with_header("authorization", "Bearer tok");
        let mut response = ResponseDescriptor::new(status);
        if let Some(location) = location {
            response = response.with_header("content-location", location);
        }
        Exchange::new(request, response)
    }

    fn status(code: u16) -> Exchange {
        Exchange::new(
            RequestDescriptor::new(HttpMethod::Get, "https://x/status/1"),
            ResponseDescriptor::new(code),
        )
    }

    #[test]
    fn test_state_transitions() {
        let mut session = ExportSession::new();
        assert_eq!(session.state(), ExportState::Idle);

        session.record_kick_off(kick_off(202, Some("https://x/status/1")));
        assert_eq!(session.state(), ExportState::KickedOff);

        session.record_status(status(202));
        assert_eq!(session.state(), ExportState::Polling);

        session.record_status(status(200));
        assert_eq!(session.state(), ExportState::Completed);

        session.record_cancel(status(202));
        assert_eq!(session.state(), ExportState::Cancelled);

        session.record_kick_off(kick_off(400, None));
        assert_eq!(session.state(), ExportState::Failed);
        assert!(session.status().is_none());
        assert!(session.cancel().is_none());
    }

    #[test]
    fn test_status_target_preconditions() {
        let mut session = ExportSession::new();
        assert!(session.status_target().unwrap_err().is_precondition());

        session.record_kick_off(kick_off(202, None));
        assert!(session.status_target().unwrap_err().is_precondition());

        session.record_kick_off(kick_off(202, Some("https://x/status/1")));
        let target = session.status_target().unwrap();
        assert_eq!(target.location, "https://x/status/1");
        assert_eq!(target.authorization.as_deref(), Some("Bearer tok"));
    }

    #[test]
    fn test_is_cancellable() {
        let mut session = ExportSession::new();
        assert!(!session.is_cancellable());
        session.record_kick_off(kick_off(200, Some("https://x/status/1")));
        assert!(!session.is_cancellable());
        session.record_kick_off(kick_off(202, None));
        assert!(!session.is_cancellable());
        session.record_kick_off(kick_off(202, Some("  ")));
        assert!(!session.is_cancellable());
        session.record_kick_off(kick_off(202, Some("https://x/status/1")));
        assert!(session.is_cancellable());
    }

    #[test]
    fn test_access_token_survives_new_kick_off() {
        let mut session = ExportSession::new();
        session.set_access_token(AccessToken::new("tok"));
        session.record_kick_off(kick_off(202, Some("https://x/status/1")));
        assert_eq!(session.access_token().map(AccessToken::as_str), Some("tok"));
    }
}
