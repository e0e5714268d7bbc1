//! Bulk export orchestration.
//!
//! [`ExportOrchestrator`] drives one export session through the protocol:
//!
//! ```text
//! Idle ──kick_off──▶ KickedOff ──status──▶ Polling ⇄ Polling
//!                        │                    │
//!                        │                    ├──▶ Completed (2xx)
//!                        │                    └──▶ Failed (error status)
//!                        └──────cancel────────┴──▶ Cancelled
//! ```
//!
//! Operations take `&mut self`, so one orchestrator never has two requests in
//! flight. Independent orchestrators may share a transport.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use url::Url;

use super::manifest::{ExportManifest, output_url};
use super::params::ExportParameters;
use super::session::{Exchange, ExportSession, ExportState, StatusTarget};
use crate::auth::{AssertionSigner, Authorizer};
use crate::config::{ClientConfig, ExportOptions};
use crate::error::BulkError;
use crate::expect;
use crate::http::{FHIR_JSON, HttpMethod, RequestDescriptor, ResponseDescriptor, Transport};
use crate::log::{ExchangeLog, TracingExchangeLog};
use crate::request::build_request;

/// Drives the kick-off, poll, download and cancel steps of one export.
pub struct ExportOrchestrator {
    config: Arc<ClientConfig>,
    export_url: Url,
    options: ExportOptions,
    transport: Arc<dyn Transport>,
    authorizer: Authorizer,
    log: Arc<dyn ExchangeLog>,
    session: ExportSession,
}

impl ExportOrchestrator {
    /// Creates an orchestrator for `export_url`.
    ///
    /// # Errors
    ///
    /// Returns [`BulkError::Config`] if the URL cannot be parsed.
    pub fn new(
        config: Arc<ClientConfig>,
        export_url: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, BulkError> {
        let export_url = Url::parse(export_url)
            .map_err(|e| BulkError::config(format!("invalid export URL {export_url}: {e}")))?;
        Ok(Self {
            config,
            export_url,
            options: ExportOptions::default(),
            authorizer: Authorizer::new(Arc::clone(&transport)),
            transport,
            log: Arc::new(TracingExchangeLog),
            session: ExportSession::new(),
        })
    }

    #[must_use]
    pub fn with_options(mut self, options: ExportOptions) -> Self {
        self.options = options;
        self
    }

    /// Routes every exchange, including the token exchange, to `log`.
    #[must_use]
    pub fn with_log(mut self, log: Arc<dyn ExchangeLog>) -> Self {
        self.authorizer = self.authorizer.with_log(Arc::clone(&log));
        self.log = log;
        self
    }

    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn AssertionSigner>) -> Self {
        self.authorizer = self.authorizer.with_signer(signer);
        self
    }

    /// Appends `_type`, `_since` and friends to the export URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters cannot be encoded.
    pub fn with_parameters(mut self, parameters: &ExportParameters) -> Result<Self, BulkError> {
        self.export_url = parameters.apply(&self.export_url)?;
        Ok(self)
    }

    #[must_use]
    pub fn export_url(&self) -> &Url {
        &self.export_url
    }

    #[must_use]
    pub fn session(&self) -> &ExportSession {
        &self.session
    }

    #[must_use]
    pub fn state(&self) -> ExportState {
        self.session.state()
    }

    /// `authorization` header value for this session, fetching the token on
    /// first use. `None` when the server needs no authorization.
    async fn bearer(&mut self) -> Result<Option<String>, BulkError> {
        if !self.config.requires_auth {
            return Ok(None);
        }
        if let Some(token) = self.session.access_token() {
            return Ok(Some(token.bearer()));
        }
        let token = self.authorizer.authorize(&self.config).await?;
        let bearer = token.bearer();
        self.session.set_access_token(token);
        Ok(Some(bearer))
    }

    /// Resolves a server-provided location against the export URL. Absolute
    /// locations are used verbatim.
    fn resolve(&self, location: &str) -> Result<String, BulkError> {
        match Url::parse(location) {
            Ok(_) => Ok(location.to_string()),
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .export_url
                .join(location)
                .map(String::from)
                .map_err(|e| BulkError::invalid_request(format!("invalid location {location}: {e}"))),
            Err(e) => Err(BulkError::invalid_request(format!(
                "invalid location {location}: {e}"
            ))),
        }
    }

    async fn send(
        &self,
        request: &RequestDescriptor,
        label: &str,
    ) -> Result<ResponseDescriptor, BulkError> {
        self.log.log_request(request, &format!("{label} Request"));
        let response = self.transport.send(request).await?;
        self.log.log_response(&response, &format!("{label} Response"));
        Ok(response)
    }

    // ========================================================================
    // Kick-off
    // ========================================================================

    /// Starts an export.
    ///
    /// `overrides` are deep-merged into the default request; `null` removes a
    /// property, e.g. `{"headers": {"prefer": null}}` sends no `prefer`
    /// header. Pass `Value::Null` for the default request.
    ///
    /// # Errors
    ///
    /// Fails if authorization fails, the merged request is invalid, or the
    /// server cannot be reached. Error statuses are returned, not raised.
    pub async fn kick_off(&mut self, overrides: Value) -> Result<&ResponseDescriptor, BulkError> {
        let mut headers = Map::new();
        headers.insert("accept".into(), json!(FHIR_JSON));
        headers.insert("prefer".into(), json!("respond-async"));
        if let Some(bearer) = self.bearer().await? {
            headers.insert("authorization".into(), json!(bearer));
        }
        let defaults = json!({
            "method": HttpMethod::Get,
            "url": self.export_url.as_str(),
            "headers": headers,
            "strictSsl": self.config.strict_ssl,
        });

        let request = build_request(defaults, overrides)?;
        let response = self.send(&request, "Kick-off").await?;
        Ok(&self.session.record_kick_off(Exchange::new(request, response)).response)
    }

    /// Checks that the kick-off was accepted: 202, a `content-location`
    /// header, and an OperationOutcome if there is a body.
    ///
    /// # Errors
    ///
    /// Returns [`BulkError::Assertion`] describing the first violation, or a
    /// precondition error if there was no kick-off.
    pub fn expect_successful_kick_off(&self) -> Result<(), BulkError> {
        let response = self.kick_off_response()?;
        expect::status_code(response, 202)?;
        expect::header_present(response, "content-location")?;
        expect::optional_operation_outcome(response)?;
        Ok(())
    }

    /// Checks that the kick-off was rejected: status >= 400, a "Bad Request"
    /// reason phrase if one was sent, and an OperationOutcome body.
    ///
    /// # Errors
    ///
    /// Returns [`BulkError::Assertion`] describing the first violation, or a
    /// precondition error if there was no kick-off.
    pub fn expect_failed_kick_off(&self) -> Result<(), BulkError> {
        let response = self.kick_off_response()?;
        expect::status_at_least(response, 400)?;
        expect::status_text(response, "Bad Request")?;
        expect::operation_outcome(response)?;
        Ok(())
    }

    fn kick_off_response(&self) -> Result<&ResponseDescriptor, BulkError> {
        self.session
            .kick_off()
            .map(|exchange| &exchange.response)
            .ok_or_else(|| BulkError::precondition("no kick-off response is available"))
    }

    // ========================================================================
    // Status
    // ========================================================================

    fn status_request(&self) -> Result<RequestDescriptor, BulkError> {
        let StatusTarget {
            location,
            authorization,
        } = self.session.status_target()?;
        let mut request = RequestDescriptor::new(HttpMethod::Get, self.resolve(&location)?)
            .with_header("accept", "application/json")
            .with_strict_ssl(self.config.strict_ssl);
        if let Some(authorization) = authorization {
            request.headers.insert("authorization", authorization);
        }
        Ok(request)
    }

    /// Sends one status request to the kick-off location.
    ///
    /// # Errors
    ///
    /// Returns [`BulkError::ProtocolPrecondition`] if there is no kick-off
    /// response with a `content-location` header.
    pub async fn status(&mut self) -> Result<&ResponseDescriptor, BulkError> {
        let request = self.status_request()?;
        let response = self.send(&request, "Status").await?;
        Ok(&self.session.record_status(Exchange::new(request, response)).response)
    }

    /// Polls the status location until the server stops answering 202.
    ///
    /// Waits [`ExportOptions::poll_interval`] between requests. Without
    /// [`ExportOptions::max_poll_attempts`] there is no upper bound.
    ///
    /// # Errors
    ///
    /// Returns a precondition error as [`status`](Self::status) does,
    /// [`BulkError::PollLimitExceeded`] when the attempt limit is hit, or a
    /// transport error.
    pub async fn wait_for_export(&mut self) -> Result<&ResponseDescriptor, BulkError> {
        let request = self.status_request()?;
        self.log.log_request(&request, "Status Request");

        let mut attempt: u32 = 1;
        loop {
            let response = self.transport.send(&request).await?;
            self.log
                .log_response(&response, &format!("Status Response (attempt {attempt})"));

            if !response.is_still_processing() {
                tracing::debug!(attempt, status = response.status, "Export reached a terminal status");
                let exchange = Exchange::new(request, response);
                return Ok(&self.session.record_status(exchange).response);
            }
            self.session
                .record_status(Exchange::new(request.clone(), response));

            if let Some(max) = self.options.max_poll_attempts
                && attempt >= max
            {
                return Err(BulkError::PollLimitExceeded { attempts: attempt });
            }
            tracing::debug!(
                attempt,
                interval = ?self.options.poll_interval,
                "Export still in progress"
            );
            tokio::time::sleep(self.options.poll_interval).await;
            attempt += 1;
        }
    }

    /// Returns the last status response, kicking off and waiting for an
    /// export first if no status request was made yet.
    ///
    /// # Errors
    ///
    /// Propagates errors of [`kick_off`](Self::kick_off) and
    /// [`wait_for_export`](Self::wait_for_export).
    pub async fn get_export_response(&mut self) -> Result<&ResponseDescriptor, BulkError> {
        if self.session.status().is_none() {
            self.kick_off(Value::Null).await?;
            self.wait_for_export().await?;
        }
        self.session
            .status()
            .map(|exchange| &exchange.response)
            .ok_or_else(|| BulkError::precondition("no status response is available"))
    }

    /// Typed manifest of the last status response.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if there is no completed status response.
    pub fn manifest(&self) -> Result<ExportManifest, BulkError> {
        let exchange = self
            .session
            .status()
            .ok_or_else(|| BulkError::precondition("no status response is available"))?;
        if !exchange.response.is_success() || exchange.response.is_still_processing() {
            return Err(BulkError::precondition(format!(
                "the export has not completed (status {})",
                exchange.response.status
            )));
        }
        let body = exchange.response.json().ok_or_else(|| {
            BulkError::precondition("the completed status response has no JSON body")
        })?;
        ExportManifest::from_json(body)
    }

    // ========================================================================
    // Download
    // ========================================================================

    /// Runs a fresh export and downloads `output[index]`.
    ///
    /// The request accepts gzip and carries the bearer token unless
    /// `skip_auth` is set. The response is returned as received.
    ///
    /// # Errors
    ///
    /// Returns [`BulkError::MissingOutput`] if the manifest has no such file,
    /// plus any error of the kick-off and polling steps.
    pub async fn download_file_at(
        &mut self,
        index: usize,
        skip_auth: bool,
    ) -> Result<ResponseDescriptor, BulkError> {
        self.kick_off(Value::Null).await?;
        self.wait_for_export().await?;

        let body = self
            .session
            .status()
            .and_then(|exchange| exchange.response.json());
        let url = self.resolve(&output_url(body, index)?)?;

        let mut request = RequestDescriptor::new(HttpMethod::Get, url)
            .with_header("accept", FHIR_JSON)
            .with_gzip(true)
            .with_strict_ssl(self.config.strict_ssl);
        if !skip_auth && let Some(bearer) = self.bearer().await? {
            request.headers.insert("authorization", bearer);
        }

        self.send(&request, "Download").await
    }

    // ========================================================================
    // Cancel
    // ========================================================================

    /// Sends a DELETE to the kick-off location.
    ///
    /// # Errors
    ///
    /// Returns [`BulkError::ProtocolPrecondition`] if there is no kick-off
    /// response with a `content-location` header.
    pub async fn cancel(&mut self) -> Result<&ResponseDescriptor, BulkError> {
        let StatusTarget {
            location,
            authorization,
        } = self.session.status_target()?;
        let mut request = RequestDescriptor::new(HttpMethod::Delete, self.resolve(&location)?)
            .with_strict_ssl(self.config.strict_ssl);
        if let Some(authorization) = authorization {
            request.headers.insert("authorization", authorization);
        }

        let response = self.send(&request, "Cancel").await?;
        Ok(&self.session.record_cancel(Exchange::new(request, response)).response)
    }

    /// Cancels the export if the kick-off was accepted with a location.
    /// Otherwise sends nothing and returns `None`.
    ///
    /// # Errors
    ///
    /// Propagates errors of [`cancel`](Self::cancel).
    pub async fn cancel_if_started(&mut self) -> Result<Option<&ResponseDescriptor>, BulkError> {
        if !self.session.is_cancellable() {
            return Ok(None);
        }
        self.cancel().await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::auth::{PrivateKey, SigningAlgorithm, SigningError};
    use crate::http::TransportError;
    use crate::log::MemoryExchangeLog;

    const EXPORT_URL: &str = "https://fhir.example.com/$export";
    const STATUS_URL: &str = "https://fhir.example.com/status/42";

    #[derive(Default)]
    struct FakeTransport {
        responses: Mutex<VecDeque<ResponseDescriptor>>,
        requests: Mutex<Vec<RequestDescriptor>>,
    }

    impl FakeTransport {
        fn with(responses: impl IntoIterator<Item = ResponseDescriptor>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().collect()),
                requests: Mutex::default(),
            })
        }

        fn requests(&self) -> Vec<RequestDescriptor> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| TransportError::request(request, "no canned response left"))
        }
    }

    struct FixedSigner;

    impl AssertionSigner for FixedSigner {
        fn sign(&self, _claims: Map<String, Value>, _key: &PrivateKey) -> Result<String, SigningError> {
            Ok("assertion".into())
        }
    }

    fn accepted() -> ResponseDescriptor {
        ResponseDescriptor::new(202)
            .with_status_text("Accepted")
            .with_header("content-location", STATUS_URL)
    }

    fn completed() -> ResponseDescriptor {
        ResponseDescriptor::new(200).with_json(json!({
            "transactionTime": "2024-01-01T00:00:00Z",
            "request": EXPORT_URL,
            "requiresAccessToken": true,
            "output": [{"type": "Patient", "url": "https://x/file1.ndjson"}],
            "error": []
        }))
    }

    fn token() -> ResponseDescriptor {
        ResponseDescriptor::new(200).with_json(json!({"access_token": "tok-1"}))
    }

    fn fast() -> ExportOptions {
        ExportOptions::default().with_poll_interval(Duration::from_millis(1))
    }

    fn open_orchestrator(transport: Arc<FakeTransport>) -> ExportOrchestrator {
        ExportOrchestrator::new(Arc::new(ClientConfig::open()), EXPORT_URL, transport)
            .unwrap()
            .with_options(fast())
    }

    fn authorized_orchestrator(transport: Arc<FakeTransport>) -> ExportOrchestrator {
        let config = ClientConfig::backend_services(
            "https://auth.example.com/token",
            "client-1",
            PrivateKey::from_pem(SigningAlgorithm::ES384, None, "unused"),
        );
        ExportOrchestrator::new(Arc::new(config), EXPORT_URL, transport)
            .unwrap()
            .with_signer(Arc::new(FixedSigner))
            .with_options(fast())
    }

    #[tokio::test]
    async fn test_kick_off_default_request() {
        let transport = FakeTransport::with([accepted()]);
        let mut orchestrator = open_orchestrator(transport.clone());

        let response = orchestrator.kick_off(Value::Null).await.unwrap();
        assert_eq!(response.status, 202);
        assert_eq!(orchestrator.state(), ExportState::KickedOff);

        let request = &transport.requests()[0];
        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.url, EXPORT_URL);
        assert_eq!(request.headers.get("accept"), Some(FHIR_JSON));
        assert_eq!(request.headers.get("prefer"), Some("respond-async"));
        assert!(request.authorization().is_none());
    }

    #[tokio::test]
    async fn test_null_override_removes_accept_header() {
        let transport = FakeTransport::with([accepted()]);
        let mut orchestrator = open_orchestrator(transport.clone());

        orchestrator
            .kick_off(json!({"headers": {"accept": null}}))
            .await
            .unwrap();

        let request = &transport.requests()[0];
        assert!(!request.headers.contains("accept"));
        assert_eq!(request.headers.get("prefer"), Some("respond-async"));
        assert_eq!(
            orchestrator.session().kick_off().unwrap().request.headers.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_token_is_fetched_once_and_propagated() {
        let transport = FakeTransport::with([token(), accepted(), accepted(), completed()]);
        let mut orchestrator = authorized_orchestrator(transport.clone());

        orchestrator.kick_off(Value::Null).await.unwrap();
        orchestrator.status().await.unwrap();
        orchestrator.status().await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[0].method, HttpMethod::Post);
        for request in &requests[1..] {
            assert_eq!(request.authorization(), Some("Bearer tok-1"));
        }
        assert_eq!(requests[2].url, STATUS_URL);
        assert_eq!(orchestrator.state(), ExportState::Completed);
    }

    #[tokio::test]
    async fn test_override_may_remove_authorization() {
        let transport = FakeTransport::with([token(), ResponseDescriptor::new(401)]);
        let mut orchestrator = authorized_orchestrator(transport.clone());

        orchestrator
            .kick_off(json!({"headers": {"authorization": null}}))
            .await
            .unwrap();
        assert!(transport.requests()[1].authorization().is_none());
        assert_eq!(orchestrator.state(), ExportState::Failed);
    }

    #[tokio::test]
    async fn test_authorization_failure_stops_kick_off() {
        let transport = FakeTransport::with([ResponseDescriptor::new(400).with_status_text("Bad Request")]);
        let mut orchestrator = authorized_orchestrator(transport.clone());

        let err = orchestrator.kick_off(Value::Null).await.unwrap_err();
        assert!(matches!(err, BulkError::Authorization { status: 400, .. }));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(orchestrator.state(), ExportState::Idle);
    }

    #[tokio::test]
    async fn test_status_and_cancel_require_kick_off_location() {
        let transport = FakeTransport::with([ResponseDescriptor::new(202)]);
        let mut orchestrator = open_orchestrator(transport.clone());

        assert!(orchestrator.status().await.unwrap_err().is_precondition());
        assert!(orchestrator.cancel().await.unwrap_err().is_precondition());
        assert!(orchestrator.wait_for_export().await.unwrap_err().is_precondition());

        orchestrator.kick_off(Value::Null).await.unwrap();
        assert!(orchestrator.status().await.unwrap_err().is_precondition());
        assert!(orchestrator.cancel().await.unwrap_err().is_precondition());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_status_and_cancel_after_kick_off() {
        let transport = FakeTransport::with([accepted(), accepted(), ResponseDescriptor::new(202)]);
        let mut orchestrator = open_orchestrator(transport.clone());

        orchestrator.kick_off(Value::Null).await.unwrap();
        assert_eq!(orchestrator.status().await.unwrap().status, 202);
        assert_eq!(orchestrator.state(), ExportState::Polling);
        assert_eq!(orchestrator.cancel().await.unwrap().status, 202);
        assert_eq!(orchestrator.state(), ExportState::Cancelled);

        let requests = transport.requests();
        assert_eq!(requests[2].method, HttpMethod::Delete);
        assert_eq!(requests[2].url, STATUS_URL);
    }

    #[tokio::test]
    async fn test_wait_for_export_polls_until_terminal() {
        for still_processing in 0..4 {
            let responses = std::iter::once(accepted())
                .chain(std::iter::repeat_n(ResponseDescriptor::new(202), still_processing))
                .chain(std::iter::once(completed()));
            let transport = FakeTransport::with(responses);
            let log = MemoryExchangeLog::new();
            let mut orchestrator =
                open_orchestrator(transport.clone()).with_log(Arc::new(log.clone()));

            orchestrator.kick_off(Value::Null).await.unwrap();
            let response = orchestrator.wait_for_export().await.unwrap();
            assert_eq!(response.status, 200);

            let status_requests = transport.requests().len() - 1;
            assert_eq!(status_requests, still_processing + 1);
            assert_eq!(
                orchestrator.session().status().unwrap().response,
                completed()
            );

            let labels = log.labels();
            assert_eq!(
                labels.iter().filter(|l| *l == "Status Request").count(),
                1
            );
            assert_eq!(
                labels.last().map(String::as_str),
                Some(format!("Status Response (attempt {})", still_processing + 1).as_str())
            );
        }
    }

    #[tokio::test]
    async fn test_wait_for_export_respects_attempt_limit() {
        let transport = FakeTransport::with([
            accepted(),
            ResponseDescriptor::new(202),
            ResponseDescriptor::new(202),
            completed(),
        ]);
        let mut orchestrator = open_orchestrator(transport.clone())
            .with_options(fast().with_max_poll_attempts(2));

        orchestrator.kick_off(Value::Null).await.unwrap();
        let err = orchestrator.wait_for_export().await.unwrap_err();
        assert!(matches!(err, BulkError::PollLimitExceeded { attempts: 2 }));
        assert_eq!(transport.requests().len(), 3);
        assert_eq!(orchestrator.state(), ExportState::Polling);
    }

    #[tokio::test]
    async fn test_error_status_terminates_polling() {
        let transport = FakeTransport::with([accepted(), ResponseDescriptor::new(500)]);
        let mut orchestrator = open_orchestrator(transport.clone());

        orchestrator.kick_off(Value::Null).await.unwrap();
        assert_eq!(orchestrator.wait_for_export().await.unwrap().status, 500);
        assert_eq!(orchestrator.state(), ExportState::Failed);
        assert!(orchestrator.manifest().unwrap_err().is_precondition());
    }

    #[tokio::test]
    async fn test_cancel_if_started_is_noop_without_accepted_kick_off() {
        let transport = FakeTransport::with([
            ResponseDescriptor::new(200).with_header("content-location", STATUS_URL),
            ResponseDescriptor::new(202),
            ResponseDescriptor::new(202).with_header("content-location", ""),
        ]);
        let mut orchestrator = open_orchestrator(transport.clone());

        assert!(orchestrator.cancel_if_started().await.unwrap().is_none());

        orchestrator.kick_off(Value::Null).await.unwrap();
        assert!(orchestrator.cancel_if_started().await.unwrap().is_none());

        orchestrator.kick_off(Value::Null).await.unwrap();
        assert!(orchestrator.cancel_if_started().await.unwrap().is_none());

        // blank location
        orchestrator.kick_off(Value::Null).await.unwrap();
        assert!(orchestrator.cancel_if_started().await.unwrap().is_none());

        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_cancel_if_started_cancels_once() {
        let transport = FakeTransport::with([accepted(), ResponseDescriptor::new(202)]);
        let mut orchestrator = open_orchestrator(transport.clone());

        orchestrator.kick_off(Value::Null).await.unwrap();
        let response = orchestrator.cancel_if_started().await.unwrap();
        assert_eq!(response.map(|r| r.status), Some(202));

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].method, HttpMethod::Delete);
    }

    #[tokio::test]
    async fn test_download_file_at() {
        let file = ResponseDescriptor::new(200)
            .with_header("content-type", "application/fhir+ndjson")
            .with_text("{\"resourceType\":\"Patient\"}\n");
        let transport = FakeTransport::with([
            accepted(),
            ResponseDescriptor::new(202),
            completed(),
            file.clone(),
        ]);
        let mut orchestrator = open_orchestrator(transport.clone());

        let response = orchestrator.download_file_at(0, false).await.unwrap();
        assert_eq!(response, file);

        let requests = transport.requests();
        assert_eq!(requests.len(), 4);
        let download = &requests[3];
        assert_eq!(download.url, "https://x/file1.ndjson");
        assert_eq!(download.headers.get("accept"), Some(FHIR_JSON));
        assert!(download.gzip);
    }

    #[tokio::test]
    async fn test_download_skip_auth_and_missing_output() {
        let transport = FakeTransport::with([
            token(),
            accepted(),
            completed(),
            ResponseDescriptor::new(401),
            accepted(),
            completed(),
        ]);
        let mut orchestrator = authorized_orchestrator(transport.clone());

        let response = orchestrator.download_file_at(0, true).await.unwrap();
        assert_eq!(response.status, 401);
        assert!(transport.requests()[3].authorization().is_none());

        let err = orchestrator.download_file_at(5, false).await.unwrap_err();
        assert!(matches!(err, BulkError::MissingOutput { index: 5, available: 1 }));
        assert_eq!(transport.requests().len(), 6);
    }

    #[tokio::test]
    async fn test_get_export_response_runs_export_once() {
        let transport = FakeTransport::with([accepted(), completed()]);
        let mut orchestrator = open_orchestrator(transport.clone());

        assert_eq!(orchestrator.get_export_response().await.unwrap().status, 200);
        assert_eq!(orchestrator.get_export_response().await.unwrap().status, 200);
        assert_eq!(transport.requests().len(), 2);

        let manifest = orchestrator.manifest().unwrap();
        assert_eq!(manifest.output[0].url, "https://x/file1.ndjson");
    }

    #[tokio::test]
    async fn test_relative_content_location_is_resolved() {
        let transport = FakeTransport::with([
            ResponseDescriptor::new(202).with_header("content-location", "/status/7"),
            completed(),
        ]);
        let mut orchestrator = open_orchestrator(transport.clone());

        orchestrator.kick_off(Value::Null).await.unwrap();
        orchestrator.status().await.unwrap();
        assert_eq!(transport.requests()[1].url, "https://fhir.example.com/status/7");
    }

    #[tokio::test]
    async fn test_expect_successful_kick_off() {
        let transport = FakeTransport::with([accepted(), ResponseDescriptor::new(202)]);
        let mut orchestrator = open_orchestrator(transport);

        assert!(orchestrator.expect_successful_kick_off().unwrap_err().is_precondition());

        orchestrator.kick_off(Value::Null).await.unwrap();
        assert!(orchestrator.expect_successful_kick_off().is_ok());

        orchestrator.kick_off(Value::Null).await.unwrap();
        let err = orchestrator.expect_successful_kick_off().unwrap_err();
        assert!(matches!(err, BulkError::Assertion(_)));
        assert!(err.to_string().contains("content-location"));
    }

    #[tokio::test]
    async fn test_expect_failed_kick_off() {
        let outcome = json!({
            "resourceType": "OperationOutcome",
            "issue": [{"severity": "error", "code": "invalid"}]
        });
        let transport = FakeTransport::with([
            ResponseDescriptor::new(400)
                .with_status_text("Bad Request")
                .with_json(outcome.clone()),
            ResponseDescriptor::new(422).with_json(outcome.clone()),
            ResponseDescriptor::new(400)
                .with_status_text("Invalid")
                .with_json(outcome),
            accepted(),
        ]);
        let mut orchestrator = open_orchestrator(transport);

        orchestrator.kick_off(json!({"headers": {"prefer": null}})).await.unwrap();
        assert!(orchestrator.expect_failed_kick_off().is_ok());

        orchestrator.kick_off(Value::Null).await.unwrap();
        assert!(orchestrator.expect_failed_kick_off().is_ok());

        orchestrator.kick_off(Value::Null).await.unwrap();
        assert!(orchestrator.expect_failed_kick_off().is_err());

        orchestrator.kick_off(Value::Null).await.unwrap();
        assert!(orchestrator.expect_failed_kick_off().is_err());
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let transport = FakeTransport::with(Vec::new());
        let mut orchestrator = open_orchestrator(transport);

        let err = orchestrator.kick_off(Value::Null).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(orchestrator.state(), ExportState::Idle);
    }
}
