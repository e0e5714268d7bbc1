//! `reqwest`-backed [`Transport`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT_ENCODING;

use super::{
    Headers, HttpMethod, RequestDescriptor, ResponseBody, ResponseDescriptor, Transport,
    TransportError,
};

const USER_AGENT: &str = concat!("octofhir-bulk/", env!("CARGO_PKG_VERSION"));

/// Transport over `reqwest`.
///
/// Holds two connection pools: one verifying TLS certificates and one that
/// accepts anything, picked per request from [`RequestDescriptor::strict_ssl`].
#[derive(Clone)]
pub struct ReqwestTransport {
    strict: reqwest::Client,
    lenient: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport without a request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(None)
    }

    /// Creates a transport whose requests fail after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn with_timeout(timeout: Option<Duration>) -> Result<Self, TransportError> {
        Ok(Self {
            strict: build_client(timeout, false)?,
            lenient: build_client(timeout, true)?,
        })
    }

    fn client(&self, strict_ssl: bool) -> &reqwest::Client {
        if strict_ssl {
            &self.strict
        } else {
            &self.lenient
        }
    }
}

fn build_client(
    timeout: Option<Duration>,
    accept_invalid_certs: bool,
) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .danger_accept_invalid_certs(accept_invalid_certs);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| TransportError::Client(e.to_string()))
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

/// Reason phrase as sent by the server.
///
/// hyper drops an HTTP/1.x phrase that equals the canonical one, so that case
/// is restored. HTTP/2 has no phrase at all.
fn reason_phrase(
    version: reqwest::Version,
    status: reqwest::StatusCode,
    phrase: Option<&hyper::ext::ReasonPhrase>,
) -> Option<String> {
    if let Some(phrase) = phrase {
        return std::str::from_utf8(phrase.as_bytes()).ok().map(str::to_string);
    }
    if version < reqwest::Version::HTTP_2 {
        status.canonical_reason().map(str::to_string)
    } else {
        None
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor, TransportError> {
        let mut builder = self
            .client(request.strict_ssl)
            .request(to_reqwest_method(request.method), &request.url);

        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        // reqwest advertises gzip on its own; opt out unless asked for it.
        if !request.gzip && !request.headers.contains("accept-encoding") {
            builder = builder.header(ACCEPT_ENCODING, "identity");
        }

        if let Some(form) = &request.form {
            builder = builder.form(form);
        } else if let Some(json) = &request.json {
            builder = builder.json(json);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::request(request, e.to_string()))?;

        let status = response.status();
        let status_text = reason_phrase(
            response.version(),
            status,
            response.extensions().get::<hyper::ext::ReasonPhrase>(),
        );

        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
            .collect();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::request(request, e.to_string()))?;

        tracing::trace!(
            method = %request.method,
            url = %request.url,
            status = status.as_u16(),
            bytes = bytes.len(),
            "HTTP exchange completed"
        );

        Ok(ResponseDescriptor {
            status: status.as_u16(),
            status_text,
            body: ResponseBody::from_bytes(headers.get("content-type"), &bytes),
            raw: bytes.to_vec(),
            headers,
        })
    }
}
