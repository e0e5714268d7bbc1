//! HTTP request/response descriptors and the transport contract.
//!
//! The orchestrator never talks to `reqwest` directly. It builds a
//! [`RequestDescriptor`], hands it to a [`Transport`], and gets back a
//! [`ResponseDescriptor`]. HTTP error statuses are ordinary responses; only
//! connection-level problems surface as [`TransportError`].

mod client;

use std::borrow::Cow;
use std::fmt;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub use client::ReqwestTransport;

/// FHIR JSON media type.
pub const FHIR_JSON: &str = "application/fhir+json";

/// Status code meaning "export still in progress".
pub const STILL_PROCESSING: u16 = 202;

/// Performs HTTP requests on behalf of the orchestrator and the authorizer.
///
/// Implementations must be safe to share between independent export sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request and returns the response, whatever its status code.
    async fn send(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor, TransportError>;
}

/// Connection-level failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The request could not be completed.
    #[error("{method} {url} failed: {message}")]
    Request {
        /// Request method.
        method: HttpMethod,
        /// Request URL.
        url: String,
        /// Underlying error.
        message: String,
    },

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl TransportError {
    /// Creates a `Request` error for the given request.
    #[must_use]
    pub fn request(request: &RequestDescriptor, message: impl Into<String>) -> Self {
        Self::Request {
            method: request.method,
            url: request.url.clone(),
            message: message.into(),
        }
    }
}

/// HTTP methods used by the bulk data protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive header map. Names are stored lower-cased in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Headers(IndexMap<String, String>);

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of a header, ignoring name case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    /// Sets a header, replacing any previous value.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Adds a value, joining repeated headers with `", "`.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let value = value.into();
        self.0
            .entry(name.as_ref().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.shift_remove(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = IndexMap::<String, String>::deserialize(deserializer)?;
        Ok(raw.into_iter().collect())
    }
}

/// Everything the transport needs to issue one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    #[serde(default)]
    pub method: HttpMethod,

    pub url: String,

    #[serde(default)]
    pub headers: Headers,

    /// JSON request body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,

    /// Form-encoded request body. Takes precedence over `json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<IndexMap<String, String>>,

    /// Negotiate gzip transfer encoding.
    #[serde(default)]
    pub gzip: bool,

    /// Reject invalid TLS certificates.
    #[serde(default = "default_strict_ssl")]
    pub strict_ssl: bool,
}

fn default_strict_ssl() -> bool {
    true
}

impl RequestDescriptor {
    /// Creates a request with no headers or body.
    #[must_use]
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            json: None,
            form: None,
            gzip: false,
            strict_ssl: true,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_form<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.form = Some(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    #[must_use]
    pub fn with_gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    #[must_use]
    pub fn with_strict_ssl(mut self, strict_ssl: bool) -> Self {
        self.strict_ssl = strict_ssl;
        self
    }

    /// The `authorization` header value, if one was sent.
    #[must_use]
    pub fn authorization(&self) -> Option<&str> {
        self.headers.get("authorization")
    }
}

/// Decoded response body.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResponseBody {
    #[default]
    Empty,
    Json(Value),
    Text(String),
}

impl ResponseBody {
    /// Decodes raw bytes according to the response content type.
    ///
    /// JSON media types are parsed (NDJSON is not); a JSON body that fails to
    /// parse is kept as text.
    #[must_use]
    pub fn from_bytes(content_type: Option<&str>, bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self::Empty;
        }
        if content_type.is_some_and(is_json_media_type)
            && let Ok(value) = serde_json::from_slice(bytes)
        {
            return Self::Json(value);
        }
        Self::Text(String::from_utf8_lossy(bytes).into_owned())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// `true` for `application/json`, `application/fhir+json` and friends.
#[must_use]
pub fn is_json_media_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.ends_with("/json") || (essence.ends_with("+json") && !essence.contains("ndjson"))
}

/// Status, headers and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseDescriptor {
    pub status: u16,
    /// Reason phrase. Servers (and HTTP/2) may omit it.
    pub status_text: Option<String>,
    pub headers: Headers,
    pub body: ResponseBody,
    /// Body bytes exactly as received. Empty for responses built in code.
    pub raw: Vec<u8>,
}

impl ResponseDescriptor {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            status_text: None,
            headers: Headers::new(),
            body: ResponseBody::Empty,
            raw: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_json(mut self, body: Value) -> Self {
        self.body = ResponseBody::Json(body);
        self
    }

    #[must_use]
    pub fn with_text(mut self, body: impl Into<String>) -> Self {
        self.body = ResponseBody::Text(body.into());
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// The status URL returned by a kick-off.
    #[must_use]
    pub fn content_location(&self) -> Option<&str> {
        self.header("content-location")
    }

    #[must_use]
    pub fn is_still_processing(&self) -> bool {
        self.status == STILL_PROCESSING
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            ResponseBody::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Body as received, falling back to the encoded [`ResponseBody`] when no
    /// raw bytes were captured.
    #[must_use]
    pub fn body_bytes(&self) -> Cow<'_, [u8]> {
        if !self.raw.is_empty() {
            return Cow::Borrowed(&self.raw);
        }
        match &self.body {
            ResponseBody::Empty => Cow::Borrowed(&[]),
            ResponseBody::Json(value) => Cow::Owned(value.to_string().into_bytes()),
            ResponseBody::Text(text) => Cow::Borrowed(text.as_bytes()),
        }
    }
}
