//! Request/response logging.
//!
//! Every exchange issued by the authorizer or the orchestrator is handed to
//! an [`ExchangeLog`] with a human readable label such as `"Kick-off Request"`
//! or `"Status Response (attempt 3)"`.

use std::sync::{Arc, Mutex, PoisonError};

use crate::http::{RequestDescriptor, ResponseBody, ResponseDescriptor};

/// Receives every request and response the client produces.
pub trait ExchangeLog: Send + Sync {
    fn log_request(&self, request: &RequestDescriptor, label: &str);

    fn log_response(&self, response: &ResponseDescriptor, label: &str);
}

/// [`ExchangeLog`] that emits `tracing` events.
///
/// Summaries go out at `INFO`; headers and bodies at `DEBUG`. The
/// `authorization` header and form fields carrying assertions are masked.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingExchangeLog;

const MASKED: &str = "***";

fn masked_headers(request: &RequestDescriptor) -> Vec<(String, String)> {
    request
        .headers
        .iter()
        .map(|(name, value)| {
            let value = if name == "authorization" { MASKED } else { value };
            (name.to_string(), value.to_string())
        })
        .collect()
}

impl ExchangeLog for TracingExchangeLog {
    fn log_request(&self, request: &RequestDescriptor, label: &str) {
        tracing::info!(label, method = %request.method, url = %request.url, "{label}");
        tracing::debug!(
            label,
            headers = ?masked_headers(request),
            form_fields = ?request.form.as_ref().map(|f| f.keys().cloned().collect::<Vec<_>>()),
            json = ?request.json,
            "Request details"
        );
    }

    fn log_response(&self, response: &ResponseDescriptor, label: &str) {
        tracing::info!(
            label,
            status = response.status,
            status_text = response.status_text.as_deref().unwrap_or(""),
            content_location = response.content_location().unwrap_or(""),
            "{label}"
        );
        let body = match &response.body {
            ResponseBody::Empty => String::new(),
            ResponseBody::Json(value) => value.to_string(),
            ResponseBody::Text(text) => text.clone(),
        };
        tracing::debug!(label, headers = ?response.headers, body = %body, "Response details");
    }
}

/// One entry recorded by [`MemoryExchangeLog`].
#[derive(Debug, Clone, PartialEq)]
pub enum LoggedExchange {
    Request {
        label: String,
        request: RequestDescriptor,
    },
    Response {
        label: String,
        response: ResponseDescriptor,
    },
}

impl LoggedExchange {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Request { label, .. } | Self::Response { label, .. } => label,
        }
    }
}

/// [`ExchangeLog`] that keeps every entry in memory, in order.
///
/// Clones share the same buffer, so a caller can keep one handle and give
/// another to an orchestrator.
#[derive(Debug, Clone, Default)]
pub struct MemoryExchangeLog {
    entries: Arc<Mutex<Vec<LoggedExchange>>>,
}

impl MemoryExchangeLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded entries.
    #[must_use]
    pub fn entries(&self) -> Vec<LoggedExchange> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Labels of all recorded entries.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.entries()
            .iter()
            .map(|entry| entry.label().to_string())
            .collect()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn push(&self, entry: LoggedExchange) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

impl ExchangeLog for MemoryExchangeLog {
    fn log_request(&self, request: &RequestDescriptor, label: &str) {
        self.push(LoggedExchange::Request {
            label: label.to_string(),
            request: request.clone(),
        });
    }

    fn log_response(&self, response: &ResponseDescriptor, label: &str) {
        self.push(LoggedExchange::Response {
            label: label.to_string(),
            response: response.clone(),
        });
    }
}
