//! Completion manifest returned by a finished export.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BulkError;

/// Body of the terminal 200 status response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportManifest {
    #[serde(default)]
    pub transaction_time: Option<String>,
    /// The kick-off URL the export was started with.
    #[serde(default)]
    pub request: Option<String>,
    #[serde(default)]
    pub requires_access_token: bool,
    #[serde(default)]
    pub output: Vec<ManifestEntry>,
    #[serde(default)]
    pub error: Vec<ManifestEntry>,
}

/// One file in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

impl ExportManifest {
    /// Parses a manifest from a status response body.
    ///
    /// # Errors
    ///
    /// Returns [`BulkError::InvalidRequest`] if the body is not a manifest.
    pub fn from_json(body: &Value) -> Result<Self, BulkError> {
        Self::deserialize(body)
            .map_err(|e| BulkError::invalid_request(format!("invalid export manifest: {e}")))
    }

    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.output.iter().filter_map(|entry| entry.count).sum()
    }
}

/// Reads `output[index].url` from a status response body.
///
/// Only the URL is required; the rest of the manifest is not validated.
///
/// # Errors
///
/// Returns [`BulkError::MissingOutput`] if there is no such entry.
pub fn output_url(body: Option<&Value>, index: usize) -> Result<String, BulkError> {
    let output = body
        .and_then(|body| body.get("output"))
        .and_then(Value::as_array);
    let available = output.map_or(0, Vec::len);
    output
        .and_then(|entries| entries.get(index))
        .and_then(|entry| entry.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(BulkError::MissingOutput { index, available })
}
