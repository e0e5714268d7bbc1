//! Conformance expectations on responses.
//!
//! Each check returns `Ok(())` or an [`AssertionFailure`] describing what the
//! server did instead.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::http::{ResponseBody, ResponseDescriptor, is_json_media_type};

/// A conformance expectation that did not hold.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Assertion failed: {message}")]
pub struct AssertionFailure {
    pub message: String,
}

impl AssertionFailure {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type ExpectResult = Result<(), AssertionFailure>;

fn describe(response: &ResponseDescriptor) -> String {
    match &response.status_text {
        Some(text) => format!("{} {text}", response.status),
        None => response.status.to_string(),
    }
}

/// The status code equals `expected`.
pub fn status_code(response: &ResponseDescriptor, expected: u16) -> ExpectResult {
    if response.status == expected {
        Ok(())
    } else {
        Err(AssertionFailure::new(format!(
            "expected status {expected}, got {}",
            describe(response)
        )))
    }
}

/// The status code is `minimum` or higher.
pub fn status_at_least(response: &ResponseDescriptor, minimum: u16) -> ExpectResult {
    if response.status >= minimum {
        Ok(())
    } else {
        Err(AssertionFailure::new(format!(
            "expected status >= {minimum}, got {}",
            describe(response)
        )))
    }
}

/// The reason phrase equals `expected` when the server sent one.
///
/// Servers (and HTTP/2) may omit the phrase; that is not a failure.
pub fn status_text(response: &ResponseDescriptor, expected: &str) -> ExpectResult {
    match response.status_text.as_deref() {
        None | Some("") => Ok(()),
        Some(text) if text == expected => Ok(()),
        Some(text) => Err(AssertionFailure::new(format!(
            "expected status text \"{expected}\", got \"{text}\""
        ))),
    }
}

pub fn header_present(response: &ResponseDescriptor, name: &str) -> ExpectResult {
    if response.header(name).is_some_and(|v| !v.trim().is_empty()) {
        Ok(())
    } else {
        Err(AssertionFailure::new(format!(
            "expected a \"{name}\" header in the {} response",
            response.status
        )))
    }
}

static XML_OPERATION_OUTCOME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?:[A-Za-z_][\w.-]*:)?OperationOutcome[\s>]").expect("Invalid OperationOutcome regex")
});

static XML_ISSUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?:[A-Za-z_][\w.-]*:)?issue[\s>/]").expect("Invalid issue regex"));

fn is_json_operation_outcome(value: &Value) -> bool {
    value.get("resourceType").and_then(Value::as_str) == Some("OperationOutcome")
        && value
            .get("issue")
            .and_then(Value::as_array)
            .is_some_and(|issues| !issues.is_empty())
}

fn is_xml_operation_outcome(text: &str) -> bool {
    XML_OPERATION_OUTCOME.is_match(text) && XML_ISSUE.is_match(text)
}

fn is_xml_media_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.ends_with("/xml") || essence.ends_with("+xml")
}

/// The body is an OperationOutcome with at least one issue, in whichever
/// format (JSON or XML) the content type declares.
pub fn operation_outcome(response: &ResponseDescriptor) -> ExpectResult {
    let content_type = response.content_type().unwrap_or_default();
    let shaped = match &response.body {
        ResponseBody::Json(value) => is_json_operation_outcome(value),
        ResponseBody::Text(text) if is_xml_media_type(content_type) => {
            is_xml_operation_outcome(text)
        }
        ResponseBody::Text(text) if is_json_media_type(content_type) => {
            serde_json::from_str::<Value>(text).is_ok_and(|v| is_json_operation_outcome(&v))
        }
        ResponseBody::Text(_) | ResponseBody::Empty => false,
    };
    if shaped {
        Ok(())
    } else {
        Err(AssertionFailure::new(format!(
            "expected an OperationOutcome body with issues (content-type: {})",
            if content_type.is_empty() { "none" } else { content_type }
        )))
    }
}

/// Like [`operation_outcome`] but passes when the body is empty.
pub fn optional_operation_outcome(response: &ResponseDescriptor) -> ExpectResult {
    if response.body.is_empty() {
        Ok(())
    } else {
        operation_outcome(response)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn outcome() -> Value {
        json!({
            "resourceType": "OperationOutcome",
            "issue": [{"severity": "error", "code": "processing"}]
        })
    }

    #[test]
    fn test_status_checks() {
        let response = ResponseDescriptor::new(400).with_status_text("Bad Request");
        assert!(status_code(&response, 400).is_ok());
        let err = status_code(&response, 202).unwrap_err();
        assert_eq!(err.message, "expected status 202, got 400 Bad Request");
        assert!(status_at_least(&response, 400).is_ok());
        assert!(status_at_least(&ResponseDescriptor::new(202), 400).is_err());
    }

    #[test]
    fn test_status_text_tolerates_absence() {
        assert!(status_text(&ResponseDescriptor::new(400), "Bad Request").is_ok());
        assert!(
            status_text(&ResponseDescriptor::new(400).with_status_text("Bad Request"), "Bad Request")
                .is_ok()
        );
        assert!(
            status_text(&ResponseDescriptor::new(400).with_status_text("Oops"), "Bad Request")
                .is_err()
        );
    }

    #[test]
    fn test_header_present() {
        let response = ResponseDescriptor::new(202).with_header("Content-Location", "https://x/s/1");
        assert!(header_present(&response, "content-location").is_ok());
        assert!(header_present(&ResponseDescriptor::new(202), "content-location").is_err());
    }

    #[test]
    fn test_json_operation_outcome() {
        let response = ResponseDescriptor::new(400)
            .with_header("content-type", "application/fhir+json")
            .with_json(outcome());
        assert!(operation_outcome(&response).is_ok());

        let no_issues = ResponseDescriptor::new(400)
            .with_json(json!({"resourceType": "OperationOutcome", "issue": []}));
        assert!(operation_outcome(&no_issues).is_err());

        let patient = ResponseDescriptor::new(400).with_json(json!({"resourceType": "Patient"}));
        assert!(operation_outcome(&patient).is_err());
    }

    #[test]
    fn test_xml_operation_outcome() {
        let xml = r#"<OperationOutcome xmlns="http://hl7.org/fhir"><issue><severity value="error"/></issue></OperationOutcome>"#;
        let response = ResponseDescriptor::new(400)
            .with_header("content-type", "application/fhir+xml")
            .with_text(xml);
        assert!(operation_outcome(&response).is_ok());

        let not_outcome = ResponseDescriptor::new(400)
            .with_header("content-type", "application/fhir+xml")
            .with_text("<Bundle><entry/></Bundle>");
        assert!(operation_outcome(&not_outcome).is_err());

        let undeclared = ResponseDescriptor::new(400).with_text(xml);
        assert!(operation_outcome(&undeclared).is_err());
    }

    #[test]
    fn test_optional_operation_outcome() {
        assert!(optional_operation_outcome(&ResponseDescriptor::new(202)).is_ok());
        assert!(
            optional_operation_outcome(&ResponseDescriptor::new(202).with_json(outcome())).is_ok()
        );
        assert!(
            optional_operation_outcome(&ResponseDescriptor::new(202).with_json(json!({}))).is_err()
        );
    }
}
