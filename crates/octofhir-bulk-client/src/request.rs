//! Request construction from defaults plus caller overrides.
//!
//! Requests are described as JSON objects (`method`, `url`, `headers`, ...)
//! so that tests and conformance checks can tweak any part of them. Building a
//! request is two pure steps:
//!
//! 1. [`deep_merge`] the overrides into the defaults. Objects merge key by
//!    key at every depth; any other override value replaces the default.
//! 2. [`strip_absent`] every property whose value is `null`.
//!
//! `null` is therefore the "no value" sentinel: overriding
//! `{"headers": {"accept": null}}` sends no `accept` header at all rather than
//! an empty one. Header names are lower-cased on both sides before merging so
//! `Accept` and `accept` address the same header.

use serde_json::{Map, Value};

use crate::error::BulkError;
use crate::http::RequestDescriptor;

/// Merges `overrides` into `base`, recursing through nested objects.
///
/// `null` values in `overrides` are kept so a later [`strip_absent`] can
/// remove the property.
#[must_use]
pub fn deep_merge(base: Value, overrides: Value) -> Value {
    match (base, overrides) {
        (Value::Object(mut base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overrides) => overrides,
    }
}

/// Removes every object property whose value is `null`, at any depth.
///
/// Array elements are visited but `null` elements themselves are kept.
#[must_use]
pub fn strip_absent(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_absent(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_absent).collect()),
        other => other,
    }
}

/// Lower-cases the names under a top-level `headers` object.
fn normalize_header_names(mut options: Value) -> Value {
    if let Some(Value::Object(headers)) = options.get_mut("headers") {
        let normalized: Map<String, Value> = std::mem::take(headers)
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        *headers = normalized;
    }
    options
}

/// Merges, strips and parses request options into a [`RequestDescriptor`].
///
/// A top-level `null` override means "no overrides".
///
/// # Errors
///
/// Returns [`BulkError::InvalidRequest`] if the result is not a valid request
/// (missing `url`, non-string header values, unknown method).
pub fn build_request(defaults: Value, overrides: Value) -> Result<RequestDescriptor, BulkError> {
    let overrides = if overrides.is_null() {
        Value::Object(Map::new())
    } else {
        overrides
    };
    let merged = strip_absent(deep_merge(
        normalize_header_names(defaults),
        normalize_header_names(overrides),
    ));
    serde_json::from_value(merged).map_err(|e| BulkError::invalid_request(e.to_string()))
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    use super::*;
    use crate::http::HttpMethod;

    fn kick_off_defaults() -> Value {
        json!({
            "url": "https://fhir.example.com/$export",
            "headers": {
                "accept": "application/fhir+json",
                "prefer": "respond-async"
            }
        })
    }

    #[test]
    fn test_deep_merge_nested_objects() {
        let merged = deep_merge(
            json!({"a": {"b": 1, "c": {"d": 2}}, "x": [1, 2]}),
            json!({"a": {"c": {"e": 3}}, "x": [3]}),
        );
        assert_json_eq!(merged, json!({"a": {"b": 1, "c": {"d": 2, "e": 3}}, "x": [3]}));
    }

    #[test]
    fn test_strip_absent_at_any_depth() {
        let stripped = strip_absent(json!({
            "a": null,
            "b": {"c": null, "d": {"e": null, "f": 1}},
            "g": [{"h": null, "i": 2}, null]
        }));
        assert_json_eq!(stripped, json!({"b": {"d": {"f": 1}}, "g": [{"i": 2}, null]}));
    }

    #[test]
    fn test_null_override_removes_default_header() {
        let request = build_request(
            kick_off_defaults(),
            json!({"headers": {"accept": null}}),
        )
        .unwrap();
        assert!(!request.headers.contains("accept"));
        assert_eq!(request.headers.get("prefer"), Some("respond-async"));
    }

    #[test]
    fn test_null_override_is_case_insensitive() {
        let request = build_request(
            kick_off_defaults(),
            json!({"headers": {"Accept": null, "X-Extra": "1"}}),
        )
        .unwrap();
        assert!(!request.headers.contains("accept"));
        assert_eq!(request.headers.get("x-extra"), Some("1"));
    }

    #[test]
    fn test_override_replaces_values() {
        let request = build_request(
            kick_off_defaults(),
            json!({
                "method": "POST",
                "url": "https://fhir.example.com/Patient/$export",
                "headers": {"prefer": "respond-sync"},
                "json": {"resourceType": "Parameters", "parameter": null}
            }),
        )
        .unwrap();
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.url, "https://fhir.example.com/Patient/$export");
        assert_eq!(request.headers.get("prefer"), Some("respond-sync"));
        assert_json_eq!(request.json.unwrap(), json!({"resourceType": "Parameters"}));
    }

    #[test]
    fn test_removing_url_is_invalid() {
        let err = build_request(kick_off_defaults(), json!({"url": null})).unwrap_err();
        assert!(matches!(err, BulkError::InvalidRequest { .. }));
    }

    #[test]
    fn test_null_or_empty_overrides_keep_defaults() {
        let from_null = build_request(kick_off_defaults(), Value::Null).unwrap();
        let from_empty = build_request(kick_off_defaults(), json!({})).unwrap();
        assert_eq!(from_null, from_empty);
        assert_eq!(from_null.headers.len(), 2);
    }
}
