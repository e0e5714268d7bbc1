//! Kick-off query parameters.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use url::Url;

use crate::error::BulkError;

/// Standard `$export` parameters, appended to the export URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportParameters {
    /// `_outputFormat`
    pub output_format: Option<String>,
    /// `_since`
    pub since: Option<OffsetDateTime>,
    /// `_type`, joined with commas.
    pub types: Vec<String>,
    /// `_typeFilter`, one query pair each.
    pub type_filters: Vec<String>,
}

impl ExportParameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = Some(format.into());
        self
    }

    #[must_use]
    pub fn since(mut self, since: OffsetDateTime) -> Self {
        self.since = Some(since);
        self
    }

    #[must_use]
    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.types.push(resource_type.into());
        self
    }

    #[must_use]
    pub fn type_filter(mut self, filter: impl Into<String>) -> Self {
        self.type_filters.push(filter.into());
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns `url` with these parameters appended to its query.
    ///
    /// # Errors
    ///
    /// Returns [`BulkError::InvalidRequest`] if `since` cannot be formatted.
    pub fn apply(&self, url: &Url) -> Result<Url, BulkError> {
        let mut url = url.clone();
        if self.is_empty() {
            return Ok(url);
        }
        let since = self
            .since
            .map(|since| since.format(&Rfc3339))
            .transpose()
            .map_err(|e| BulkError::invalid_request(format!("invalid _since: {e}")))?;

        {
            let mut query = url.query_pairs_mut();
            if let Some(format) = &self.output_format {
                query.append_pair("_outputFormat", format);
            }
            if let Some(since) = &since {
                query.append_pair("_since", since);
            }
            if !self.types.is_empty() {
                query.append_pair("_type", &self.types.join(","));
            }
            for filter in &self.type_filters {
                query.append_pair("_typeFilter", filter);
            }
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn test_apply_appends_parameters() {
        let base = Url::parse("https://fhir.example.com/Group/1/$export?foo=bar").unwrap();
        let url = ExportParameters::new()
            .output_format("application/fhir+ndjson")
            .since(datetime!(2024-01-02 03:04:05 UTC))
            .resource_type("Patient")
            .resource_type("Observation")
            .type_filter("Observation?status=final")
            .apply(&base)
            .unwrap();

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("foo".into(), "bar".into()),
                ("_outputFormat".into(), "application/fhir+ndjson".into()),
                ("_since".into(), "2024-01-02T03:04:05Z".into()),
                ("_type".into(), "Patient,Observation".into()),
                ("_typeFilter".into(), "Observation?status=final".into()),
            ]
        );
    }

    #[test]
    fn test_empty_parameters_keep_url() {
        let base = Url::parse("https://fhir.example.com/$export").unwrap();
        assert_eq!(ExportParameters::new().apply(&base).unwrap(), base);
    }
}
