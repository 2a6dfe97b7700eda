//! Request payloads for the two calls the service answers.
//!
//! Requests are validated before the engine sees them, so the resolvers can
//! assume every required field is present and non-empty. Payloads are serde
//! types; the JSON field names match what build clients send.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::record::TaskMetadata;

/// Conservative upper bound for any single text field.
pub const MAX_FIELD_LEN: usize = 16 * 1024;

/// Validate a required, non-empty field.
fn validate_required(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField {
            field: field.to_string(),
        });
    }
    validate_length(field, value)
}

fn validate_length(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.len() > MAX_FIELD_LEN {
        return Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length: MAX_FIELD_LEN,
        });
    }
    Ok(())
}

fn validate_optional(field: &'static str, value: Option<&String>) -> Result<(), ValidationError> {
    value.map_or(Ok(()), |v| validate_length(field, v))
}

/// Read call: which unihash is this taskhash equivalent to?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetEquivalentRequest {
    /// Hashing method name.
    pub method: String,
    /// Input hash to resolve.
    pub taskhash: String,
}

impl GetEquivalentRequest {
    /// Build a lookup request.
    #[must_use]
    pub fn new(method: impl Into<String>, taskhash: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            taskhash: taskhash.into(),
        }
    }

    /// Check required fields.
    ///
    /// # Errors
    /// `MissingField` for an empty field, `FieldTooLong` for an oversized one.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_required("method", &self.method)?;
        validate_required("taskhash", &self.taskhash)
    }
}

/// Write call: report that `taskhash` produced `outhash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEquivalentRequest {
    /// Hashing method name.
    pub method: String,
    /// Hash of the produced output.
    pub outhash: String,
    /// Hash of the task's inputs.
    pub taskhash: String,
    /// The unihash the caller would use if this output is new.
    pub unihash: String,
    /// Optional descriptive fields, stored verbatim.
    #[serde(flatten)]
    pub metadata: TaskMetadata,
}

impl ReportEquivalentRequest {
    /// Build a report with empty metadata.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        outhash: impl Into<String>,
        taskhash: impl Into<String>,
        unihash: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            outhash: outhash.into(),
            taskhash: taskhash.into(),
            unihash: unihash.into(),
            metadata: TaskMetadata::default(),
        }
    }

    /// Attach descriptive metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: TaskMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Check required fields and metadata lengths.
    ///
    /// # Errors
    /// `MissingField` for an empty required field, `FieldTooLong` for any
    /// oversized field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_required("method", &self.method)?;
        validate_required("outhash", &self.outhash)?;
        validate_required("taskhash", &self.taskhash)?;
        validate_required("unihash", &self.unihash)?;

        let m = &self.metadata;
        validate_optional("owner", m.owner.as_ref())?;
        validate_optional("PN", m.pn.as_ref())?;
        validate_optional("PV", m.pv.as_ref())?;
        validate_optional("PR", m.pr.as_ref())?;
        validate_optional("task", m.task.as_ref())?;
        validate_optional("outhash_siginfo", m.outhash_siginfo.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_request_requires_fields() {
        assert!(GetEquivalentRequest::new("TestMethod", "abc").validate().is_ok());

        let err = GetEquivalentRequest::new("", "abc").validate().unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { ref field } if field == "method"));

        let err = GetEquivalentRequest::new("TestMethod", "  ").validate().unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { ref field } if field == "taskhash"));
    }

    #[test]
    fn test_report_request_requires_unihash() {
        let err = ReportEquivalentRequest::new("TestMethod", "out", "task", "")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { ref field } if field == "unihash"));
    }

    #[test]
    fn test_report_request_rejects_oversized_metadata() {
        let req = ReportEquivalentRequest::new("TestMethod", "out", "task", "uni").with_metadata(
            TaskMetadata {
                outhash_siginfo: Some("x".repeat(MAX_FIELD_LEN + 1)),
                ..TaskMetadata::default()
            },
        );
        let err = req.validate().unwrap_err();
        assert!(
            matches!(err, ValidationError::FieldTooLong { ref field, .. } if field == "outhash_siginfo")
        );
    }

    #[test]
    fn test_report_request_from_client_json() {
        let json = r#"{
            "method": "TestMethod",
            "outhash": "o",
            "taskhash": "t",
            "unihash": "u",
            "owner": "autobuilder",
            "PN": "zlib",
            "task": "do_package"
        }"#;
        let req: ReportEquivalentRequest = serde_json::from_str(json).unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.metadata.owner.as_deref(), Some("autobuilder"));
        assert_eq!(req.metadata.pn.as_deref(), Some("zlib"));
        assert_eq!(req.metadata.task.as_deref(), Some("do_package"));
        assert!(req.metadata.pv.is_none());
    }

    #[test]
    fn test_missing_json_field_fails_to_parse() {
        let json = r#"{"method": "TestMethod", "outhash": "o", "taskhash": "t"}"#;
        assert!(serde_json::from_str::<ReportEquivalentRequest>(json).is_err());
    }
}
