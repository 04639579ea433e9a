// Document analysis service boundary

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Structured result of analyzing a photographed document.
///
/// The fields are consumed for display only; nothing downstream parses
/// them further.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub document_kind: String,
    pub summary: String,
    pub key_points: Vec<String>,
}

/// Upstream OCR/simplification service.
///
/// Treated as an opaque request/response boundary: one attempt per user
/// action, no retry policy here. Failures come back categorized so the
/// host can surface a user-facing message.
pub trait DocumentAnalyzer {
    fn analyze(&self, image: &[u8]) -> Result<DocumentReport, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_parses_from_service_json() {
        let json = r#"{
            "document_kind": "lab result",
            "summary": "Routine bloodwork, all values in range.",
            "key_points": ["Cholesterol normal", "No follow-up needed"]
        }"#;
        let report: DocumentReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.document_kind, "lab result");
        assert_eq!(report.key_points.len(), 2);
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let json = r#"{"summary": "no kind field"}"#;
        assert!(serde_json::from_str::<DocumentReport>(json).is_err());
    }
}
