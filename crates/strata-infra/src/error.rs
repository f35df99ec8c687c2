//! HTTP error body
//!
//! The `IntoResponse` implementation lives in the API crate: axum's trait and
//! `strata_core::AppError` are both foreign here, so the orphan rule keeps the
//! conversion next to the router.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Standard error response format for HTTP APIs
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-readable error code for programmatic handling
    pub code: String,
    /// Whether retrying the same request may succeed
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            recoverable: false,
            suggested_action: None,
            details: None,
            error_type: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_fields_omitted() {
        let body = serde_json::to_value(ErrorResponse::new("Not found: x", "NOT_FOUND")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"error": "Not found: x", "code": "NOT_FOUND", "recoverable": false})
        );
    }

    #[test]
    fn test_camel_case_fields() {
        let mut response = ErrorResponse::new("x", "CONFLICT");
        response.suggested_action = Some("Rename".to_string());
        response.error_type = Some("Conflict".to_string());
        let body = serde_json::to_value(response).unwrap();
        assert_eq!(body["suggestedAction"], "Rename");
        assert_eq!(body["errorType"], "Conflict");
    }
}
