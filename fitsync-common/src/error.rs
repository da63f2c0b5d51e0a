//! JSON error envelope returned by every failing endpoint.

use serde::{Deserialize, Serialize};

/// One schema violation found while validating a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub message: String,
    pub path: Vec<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

/// `{ error, message, statusCode }` plus optional extras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Short label for the failure class, e.g. "Validation failed".
    pub error: String,
    pub message: String,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationIssue>>,
    #[serde(rename = "retryAfter", default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Debug rendering of the underlying error; only sent in development.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, message: impl Into<String>, status_code: u16) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status_code,
            details: None,
            retry_after: None,
            stack: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_wire_names() {
        let mut body = ErrorBody::new("Rate limit exceeded", "slow down", 429);
        body.retry_after = Some(30);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["statusCode"], 429);
        assert_eq!(json["retryAfter"], 30);
        assert!(json.get("details").is_none());
        assert!(json.get("stack").is_none());
    }

    #[test]
    fn test_validation_issue_type_field() {
        let issue = ValidationIssue {
            message: "\"email\" is required".to_string(),
            path: vec!["email".to_string()],
            kind: "any.required".to_string(),
        };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["type"], "any.required");
    }
}
