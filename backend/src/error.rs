//! Application error taxonomy and its JSON rendering.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fitsync_common::{ErrorBody, ValidationIssue};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::supabase::SupabaseError;

static DUPLICATE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Key \((.+?)\)=").expect("valid regex"));
static NULL_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"column "([^"]+)""#).expect("valid regex"));

/// Every failure a handler can surface to the client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Vec<ValidationIssue>,
    },
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{message}")]
    RateLimited {
        message: String,
        retry_after_secs: u64,
    },
    #[error("{0}")]
    Internal(String),
}

/// Attached to error responses so the error logger can record them
/// and, in development, expose the debug rendering.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub body: ErrorBody,
    pub trace: String,
}

impl AppError {
    pub fn validation(details: Vec<ValidationIssue>) -> Self {
        let message = details
            .iter()
            .map(|issue| issue.message.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        AppError::Validation { message, details }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "Validation failed",
            AppError::BadRequest(_) => "Bad Request",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Forbidden(_) => "Insufficient permissions",
            AppError::NotFound(_) => "Not Found",
            AppError::Conflict(_) => "Conflict",
            AppError::RateLimited { .. } => "Rate limit exceeded",
            AppError::Internal(_) => "Internal Server Error",
        }
    }

    pub fn body(&self) -> ErrorBody {
        let mut body = ErrorBody::new(self.label(), self.to_string(), self.status_code().as_u16());
        match self {
            AppError::Validation { details, .. } => body.details = Some(details.clone()),
            AppError::RateLimited {
                retry_after_secs, ..
            } => body.retry_after = Some(*retry_after_secs),
            _ => {}
        }
        body
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = self.body();
        let report = ErrorReport {
            body: body.clone(),
            trace: format!("{:?}", self),
        };

        let mut response = (self.status_code(), Json(body)).into_response();
        response.extensions_mut().insert(report);
        response
    }
}

impl From<SupabaseError> for AppError {
    fn from(err: SupabaseError) -> Self {
        tracing::debug!("Mapping Supabase error: {:?}", err);
        match &err {
            SupabaseError::Postgrest {
                code: Some(code),
                message,
                details,
                ..
            } => match code.as_str() {
                "23505" => {
                    let field = details
                        .as_deref()
                        .and_then(|d| DUPLICATE_KEY.captures(d))
                        .map(|c| c[1].to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    AppError::Conflict(format!(
                        "Duplicate field value: {}. Please use another value.",
                        field
                    ))
                }
                "23503" => AppError::BadRequest("Referenced record does not exist".to_string()),
                "23502" => {
                    let field = NULL_COLUMN
                        .captures(message)
                        .map(|c| c[1].to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    AppError::BadRequest(format!("Field '{}' is required", field))
                }
                "22P02" => AppError::BadRequest("Invalid ID format".to_string()),
                _ => AppError::Internal(err.to_string()),
            },
            SupabaseError::Auth {
                status,
                code,
                message,
            } => map_auth_error(*status, code.as_deref(), message),
            _ => AppError::Internal(err.to_string()),
        }
    }
}

fn map_auth_error(status: u16, code: Option<&str>, message: &str) -> AppError {
    let lower = message.to_lowercase();

    if message.contains("JWT") || code == Some("bad_jwt") {
        return AppError::Unauthorized("Invalid or expired token".to_string());
    }
    if lower.contains("invalid login credentials")
        || matches!(code, Some("invalid_credentials") | Some("invalid_grant"))
    {
        return AppError::Unauthorized("Invalid email or password".to_string());
    }
    if lower.contains("email not confirmed") || code == Some("email_not_confirmed") {
        return AppError::Unauthorized(
            "Please confirm your email address before logging in".to_string(),
        );
    }
    if lower.contains("already been registered")
        || lower.contains("already registered")
        || matches!(code, Some("email_exists") | Some("user_already_exists"))
    {
        return AppError::Conflict("User with this email already exists".to_string());
    }

    match status {
        404 => AppError::NotFound(message.to_string()),
        400..=499 => AppError::BadRequest(message.to_string()),
        _ => AppError::Internal(message.to_string()),
    }
}
