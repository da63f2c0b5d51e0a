use serde::Deserialize;
use serde_json::Value;

/// Errors returned by the Supabase client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SupabaseError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// Error reported by the auth service.
    #[error("{message}")]
    Auth {
        status: u16,
        code: Option<String>,
        message: String,
    },
    /// Error reported by the table API, usually carrying a Postgres SQLSTATE code.
    #[error("{message}")]
    Postgrest {
        status: u16,
        code: Option<String>,
        message: String,
        details: Option<String>,
    },
}

impl SupabaseError {
    pub fn status(&self) -> Option<u16> {
        match self {
            SupabaseError::Auth { status, .. } | SupabaseError::Postgrest { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            SupabaseError::Auth { code, .. } | SupabaseError::Postgrest { code, .. } => {
                code.as_deref()
            }
            _ => None,
        }
    }
}

/// The auth service answers errors in two shapes:
/// `{code, error_code, msg}` and the OAuth-style `{error, error_description}`.
#[derive(Debug, Default, Deserialize)]
struct AuthErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PostgrestErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<Value>,
}

pub(crate) fn auth_error(status: u16, body: &str) -> SupabaseError {
    let parsed: AuthErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .msg
        .or(parsed.message)
        .or(parsed.error_description)
        .or_else(|| parsed.error.clone())
        .unwrap_or_else(|| fallback_message(status, body));
    SupabaseError::Auth {
        status,
        code: parsed.error_code.or(parsed.error),
        message,
    }
}

pub(crate) fn postgrest_error(status: u16, body: &str) -> SupabaseError {
    let parsed: PostgrestErrorBody = serde_json::from_str(body).unwrap_or_default();
    SupabaseError::Postgrest {
        status,
        code: parsed.code,
        message: parsed
            .message
            .unwrap_or_else(|| fallback_message(status, body)),
        details: parsed.details.and_then(|d| match d {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        }),
    }
}

fn fallback_message(status: u16, body: &str) -> String {
    if body.trim().is_empty() {
        format!("request failed with status {}", status)
    } else {
        format!("{}: {}", status, body.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_gotrue_shape() {
        let err = auth_error(
            422,
            r#"{"code":422,"error_code":"email_exists","msg":"A user with this email address has already been registered"}"#,
        );
        assert_eq!(err.status(), Some(422));
        assert_eq!(err.code(), Some("email_exists"));
        assert!(err.to_string().contains("already been registered"));
    }

    #[test]
    fn test_auth_error_oauth_shape() {
        let err = auth_error(
            400,
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        );
        assert_eq!(err.code(), Some("invalid_grant"));
        assert_eq!(err.to_string(), "Invalid login credentials");
    }

    #[test]
    fn test_auth_error_non_json_body() {
        let err = auth_error(502, "Bad Gateway");
        assert_eq!(err.to_string(), "502: Bad Gateway");
        assert!(err.code().is_none());
    }

    #[test]
    fn test_postgrest_error_with_details() {
        let err = postgrest_error(
            409,
            r#"{"code":"23505","details":"Key (email)=(a@b.co) already exists.","hint":null,"message":"duplicate key value violates unique constraint \"users_email_key\""}"#,
        );
        match err {
            SupabaseError::Postgrest { code, details, .. } => {
                assert_eq!(code.as_deref(), Some("23505"));
                assert_eq!(details.as_deref(), Some("Key (email)=(a@b.co) already exists."));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_postgrest_error_empty_body() {
        let err = postgrest_error(500, "");
        assert_eq!(err.to_string(), "request failed with status 500");
    }
}
