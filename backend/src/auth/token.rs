use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::models::user::{AuthId, DEFAULT_ROLE};

/// Identity of a caller whose access token verified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthUser {
    pub id: AuthId,
    pub email: Option<String>,
    /// Application role from `user_metadata.role`.
    pub role: String,
    pub user_metadata: Map<String, Value>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    /// Admins pass every role check.
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role || self.is_admin()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingHeader,
    #[error("Invalid Authorization header format")]
    InvalidFormat,
    #[error("Token expired")]
    Expired,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let message = match err {
            AuthError::MissingHeader => "Access token required",
            AuthError::InvalidFormat => "Authorization header must be 'Bearer <token>'",
            AuthError::Expired => "Token expired. Please log in again.",
            AuthError::InvalidToken(_) => "Invalid token. Please log in again.",
        };
        AppError::Unauthorized(message.to_string())
    }
}

/// Access token claims issued by the auth service.
#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Option<Map<String, Value>>,
    #[allow(dead_code)]
    exp: u64,
}

/// Verifies HS256 access tokens signed with the project's JWT secret.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "sub", "aud"]);

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Authenticate a request by validating its Bearer token.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthUser, AuthError> {
        let token = bearer_token(headers)?.ok_or(AuthError::MissingHeader)?;
        self.verify(token)
    }

    /// Verify signature, audience and expiry, then build the caller identity.
    pub fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;
        let claims = data.claims;

        let id = claims
            .sub
            .parse()
            .map_err(|_| AuthError::InvalidToken("subject is not a user id".to_string()))?;
        let user_metadata = claims.user_metadata.unwrap_or_default();
        let role = user_metadata
            .get("role")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_ROLE)
            .to_string();

        Ok(AuthUser {
            id,
            email: claims.email,
            role,
            user_metadata,
        })
    }
}

/// The token from `Authorization: Bearer <token>`, or `None` when the header is absent.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, AuthError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| AuthError::InvalidFormat)?;

    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(Some(token.trim()))
        }
        _ => Err(AuthError::InvalidFormat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{generate_expired_jwt, generate_test_jwt, TEST_JWT_SECRET};

    const USER_ID: &str = "0b7f9a44-31e2-4c55-8d3e-6a2f1c9b8e70";

    fn verifier() -> TokenVerifier {
        TokenVerifier::new(TEST_JWT_SECRET, "authenticated")
    }

    fn headers_with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_verify_valid_token() {
        let token = generate_test_jwt(USER_ID, Some("sam@fitsync.app"), Some("premium"));
        let user = verifier().verify(&token).unwrap();
        assert_eq!(user.id.to_string(), USER_ID);
        assert_eq!(user.email.as_deref(), Some("sam@fitsync.app"));
        assert_eq!(user.role, "premium");
    }

    #[test]
    fn test_role_defaults_to_user() {
        let token = generate_test_jwt(USER_ID, None, None);
        let user = verifier().verify(&token).unwrap();
        assert_eq!(user.role, "user");
        assert!(!user.is_admin());
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = generate_expired_jwt(USER_ID);
        assert!(matches!(verifier().verify(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = generate_test_jwt(USER_ID, None, Some("admin"));
        let other = TokenVerifier::new("a-completely-different-secret", "authenticated");
        assert!(matches!(other.verify(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let token = generate_test_jwt(USER_ID, None, None);
        let other = TokenVerifier::new(TEST_JWT_SECRET, "service_role");
        assert!(matches!(other.verify(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_non_uuid_subject_rejected() {
        let token = generate_test_jwt("not-a-uuid", None, None);
        assert!(matches!(verifier().verify(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(matches!(
            verifier().verify("not.a.jwt"),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_authenticate_missing_header() {
        let result = verifier().authenticate(&HeaderMap::new());
        assert!(matches!(result, Err(AuthError::MissingHeader)));
    }

    #[test]
    fn test_authenticate_basic_scheme_rejected() {
        let result = verifier().authenticate(&headers_with_auth("Basic dXNlcjpwYXNz"));
        assert!(matches!(result, Err(AuthError::InvalidFormat)));
    }

    #[test]
    fn test_authenticate_bearer_without_token() {
        let result = verifier().authenticate(&headers_with_auth("Bearer "));
        assert!(matches!(result, Err(AuthError::InvalidFormat)));
    }

    #[test]
    fn test_authenticate_valid_bearer() {
        let token = generate_test_jwt(USER_ID, None, Some("admin"));
        let user = verifier()
            .authenticate(&headers_with_auth(&format!("Bearer {}", token)))
            .unwrap();
        assert!(user.is_admin());
    }

    #[test]
    fn test_has_role_admin_passes_everything() {
        let token = generate_test_jwt(USER_ID, None, Some("admin"));
        let admin = verifier().verify(&token).unwrap();
        assert!(admin.has_role("premium"));
        assert!(admin.has_role("admin"));

        let token = generate_test_jwt(USER_ID, None, Some("premium"));
        let premium = verifier().verify(&token).unwrap();
        assert!(premium.has_role("premium"));
        assert!(!premium.has_role("admin"));
    }

    #[test]
    fn test_auth_error_maps_to_unauthorized() {
        for err in [
            AuthError::MissingHeader,
            AuthError::InvalidFormat,
            AuthError::Expired,
            AuthError::InvalidToken("bad".to_string()),
        ] {
            let app: AppError = err.into();
            assert_eq!(app.status_code(), axum::http::StatusCode::UNAUTHORIZED);
        }
    }
}
