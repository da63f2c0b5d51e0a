//! Request validation.
//!
//! Bodies are checked as raw JSON against a field schema before they are
//! deserialized, so every problem is reported at once and unknown fields
//! are dropped.

use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use fitsync_common::{CreateUserRequest, LoginRequest, SignupRequest, ValidationIssue};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::models::user::{AuthId, RowId, UserKey};

pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 30;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]{2,}$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Any,
    Email,
    Guid,
}

/// Constraints on one string field of a JSON object.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    name: &'static str,
    required: bool,
    allow_empty: bool,
    format: Format,
    min: Option<usize>,
    max: Option<usize>,
}

impl FieldRule {
    pub const fn string(name: &'static str) -> Self {
        Self {
            name,
            required: false,
            allow_empty: false,
            format: Format::Any,
            min: None,
            max: None,
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn allow_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }

    pub const fn email(mut self) -> Self {
        self.format = Format::Email;
        self
    }

    pub const fn guid(mut self) -> Self {
        self.format = Format::Guid;
        self
    }

    pub const fn min(mut self, len: usize) -> Self {
        self.min = Some(len);
        self
    }

    pub const fn max(mut self, len: usize) -> Self {
        self.max = Some(len);
        self
    }

    fn issue(&self, message: String, kind: &str) -> ValidationIssue {
        ValidationIssue {
            message,
            path: vec![self.name.to_string()],
            kind: kind.to_string(),
        }
    }

    /// First violation of this rule, if any.
    fn check(&self, value: Option<&Value>) -> Option<ValidationIssue> {
        let label = format!("\"{}\"", self.name);

        let value = match value {
            None | Some(Value::Null) => {
                return self
                    .required
                    .then(|| self.issue(format!("{} is required", label), "any.required"));
            }
            Some(value) => value,
        };

        let Some(s) = value.as_str() else {
            return Some(self.issue(format!("{} must be a string", label), "string.base"));
        };

        if s.is_empty() {
            if self.allow_empty {
                return None;
            }
            return Some(self.issue(
                format!("{} is not allowed to be empty", label),
                "string.empty",
            ));
        }

        let len = s.chars().count();
        if let Some(min) = self.min.filter(|min| len < *min) {
            return Some(self.issue(
                format!("{} length must be at least {} characters long", label, min),
                "string.min",
            ));
        }
        if let Some(max) = self.max.filter(|max| len > *max) {
            return Some(self.issue(
                format!(
                    "{} length must be less than or equal to {} characters long",
                    label, max
                ),
                "string.max",
            ));
        }

        match self.format {
            Format::Email if !EMAIL.is_match(s) => Some(self.issue(
                format!("{} must be a valid email", label),
                "string.email",
            )),
            Format::Guid if uuid::Uuid::parse_str(s).is_err() => Some(self.issue(
                format!("{} must be a valid GUID", label),
                "string.guid",
            )),
            _ => None,
        }
    }
}

/// The fields an object may carry.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    fields: &'static [FieldRule],
}

impl Schema {
    pub const fn new(fields: &'static [FieldRule]) -> Self {
        Self { fields }
    }

    /// Validate an object, returning it without unknown fields.
    pub fn validate(&self, value: &Value) -> Result<Map<String, Value>, Vec<ValidationIssue>> {
        let Some(object) = value.as_object() else {
            return Err(vec![ValidationIssue {
                message: "\"value\" must be of type object".to_string(),
                path: Vec::new(),
                kind: "object.base".to_string(),
            }]);
        };

        let issues: Vec<ValidationIssue> = self
            .fields
            .iter()
            .filter_map(|rule| rule.check(object.get(rule.name)))
            .collect();
        if !issues.is_empty() {
            return Err(issues);
        }

        Ok(self
            .fields
            .iter()
            .filter_map(|rule| {
                object
                    .get(rule.name)
                    .filter(|v| !v.is_null())
                    .map(|v| (rule.name.to_string(), v.clone()))
            })
            .collect())
    }
}

const SIGNUP_FIELDS: &[FieldRule] = &[
    FieldRule::string("email").required().email(),
    FieldRule::string("password").required().min(MIN_PASSWORD_LENGTH),
    FieldRule::string("username")
        .min(MIN_USERNAME_LENGTH)
        .max(MAX_USERNAME_LENGTH),
    FieldRule::string("adminCode").allow_empty(),
];
pub static SIGNUP: Schema = Schema::new(SIGNUP_FIELDS);

const LOGIN_FIELDS: &[FieldRule] = &[
    FieldRule::string("email").required().email(),
    FieldRule::string("password").required(),
];
pub static LOGIN: Schema = Schema::new(LOGIN_FIELDS);

const CREATE_USER_FIELDS: &[FieldRule] = &[
    FieldRule::string("username")
        .required()
        .min(MIN_USERNAME_LENGTH)
        .max(MAX_USERNAME_LENGTH),
    FieldRule::string("email").required().email(),
    FieldRule::string("password").min(MIN_PASSWORD_LENGTH),
];
pub static CREATE_USER: Schema = Schema::new(CREATE_USER_FIELDS);

const USER_ID: FieldRule = FieldRule::string("id").required().guid();

/// A request body with a validation schema.
pub trait Validate: DeserializeOwned {
    fn schema() -> &'static Schema;
}

impl Validate for SignupRequest {
    fn schema() -> &'static Schema {
        &SIGNUP
    }
}

impl Validate for LoginRequest {
    fn schema() -> &'static Schema {
        &LOGIN
    }
}

impl Validate for CreateUserRequest {
    fn schema() -> &'static Schema {
        &CREATE_USER
    }
}

/// JSON body extractor that validates against `T::schema()` first.
#[derive(Debug, Clone)]
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: Validate,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<Value>::from_request(req, state)
            .await
            .map_err(|rejection| {
                AppError::validation(vec![ValidationIssue {
                    message: rejection.body_text(),
                    path: Vec::new(),
                    kind: "object.base".to_string(),
                }])
            })?;

        let cleaned = T::schema().validate(&value).map_err(AppError::validation)?;
        let body = serde_json::from_value(Value::Object(cleaned))
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        Ok(ValidatedJson(body))
    }
}

/// Query string of `GET /api/users/id/:id`.
#[derive(Debug, Default, Deserialize)]
pub struct UserIdQuery {
    #[serde(default)]
    pub by: Option<String>,
}

/// Validate a user id path segment and the identifier space it is in.
pub fn user_key(id: &str, by: Option<&str>) -> Result<UserKey, AppError> {
    let mut issues = Vec::new();

    if let Some(issue) = USER_ID.check(Some(&Value::String(id.to_string()))) {
        issues.push(issue);
    }
    let by = by.unwrap_or("auth");
    if by != "auth" && by != "row" {
        issues.push(ValidationIssue {
            message: "\"by\" must be one of [auth, row]".to_string(),
            path: vec!["by".to_string()],
            kind: "any.only".to_string(),
        });
    }
    if !issues.is_empty() {
        return Err(AppError::validation(issues));
    }

    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|_| AppError::BadRequest("Invalid ID format".to_string()))?;
    Ok(match by {
        "row" => UserKey::Row(RowId(uuid)),
        _ => UserKey::Auth(AuthId(uuid)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn messages(result: Result<Map<String, Value>, Vec<ValidationIssue>>) -> Vec<String> {
        result.unwrap_err().into_iter().map(|i| i.message).collect()
    }

    #[rstest]
    #[case(json!({"password": "secret1"}), "\"email\" is required")]
    #[case(json!({"email": "nope", "password": "secret1"}), "\"email\" must be a valid email")]
    #[case(json!({"email": "a@b.co", "password": "abc"}), "\"password\" length must be at least 6 characters long")]
    #[case(json!({"email": "a@b.co", "password": "secret1", "username": "ab"}), "\"username\" length must be at least 3 characters long")]
    #[case(json!({"email": "a@b.co", "password": "secret1", "username": "a".repeat(31)}), "\"username\" length must be less than or equal to 30 characters long")]
    #[case(json!({"email": 42, "password": "secret1"}), "\"email\" must be a string")]
    #[case(json!({"email": "a@b.co", "password": ""}), "\"password\" is not allowed to be empty")]
    fn test_signup_rejects(#[case] body: Value, #[case] expected: &str) {
        assert_eq!(messages(SIGNUP.validate(&body)), vec![expected.to_string()]);
    }

    #[test]
    fn test_collects_every_issue() {
        let issues = SIGNUP.validate(&json!({})).unwrap_err();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].path, vec!["email"]);
        assert_eq!(issues[1].kind, "any.required");
    }

    #[test]
    fn test_strips_unknown_fields() {
        let cleaned = SIGNUP
            .validate(&json!({
                "email": "jordan@fitsync.app",
                "password": "secret1",
                "adminCode": "",
                "isAdmin": true
            }))
            .unwrap();
        assert!(cleaned.get("isAdmin").is_none());
        assert_eq!(cleaned.get("adminCode"), Some(&json!("")));
    }

    #[test]
    fn test_non_object_body() {
        let issues = LOGIN.validate(&json!(["a"])).unwrap_err();
        assert_eq!(issues[0].kind, "object.base");
    }

    #[rstest]
    #[case(json!({"email": "a@b.co", "password": "x"}), true)]
    #[case(json!({"email": "a@b.co"}), false)]
    #[case(json!({"email": "a@b", "password": "x"}), false)]
    fn test_login_schema(#[case] body: Value, #[case] ok: bool) {
        assert_eq!(LOGIN.validate(&body).is_ok(), ok);
    }

    #[rstest]
    #[case(json!({"username": "runner", "email": "r@b.co"}), true)]
    #[case(json!({"username": "runner", "email": "r@b.co", "password": "secret1"}), true)]
    #[case(json!({"username": "runner", "email": "r@b.co", "password": "123"}), false)]
    #[case(json!({"email": "r@b.co"}), false)]
    fn test_create_user_schema(#[case] body: Value, #[case] ok: bool) {
        assert_eq!(CREATE_USER.validate(&body).is_ok(), ok);
    }

    #[test]
    fn test_user_key_defaults_to_auth() {
        let id = "6f1c2a2e-5b8d-4f0a-9a53-0d7a3b1c9e11";
        assert!(matches!(user_key(id, None), Ok(UserKey::Auth(_))));
        assert!(matches!(user_key(id, Some("row")), Ok(UserKey::Row(_))));
    }

    #[test]
    fn test_user_key_rejects_bad_input() {
        let err = user_key("123", Some("email")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "\"id\" must be a valid GUID, \"by\" must be one of [auth, row]"
        );
    }
}
