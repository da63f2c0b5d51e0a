//! Helpers shared by unit and integration tests.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

use crate::config::{
    AuthConfig, Config, CorsConfig, LoggingConfig, RateLimitConfig, ServerConfig, SupabaseConfig,
};
use crate::AppState;

pub const TEST_JWT_SECRET: &str = "fitsync-test-secret-that-is-long-enough";
pub const TEST_ADMIN_CODE: &str = "coach-2024";

/// Config pointing at a mock Supabase, writing logs under `log_dir`.
pub fn test_config(supabase_url: &str, log_dir: &Path) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        },
        environment: "test".to_string(),
        supabase: SupabaseConfig {
            url: supabase_url.to_string(),
            anon_key: "test-anon-key".to_string(),
            service_role_key: "test-service-role-key".to_string(),
            jwt_secret: TEST_JWT_SECRET.to_string(),
            jwt_audience: "authenticated".to_string(),
            users_table: "users".to_string(),
        },
        cors: CorsConfig::default(),
        auth: AuthConfig {
            admin_code: Some(TEST_ADMIN_CODE.to_string()),
        },
        rate_limit: RateLimitConfig::default(),
        logging: LoggingConfig {
            dir: log_dir.to_string_lossy().into_owned(),
            ..LoggingConfig::default()
        },
    }
}

pub fn create_test_state(config: Config) -> Arc<AppState> {
    Arc::new(AppState::new(config).expect("log directory should be writable"))
}

fn sign(claims: serde_json::Value) -> String {
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("test token should encode")
}

/// HS256 access token shaped like the auth service's, valid for an hour.
pub fn generate_test_jwt(sub: &str, email: Option<&str>, role: Option<&str>) -> String {
    let mut user_metadata = serde_json::Map::new();
    if let Some(role) = role {
        user_metadata.insert("role".to_string(), json!(role));
    }

    sign(json!({
        "sub": sub,
        "aud": "authenticated",
        "role": "authenticated",
        "email": email,
        "user_metadata": user_metadata,
        "iat": Utc::now().timestamp(),
        "exp": (Utc::now() + Duration::hours(1)).timestamp(),
    }))
}

/// Token that expired an hour ago, well past the default leeway.
pub fn generate_expired_jwt(sub: &str) -> String {
    sign(json!({
        "sub": sub,
        "aud": "authenticated",
        "iat": (Utc::now() - Duration::hours(2)).timestamp(),
        "exp": (Utc::now() - Duration::hours(1)).timestamp(),
    }))
}
