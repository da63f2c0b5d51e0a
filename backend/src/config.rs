//! Configuration for the FitSync backend.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Runtime mode; "development" exposes error details in responses.
    #[serde(default = "default_environment")]
    pub environment: String,
    pub supabase: SupabaseConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Number of reverse proxies in front of the server. The client IP is
    /// the `X-Forwarded-For` entry this many positions from the right;
    /// 0 uses the socket peer.
    #[serde(default = "default_trusted_proxies")]
    pub trusted_proxies: usize,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            trusted_proxies: default_trusted_proxies(),
            body_limit_bytes: default_body_limit(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

/// Supabase project settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseConfig {
    /// Project URL, e.g. https://abcd.supabase.co
    pub url: String,
    /// Public key used for password sign-in.
    pub anon_key: String,
    /// Service role key used for the auth admin API and table access.
    pub service_role_key: String,
    /// HS256 secret the project signs access tokens with.
    pub jwt_secret: String,
    #[serde(default = "default_jwt_audience")]
    pub jwt_audience: String,
    #[serde(default = "default_users_table")]
    pub users_table: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            frontend_url: default_frontend_url(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Signup code that grants the admin role. Admin signup is disabled when unset.
    #[serde(default)]
    pub admin_code: Option<String>,
}

/// A fixed window: at most `max` requests every `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct WindowConfig {
    pub window_secs: u64,
    pub max: u32,
}

/// Per-role limits for authenticated routes, sharing one window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RoleTierConfig {
    pub window_secs: u64,
    pub admin: u32,
    pub premium: u32,
    pub user: u32,
    pub anonymous: u32,
}

impl Default for RoleTierConfig {
    fn default() -> Self {
        Self {
            window_secs: 15 * 60,
            admin: 1000,
            premium: 500,
            user: 100,
            anonymous: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum number of tracked keys before the least recently used is evicted.
    #[serde(default = "default_rate_limit_capacity")]
    pub capacity: usize,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_standard_window")]
    pub standard: WindowConfig,
    #[serde(default = "default_auth_window")]
    pub auth: WindowConfig,
    #[serde(default)]
    pub tiers: RoleTierConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_rate_limit_capacity(),
            sweep_interval_secs: default_sweep_interval(),
            standard: default_standard_window(),
            auth: default_auth_window(),
            tiers: RoleTierConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory holding access.log and error.log.
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_rotation_interval")]
    pub rotation_interval_secs: u64,
    #[serde(default = "default_slow_request_ms")]
    pub slow_request_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: default_log_dir(),
            max_file_bytes: default_max_file_bytes(),
            rotation_interval_secs: default_rotation_interval(),
            slow_request_ms: default_slow_request_ms(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5001
}
fn default_trusted_proxies() -> usize {
    1
}
fn default_body_limit() -> usize {
    10 * 1024 * 1024
}
fn default_shutdown_timeout() -> u64 {
    10
}
fn default_environment() -> String {
    "development".to_string()
}
fn default_jwt_audience() -> String {
    "authenticated".to_string()
}
fn default_users_table() -> String {
    "users".to_string()
}
fn default_frontend_url() -> String {
    "http://localhost:5173".to_string()
}
fn default_rate_limit_capacity() -> usize {
    10_000
}
fn default_sweep_interval() -> u64 {
    5 * 60
}
fn default_standard_window() -> WindowConfig {
    WindowConfig {
        window_secs: 15 * 60,
        max: 100,
    }
}
fn default_auth_window() -> WindowConfig {
    WindowConfig {
        window_secs: 15 * 60,
        max: 5,
    }
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_rotation_interval() -> u64 {
    24 * 60 * 60
}
fn default_slow_request_ms() -> u64 {
    1000
}

/// Flat variables kept for compatibility with existing `.env` files.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("HOST", "server.host"),
    ("PORT", "server.port"),
    ("APP_ENV", "environment"),
    ("SUPABASE_URL", "supabase.url"),
    ("SUPABASE_ANON_KEY", "supabase.anon_key"),
    ("SUPABASE_SERVICE_ROLE_KEY", "supabase.service_role_key"),
    ("SUPABASE_JWT_SECRET", "supabase.jwt_secret"),
    ("FRONTEND_URL", "cors.frontend_url"),
    ("ADMIN_CODE", "auth.admin_code"),
    ("LOG_LEVEL", "logging.level"),
];

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Flat variables (PORT, SUPABASE_URL, ADMIN_CODE, ...)
    /// 2. Environment variables (FITSYNC__SECTION__KEY format)
    /// 3. config.toml file (if present)
    /// 4. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = ConfigLoader::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("FITSYNC")
                    .separator("__")
                    .try_parsing(true),
            );

        for (var, key) in LEGACY_ENV {
            builder = builder.set_override_option(*key, std::env::var(var).ok())?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Admin code, ignoring blank values.
    pub fn admin_code(&self) -> Option<&str> {
        self.auth
            .admin_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        let json = serde_json::json!({
            "supabase": {
                "url": "https://project.supabase.co",
                "anon_key": "anon",
                "service_role_key": "service",
                "jwt_secret": "secret"
            }
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_default_server_config() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 5001);
        assert_eq!(server.trusted_proxies, 1);
        assert_eq!(server.body_limit_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_default_rate_limits() {
        let limits = RateLimitConfig::default();
        assert_eq!(limits.standard, WindowConfig { window_secs: 900, max: 100 });
        assert_eq!(limits.auth, WindowConfig { window_secs: 900, max: 5 });
        assert_eq!(limits.tiers.admin, 1000);
        assert_eq!(limits.tiers.anonymous, 50);
        assert_eq!(limits.sweep_interval_secs, 300);
    }

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config = minimal();
        assert!(config.is_development());
        assert_eq!(config.supabase.jwt_audience, "authenticated");
        assert_eq!(config.supabase.users_table, "users");
        assert_eq!(config.cors.frontend_url, "http://localhost:5173");
        assert_eq!(config.logging.dir, "logs");
        assert!(config.admin_code().is_none());
    }

    #[test]
    fn test_blank_admin_code_is_disabled() {
        let mut config = minimal();
        config.auth.admin_code = Some("   ".to_string());
        assert!(config.admin_code().is_none());

        config.auth.admin_code = Some("coach-2024".to_string());
        assert_eq!(config.admin_code(), Some("coach-2024"));
    }

    #[test]
    fn test_production_is_not_development() {
        let mut config = minimal();
        config.environment = "production".to_string();
        assert!(!config.is_development());
    }
}
