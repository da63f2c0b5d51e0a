pub mod auth;
pub mod client_ip;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod supabase;
pub mod test_util;
pub mod validation;

pub use auth::{AuthUser, TokenVerifier};
pub use config::Config;
pub use error::AppError;
pub use logging::LogSink;
pub use models::user::{MergedUser, UserStore};
pub use rate_limit::FixedWindowLimiter;
pub use supabase::SupabaseClient;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub tokens: TokenVerifier,
    pub supabase: Arc<SupabaseClient>,
    pub users: UserStore,
    pub rate_limits: Arc<FixedWindowLimiter>,
    pub log_sink: Arc<LogSink>,
    /// When the process started serving; `/health` reports uptime from it.
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, logging::LogSinkError> {
        let supabase = Arc::new(SupabaseClient::from_config(&config.supabase));
        let users = UserStore::new(
            supabase.clone(),
            &config.supabase.users_table,
            config.admin_code(),
        );

        Ok(Self {
            tokens: TokenVerifier::new(&config.supabase.jwt_secret, &config.supabase.jwt_audience),
            users,
            supabase,
            rate_limits: Arc::new(FixedWindowLimiter::from_config(&config.rate_limit)),
            log_sink: Arc::new(LogSink::from_config(&config.logging)?),
            started_at: Instant::now(),
            config,
        })
    }
}

/// CORS for the configured frontend origin, with credentials.
fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true);

    match HeaderValue::from_str(&config.cors.frontend_url) {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            tracing::warn!(
                "Ignoring invalid frontend origin '{}'; cross-origin requests will be refused",
                config.cors.frontend_url
            );
            layer
        }
    }
}

/// The full HTTP pipeline: CORS, tracing, body limit, client IP, logging,
/// then the routes.
pub fn build_app(state: Arc<AppState>) -> Router {
    // Layers run bottom-up: the last one added sees the request first.
    routes::router(state.clone())
        .layer(from_fn_with_state(state.clone(), logging::error_logger))
        .layer(from_fn_with_state(state.clone(), logging::security_logger))
        .layer(from_fn_with_state(state.clone(), logging::request_logger))
        .layer(from_fn_with_state(state.clone(), client_ip::client_ip))
        .layer(DefaultBodyLimit::max(state.config.server.body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
}
