pub mod health;
pub mod users;

use std::sync::Arc;

use axum::{extract::OriginalUri, middleware::from_fn_with_state, Router};
use tower_http::normalize_path::NormalizePath;

use crate::error::AppError;
use crate::rate_limit::standard_limit;
use crate::AppState;

/// Every route the server exposes. A trailing slash is ignored, so
/// `/api/users/` reaches the same handler as `/api/users`.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .nest("/users", users::router(state.clone()))
        .layer(from_fn_with_state(state.clone(), standard_limit));

    let routes = Router::new()
        .merge(health::router(state))
        .nest("/api", api)
        .fallback(not_found);

    // Path rewriting has to happen before routing, so it wraps the routes
    // rather than being layered onto them.
    Router::new().fallback_service(NormalizePath::trim_trailing_slash(routes))
}

async fn not_found(OriginalUri(uri): OriginalUri) -> AppError {
    AppError::NotFound(format!("Route {} not found", uri.path()))
}
