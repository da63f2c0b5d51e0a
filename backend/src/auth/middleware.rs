//! Authentication middleware and extractors.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};

use super::token::AuthUser;
use crate::error::AppError;
use crate::AppState;

/// Middleware that rejects requests without a valid Bearer token.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = state.tokens.authenticate(request.headers()).map_err(|e| {
        tracing::debug!("Rejected request to {}: {}", request.uri().path(), e);
        AppError::from(e)
    })?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Middleware that attaches the caller's identity when a valid token is
/// present and lets the request through either way.
pub async fn optional_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    match state.tokens.authenticate(request.headers()) {
        Ok(user) => {
            request.extensions_mut().insert(user);
        }
        Err(e) => tracing::debug!("Continuing without identity: {}", e),
    }
    next.run(request).await
}

/// Middleware that requires an authenticated user holding `role` (or admin).
/// Must run after [`require_auth`].
pub async fn require_role(
    State(role): State<&'static str>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(user) = request.extensions().get::<AuthUser>() else {
        return Err(AppError::Unauthorized(
            "Please authenticate to access this resource".to_string(),
        ));
    };

    if !user.has_role(role) {
        tracing::warn!("User {} with role '{}' denied '{}' access", user.id, user.role, role);
        return Err(AppError::Forbidden(format!(
            "Role '{}' is required to access this resource",
            role
        )));
    }

    Ok(next.run(request).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("Access token required".to_string()))
    }
}

/// Identity attached by [`optional_auth`], if any.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeAuthUser(parts.extensions.get::<AuthUser>().cloned()))
    }
}
