use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::SecondsFormat;

use super::{RateLimitDecision, RateLimitPolicy};
use crate::auth::AuthUser;
use crate::client_ip::ClientIp;
use crate::error::AppError;
use crate::AppState;

/// `standard:{ip}` limit for every `/api` route.
pub async fn standard_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let policy = RateLimitPolicy::standard(&state.config.rate_limit.standard);
    let key = policy.key(&client_ip(&request));
    enforce(&state, &policy, &key, request, next).await
}

/// `auth:{ip}` limit for signup and login.
pub async fn auth_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let policy = RateLimitPolicy::auth(&state.config.rate_limit.auth);
    let key = policy.key(&client_ip(&request));
    enforce(&state, &policy, &key, request, next).await
}

/// Role-tiered limit keyed by user id, or by IP for anonymous callers.
/// Runs after the auth middleware so the identity is known.
pub async fn role_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let tiers = &state.config.rate_limit.tiers;
    let (policy, key) = match request.extensions().get::<AuthUser>() {
        Some(user) => {
            let policy = RateLimitPolicy::for_role(tiers, Some(&user.role));
            let key = policy.key(&user.id.to_string());
            (policy, key)
        }
        None => {
            let policy = RateLimitPolicy::for_role(tiers, None);
            let key = policy.key(&client_ip(&request));
            (policy, key)
        }
    };
    enforce(&state, &policy, &key, request, next).await
}

fn client_ip(request: &Request) -> String {
    request
        .extensions()
        .get::<ClientIp>()
        .map(|ip| ip.0.clone())
        .unwrap_or_else(|| ClientIp::unknown().0)
}

async fn enforce(
    state: &AppState,
    policy: &RateLimitPolicy,
    key: &str,
    request: Request,
    next: Next,
) -> Response {
    let decision = state.rate_limits.check(key, policy);

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        tracing::warn!(
            "Rate limit exceeded for '{}' on {} {}",
            key,
            request.method(),
            request.uri().path()
        );
        AppError::RateLimited {
            message: policy.message.to_string(),
            retry_after_secs: decision.retry_after,
        }
        .into_response()
    };

    apply_headers(response.headers_mut(), &decision);
    response
}

const LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Set the rate limit headers unless an inner, more specific limiter already did.
fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    if headers.contains_key(LIMIT) {
        return;
    }
    headers.insert(LIMIT, HeaderValue::from(decision.limit));
    headers.insert(REMAINING, HeaderValue::from(decision.remaining));
    let reset = decision.reset_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    if let Ok(value) = HeaderValue::from_str(&reset) {
        headers.insert(RESET, value);
    }
    headers.insert(
        axum::http::header::RETRY_AFTER,
        HeaderValue::from(decision.retry_after),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_apply_headers() {
        let decision = RateLimitDecision {
            allowed: true,
            limit: 5,
            remaining: 4,
            reset_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 15, 0).unwrap(),
            retry_after: 900,
        };
        let mut headers = HeaderMap::new();
        apply_headers(&mut headers, &decision);

        assert_eq!(headers["x-ratelimit-limit"], "5");
        assert_eq!(headers["x-ratelimit-remaining"], "4");
        assert_eq!(headers["x-ratelimit-reset"], "2024-05-01T12:15:00.000Z");
        assert_eq!(headers["retry-after"], "900");
    }

    #[test]
    fn test_inner_limiter_headers_win() {
        let reset_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 15, 0).unwrap();
        let inner = RateLimitDecision {
            allowed: true,
            limit: 5,
            remaining: 2,
            reset_at,
            retry_after: 60,
        };
        let outer = RateLimitDecision {
            limit: 100,
            remaining: 97,
            ..inner
        };

        let mut headers = HeaderMap::new();
        apply_headers(&mut headers, &inner);
        apply_headers(&mut headers, &outer);
        assert_eq!(headers["x-ratelimit-limit"], "5");
        assert_eq!(headers["x-ratelimit-remaining"], "2");
    }
}
