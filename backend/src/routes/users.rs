//! `/api/users` endpoints.
//!
//! - `POST /signup`, `POST /login` - public, limited per IP
//! - `GET /` - list merged users
//! - `POST /` - create a user (admin)
//! - `GET /id/:id?by=auth|row` - one merged user
//! - `GET /profile` - caller identity, if any
//! - `GET /admin/users` - admin listing

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use fitsync_common::{CreateUserRequest, LoginRequest, MessageResponse, SignupRequest};
use serde::Serialize;

use crate::auth::{optional_auth, require_auth, require_role, AuthUser, MaybeAuthUser};
use crate::error::AppError;
use crate::models::user::{MergedUser, NewUser, ADMIN_ROLE};
use crate::rate_limit::{auth_limit, role_limit};
use crate::supabase::{AuthUserRecord, Session};
use crate::validation::{user_key, UserIdQuery, ValidatedJson};
use crate::AppState;

#[derive(Debug, Serialize)]
struct SignupResponse {
    user: MergedUser,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    session: Session,
    user: AuthUserRecord,
}

#[derive(Debug, Serialize)]
struct ProfileResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<AuthUser>,
    message: &'static str,
}

/// POST /api/users/signup
async fn signup(
    State(state): State<Arc<AppState>>,
    ValidatedJson(body): ValidatedJson<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    if state.users.find_by_email(&body.email).await?.is_some() {
        return Err(AppError::Conflict(
            "User with this email already exists".to_string(),
        ));
    }

    let user = state
        .users
        .create(NewUser {
            email: body.email,
            password: Some(body.password),
            username: body.username,
            admin_code: body.admin_code,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            user,
            message: "Signup successful",
        }),
    ))
}

/// POST /api/users/login
async fn login(
    State(state): State<Arc<AppState>>,
    ValidatedJson(body): ValidatedJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let session = state
        .supabase
        .sign_in_with_password(&body.email, &body.password)
        .await?;
    tracing::info!("User {} logged in", session.user.id);

    let user = session.user.clone();
    Ok(Json(LoginResponse { session, user }))
}

/// GET /api/users
async fn list_users(State(state): State<Arc<AppState>>) -> Result<Json<Vec<MergedUser>>, AppError> {
    Ok(Json(state.users.list().await?))
}

/// POST /api/users
async fn create_user(
    State(state): State<Arc<AppState>>,
    admin: AuthUser,
    ValidatedJson(body): ValidatedJson<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!("Admin {} creating user {}", admin.id, body.email);
    let user = state
        .users
        .create(NewUser {
            email: body.email,
            password: body.password,
            username: Some(body.username),
            admin_code: None,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /api/users/id/:id
async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<UserIdQuery>,
) -> Result<Json<MergedUser>, AppError> {
    let key = user_key(&id, query.by.as_deref())?;
    state
        .users
        .get(key)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

/// GET /api/users/profile
async fn profile(MaybeAuthUser(user): MaybeAuthUser) -> Json<ProfileResponse> {
    let message = match user {
        Some(_) => "Profile retrieved successfully",
        None => "No authenticated user. Please log in for full profile access.",
    };
    Json(ProfileResponse { user, message })
}

/// GET /api/users/admin/users
async fn admin_users() -> Json<MessageResponse> {
    Json(MessageResponse::new("Admin users endpoint - implement as needed"))
}

pub fn router(state: Arc<AppState>) -> Router {
    let authenticated = from_fn_with_state(state.clone(), require_auth);
    let maybe_authenticated = from_fn_with_state(state.clone(), optional_auth);
    let admin_only = from_fn_with_state(ADMIN_ROLE, require_role);
    let per_ip_auth = from_fn_with_state(state.clone(), auth_limit);
    let per_role = from_fn_with_state(state.clone(), role_limit);

    // Layers run bottom-up: the last one added sees the request first.
    Router::new()
        .route("/signup", post(signup).layer(per_ip_auth.clone()))
        .route("/login", post(login).layer(per_ip_auth))
        .route(
            "/",
            get(list_users)
                .layer(per_role.clone())
                .layer(authenticated.clone()),
        )
        .route(
            "/",
            post(create_user)
                .layer(per_role.clone())
                .layer(admin_only.clone())
                .layer(authenticated.clone()),
        )
        .route(
            "/id/:id",
            get(get_user)
                .layer(per_role.clone())
                .layer(authenticated.clone()),
        )
        .route(
            "/profile",
            get(profile)
                .layer(per_role.clone())
                .layer(maybe_authenticated),
        )
        .route(
            "/admin/users",
            get(admin_users)
                .layer(per_role)
                .layer(admin_only)
                .layer(authenticated),
        )
        .with_state(state)
}
