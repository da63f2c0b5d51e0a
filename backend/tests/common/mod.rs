#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::Router;
use http::{HeaderMap, Method, Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fitsync_backend::test_util::{create_test_state, test_config};
use fitsync_backend::{build_app, AppState};

pub const AUTH_ID: &str = "6f1c2a2e-5b8d-4f0a-9a53-0d7a3b1c9e11";
pub const ROW_ID: &str = "c3d2e1f0-1111-4a2b-9c3d-4e5f6a7b8c9d";

pub struct TestApp {
    pub app: Router,
    pub state: Arc<AppState>,
    pub supabase: MockServer,
    pub logs: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_environment("test").await
    }

    pub async fn with_environment(environment: &str) -> Self {
        let supabase = MockServer::start().await;
        let logs = TempDir::new().unwrap();
        let mut config = test_config(&supabase.uri(), logs.path());
        config.environment = environment.to_string();

        let state = create_test_state(config);
        let app = build_app(state.clone());
        Self {
            app,
            state,
            supabase,
            logs,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, headers, body)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, HeaderMap, Value) {
        self.send(request(Method::GET, uri, token, None)).await
    }

    pub async fn post(
        &self,
        uri: &str,
        token: Option<&str>,
        body: Value,
    ) -> (StatusCode, HeaderMap, Value) {
        self.send(request(Method::POST, uri, token, Some(body))).await
    }
}

pub fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "203.0.113.9");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn auth_user_json(id: &str, email: &str, metadata: Value) -> Value {
    json!({
        "id": id,
        "aud": "authenticated",
        "role": "authenticated",
        "email": email,
        "email_confirmed_at": "2024-01-01T00:00:00Z",
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z",
        "user_metadata": metadata,
        "app_metadata": {"provider": "email"}
    })
}

/// No custom row and no auth user with this email.
pub async fn mount_email_unused(server: &MockServer, email: &str) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/users"))
        .and(query_param("email", format!("eq.{}", email)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/v1/admin/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"users": []})))
        .mount(server)
        .await;
}
