//! Client for the Supabase auth service and table API.

mod error;
mod types;

pub use error::SupabaseError;
pub use types::{AdminUserAttributes, AuthUserRecord, Session};

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::config::SupabaseConfig;
use error::{auth_error, postgrest_error};
use types::{PasswordGrant, UserPage};

/// Page size used when walking the admin user list.
const USERS_PER_PAGE: usize = 200;

/// Which API produced a failing response; decides how its body is parsed.
#[derive(Clone, Copy)]
enum Api {
    Auth,
    Rest,
}

/// Thin client over the project's `/auth/v1` and `/rest/v1` endpoints.
pub struct SupabaseClient {
    http_client: Client,
    base_url: String,
    anon_key: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(base_url: &str, anon_key: &str, service_role_key: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            service_role_key: service_role_key.to_string(),
        }
    }

    pub fn from_config(config: &SupabaseConfig) -> Self {
        Self::new(&config.url, &config.anon_key, &config.service_role_key)
    }

    /// Exchange email and password for a session.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, SupabaseError> {
        let url = format!("{}/auth/v1/token", self.base_url);
        let request = self
            .http_client
            .post(&url)
            .query(&[("grant_type", "password")])
            .header("apikey", &self.anon_key)
            .json(&PasswordGrant { email, password });

        let response = self.send(request, Api::Auth).await?;
        read_json(response).await
    }

    /// List every auth user, following pagination.
    pub async fn admin_list_users(&self) -> Result<Vec<AuthUserRecord>, SupabaseError> {
        let url = format!("{}/auth/v1/admin/users", self.base_url);
        let mut users = Vec::new();
        let mut page = 1usize;

        loop {
            let request = self
                .admin(self.http_client.get(&url))
                .query(&[("page", page), ("per_page", USERS_PER_PAGE)]);
            let batch: UserPage = read_json(self.send(request, Api::Auth).await?).await?;
            let fetched = batch.users.len();
            users.extend(batch.users);

            if fetched < USERS_PER_PAGE {
                break;
            }
            page += 1;
        }

        tracing::debug!("Fetched {} auth users", users.len());
        Ok(users)
    }

    /// Create a user through the admin API.
    pub async fn admin_create_user(
        &self,
        attributes: &AdminUserAttributes,
    ) -> Result<AuthUserRecord, SupabaseError> {
        let url = format!("{}/auth/v1/admin/users", self.base_url);
        let request = self.admin(self.http_client.post(&url)).json(attributes);
        read_json(self.send(request, Api::Auth).await?).await
    }

    /// Fetch one auth user. Returns `None` when the service does not know the id.
    pub async fn admin_get_user(&self, id: Uuid) -> Result<Option<AuthUserRecord>, SupabaseError> {
        let url = format!("{}/auth/v1/admin/users/{}", self.base_url, id);
        let request = self.admin(self.http_client.get(&url));

        match self.send(request, Api::Auth).await {
            Ok(response) => read_json(response).await.map(Some),
            Err(SupabaseError::Auth { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `SELECT *` from a table with `column = value` filters.
    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, &str)],
    ) -> Result<Vec<T>, SupabaseError> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let mut query = vec![("select".to_string(), "*".to_string())];
        query.extend(
            filters
                .iter()
                .map(|(column, value)| (column.to_string(), format!("eq.{}", value))),
        );

        let request = self.admin(self.http_client.get(&url)).query(&query);
        read_json(self.send(request, Api::Rest).await?).await
    }

    /// Insert rows and return them as stored.
    pub async fn insert<B: Serialize, T: DeserializeOwned>(
        &self,
        table: &str,
        rows: &[B],
    ) -> Result<Vec<T>, SupabaseError> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let request = self
            .admin(self.http_client.post(&url))
            .header("Prefer", "return=representation")
            .json(rows);
        read_json(self.send(request, Api::Rest).await?).await
    }

    fn admin(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
    }

    async fn send(&self, request: RequestBuilder, api: Api) -> Result<Response, SupabaseError> {
        let response = request
            .send()
            .await
            .map_err(|e| SupabaseError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!("Supabase returned {}: {}", status, body);
        Err(match api {
            Api::Auth => auth_error(status.as_u16(), &body),
            Api::Rest => postgrest_error(status.as_u16(), &body),
        })
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, SupabaseError> {
    response
        .json()
        .await
        .map_err(|e| SupabaseError::InvalidResponse(e.to_string()))
}
