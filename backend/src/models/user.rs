//! Users as the application sees them: an auth-service record merged with
//! its optional row in the custom `users` table.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::supabase::{AdminUserAttributes, AuthUserRecord, SupabaseClient, SupabaseError};

pub const DEFAULT_ROLE: &str = "user";
pub const ADMIN_ROLE: &str = "admin";

/// Identifier issued by the auth service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthId(pub Uuid);

/// Primary key of a row in the custom users table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub Uuid);

macro_rules! uuid_id {
    ($name:ident) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map($name)
            }
        }
    };
}

uuid_id!(AuthId);
uuid_id!(RowId);

/// Which identifier space a lookup is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserKey {
    Auth(AuthId),
    Row(RowId),
}

/// A row of the custom users table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub id: RowId,
    pub auth_id: AuthId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub profile_data: Option<Value>,
    #[serde(default)]
    pub preferences: Option<Value>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Insert payload for the custom users table.
#[derive(Debug, Clone, Serialize)]
struct NewUserRow<'a> {
    auth_id: AuthId,
    username: &'a str,
    email: &'a str,
    role: &'a str,
    profile_data: Value,
    preferences: Value,
}

/// An auth record combined with its custom row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedUser {
    pub id: AuthId,
    pub row_id: Option<RowId>,
    pub email: Option<String>,
    pub role: String,
    pub username: Option<String>,
    pub profile_data: Value,
    pub preferences: Value,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub email_confirmed_at: Option<String>,
    pub last_sign_in_at: Option<String>,
    pub user_metadata: Map<String, Value>,
    pub app_metadata: Map<String, Value>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

/// Part of an email address before the `@`.
pub fn email_local_part(email: &str) -> Option<&str> {
    email.split('@').next().filter(|s| !s.is_empty())
}

/// Merge an auth record with its custom row. Row fields win; auth metadata
/// and the email local part fill the gaps.
pub fn merge(auth: &AuthUserRecord, row: Option<&UserRow>) -> MergedUser {
    let email = row
        .and_then(|r| non_empty(r.email.as_deref()))
        .or(auth.email.as_deref())
        .map(String::from);

    let username = row
        .and_then(|r| non_empty(r.username.as_deref()))
        .or_else(|| auth.metadata_str("username"))
        .or_else(|| auth.email.as_deref().and_then(email_local_part))
        .map(String::from);

    let role = row
        .and_then(|r| non_empty(r.role.as_deref()))
        .or_else(|| auth.metadata_str("role"))
        .unwrap_or(DEFAULT_ROLE)
        .to_string();

    let object_or_empty = |value: Option<&Value>| match value {
        Some(v) if !v.is_null() => v.clone(),
        _ => json!({}),
    };

    MergedUser {
        id: AuthId(auth.id),
        row_id: row.map(|r| r.id),
        email,
        role,
        username,
        profile_data: object_or_empty(row.and_then(|r| r.profile_data.as_ref())),
        preferences: object_or_empty(row.and_then(|r| r.preferences.as_ref())),
        created_at: row
            .and_then(|r| r.created_at.clone())
            .or_else(|| auth.created_at.clone()),
        updated_at: row
            .and_then(|r| r.updated_at.clone())
            .or_else(|| auth.updated_at.clone()),
        email_confirmed_at: auth.email_confirmed_at.clone(),
        last_sign_in_at: auth.last_sign_in_at.clone(),
        user_metadata: auth.user_metadata.clone(),
        app_metadata: auth.app_metadata.clone(),
    }
}

/// Input for creating a user in both stores.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password: Option<String>,
    pub username: Option<String>,
    pub admin_code: Option<String>,
}

/// Reads and writes users across the auth service and the custom table.
pub struct UserStore {
    supabase: Arc<SupabaseClient>,
    table: String,
    admin_code: Option<String>,
}

impl UserStore {
    pub fn new(supabase: Arc<SupabaseClient>, table: &str, admin_code: Option<&str>) -> Self {
        Self {
            supabase,
            table: table.to_string(),
            admin_code: admin_code.map(String::from),
        }
    }

    /// Role granted at creation: admin only for a matching, configured code.
    /// Surrounding whitespace is ignored on both sides.
    pub fn resolve_role(&self, admin_code: Option<&str>) -> &'static str {
        let expected = self.admin_code.as_deref().map(str::trim).filter(|c| !c.is_empty());
        match (expected, admin_code.map(str::trim)) {
            (Some(expected), Some(given)) if expected == given => ADMIN_ROLE,
            _ => DEFAULT_ROLE,
        }
    }

    /// Every auth user merged with its row. Falls back to auth data alone
    /// when the custom table cannot be read.
    pub async fn list(&self) -> Result<Vec<MergedUser>, SupabaseError> {
        let auth_users = self.supabase.admin_list_users().await?;

        let raw: Vec<Value> = match self.supabase.select(&self.table, &[]).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("Custom users table unavailable, returning auth users only: {}", e);
                Vec::new()
            }
        };

        // A malformed row only loses its own custom data.
        let rows = raw.into_iter().filter_map(|value| {
            serde_json::from_value::<UserRow>(value)
                .map_err(|e| tracing::warn!("Skipping malformed custom user row: {}", e))
                .ok()
        });

        let mut by_auth_id: HashMap<AuthId, UserRow> = HashMap::new();
        for row in rows {
            if by_auth_id.contains_key(&row.auth_id) {
                tracing::warn!("Multiple custom rows for auth user {}; keeping the first", row.auth_id);
                continue;
            }
            by_auth_id.insert(row.auth_id, row);
        }

        tracing::debug!(
            "Merging {} auth users with {} custom rows",
            auth_users.len(),
            by_auth_id.len()
        );

        Ok(auth_users
            .iter()
            .map(|auth| merge(auth, by_auth_id.get(&AuthId(auth.id))))
            .collect())
    }

    /// Create the auth user, then its custom row. The account is usable
    /// without the row, so a failed insert is logged and the user is
    /// returned with default custom fields.
    pub async fn create(&self, new_user: NewUser) -> Result<MergedUser, SupabaseError> {
        let role = self.resolve_role(new_user.admin_code.as_deref());
        let username = new_user
            .username
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| email_local_part(&new_user.email).map(String::from))
            .unwrap_or_default();

        let mut user_metadata = Map::new();
        user_metadata.insert("role".to_string(), json!(role));
        user_metadata.insert("username".to_string(), json!(username));

        let auth = self
            .supabase
            .admin_create_user(&AdminUserAttributes {
                email: new_user.email.clone(),
                password: new_user.password,
                email_confirm: true,
                user_metadata,
            })
            .await?;

        let row = NewUserRow {
            auth_id: AuthId(auth.id),
            username: &username,
            email: &new_user.email,
            role,
            profile_data: json!({}),
            preferences: json!({}),
        };
        let inserted: Vec<UserRow> = match self.supabase.insert(&self.table, &[row]).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("Created auth user {} but could not insert its custom row: {}", auth.id, e);
                Vec::new()
            }
        };

        tracing::info!("Created user {} with role '{}'", auth.id, role);
        Ok(merge(&auth, inserted.first()))
    }

    /// Look a user up by either identifier.
    ///
    /// A custom row whose auth record no longer exists is treated as missing.
    pub async fn get(&self, key: UserKey) -> Result<Option<MergedUser>, SupabaseError> {
        match key {
            UserKey::Auth(auth_id) => {
                let Some(auth) = self.supabase.admin_get_user(auth_id.0).await? else {
                    return Ok(None);
                };
                let row = self.row_where("auth_id", &auth_id.to_string()).await?;
                Ok(Some(merge(&auth, row.as_ref())))
            }
            UserKey::Row(row_id) => {
                let Some(row) = self.row_where("id", &row_id.to_string()).await? else {
                    return Ok(None);
                };
                match self.supabase.admin_get_user(row.auth_id.0).await? {
                    Some(auth) => Ok(Some(merge(&auth, Some(&row)))),
                    None => {
                        tracing::warn!("Custom row {} points at missing auth user {}", row.id, row.auth_id);
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Find a user by email, checking the custom table before the auth service.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<MergedUser>, SupabaseError> {
        if let Some(row) = self.row_where("email", email).await? {
            if let Some(auth) = self.supabase.admin_get_user(row.auth_id.0).await? {
                return Ok(Some(merge(&auth, Some(&row))));
            }
            tracing::warn!("Custom row {} points at missing auth user {}", row.id, row.auth_id);
        }

        let auth_users = self.supabase.admin_list_users().await?;
        Ok(auth_users
            .iter()
            .find(|u| {
                u.email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
            })
            .map(|auth| merge(auth, None)))
    }

    async fn row_where(&self, column: &str, value: &str) -> Result<Option<UserRow>, SupabaseError> {
        let rows: Vec<UserRow> = self.supabase.select(&self.table, &[(column, value)]).await?;
        Ok(rows.into_iter().next())
    }
}
