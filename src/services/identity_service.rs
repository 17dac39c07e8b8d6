//! IdentityService — user records consulted for ownership and admin checks.
//!
//! Credential hashing and token handling live outside this service; it only
//! persists the opaque hash it is given.

use crate::{
    errors::{ServiceError, ServiceResult, is_unique_violation},
    models::{
        listing::Page,
        user::{Role, User},
    },
};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, name, credential_hash, role, created_at, last_login";

pub const DEFAULT_USER_LIMIT: i64 = 100;
pub const MAX_USER_LIMIT: i64 = 1000;

#[derive(Clone)]
pub struct IdentityService {
    pub db: SqlitePool,
}

/// Fetch a user by id on an existing connection or transaction.
pub async fn fetch_user(conn: &mut SqliteConnection, id: Uuid) -> ServiceResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(user)
}

impl IdentityService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Register a user. The email is trimmed and lowercased before storage.
    pub async fn create_user(
        &self,
        email: &str,
        name: &str,
        credential_hash: &str,
        role: Role,
    ) -> ServiceResult<User> {
        let email = email.trim().to_lowercase();
        let name = name.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ServiceError::validation("a valid email is required"));
        }
        if name.is_empty() {
            return Err(ServiceError::validation("name is required"));
        }

        let user = User {
            id: Uuid::new_v4(),
            email,
            name: name.to_string(),
            credential_hash: credential_hash.to_string(),
            role,
            created_at: Utc::now(),
            last_login: None,
        };

        let insert = sqlx::query(
            "INSERT INTO users (id, email, name, credential_hash, role, created_at, last_login)
             VALUES (?, ?, ?, ?, ?, ?, NULL)",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.credential_hash)
        .bind(user.role)
        .bind(user.created_at)
        .execute(&self.db)
        .await;

        match insert {
            Ok(_) => {
                info!(user_id = %user.id, role = %user.role, "user created");
                Ok(user)
            }
            Err(err) if is_unique_violation(&err) => Err(ServiceError::conflict(format!(
                "a user with email `{}` already exists",
                user.email
            ))),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_user(&self, id: Uuid) -> ServiceResult<Option<User>> {
        let mut conn = self.db.acquire().await?;
        fetch_user(&mut *conn, id).await
    }

    pub async fn find_by_email(&self, email: &str) -> ServiceResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?"
        ))
        .bind(email.trim())
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    /// Newest users first.
    pub async fn list_users(&self, limit: Option<i64>, offset: Option<i64>) -> ServiceResult<(Vec<User>, Page)> {
        let page = Page::clamped(limit, offset, DEFAULT_USER_LIMIT, MAX_USER_LIMIT);
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id LIMIT ? OFFSET ?"
        ))
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.db)
        .await?;
        Ok((users, page))
    }

    pub async fn update_role(&self, id: Uuid, role: Role) -> ServiceResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET role = ? WHERE id = ? RETURNING {USER_COLUMNS}"
        ))
        .bind(role)
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        if let Some(user) = &user {
            info!(user_id = %user.id, role = %user.role, "user role updated");
        }
        Ok(user)
    }

    pub async fn update_credential_hash(&self, id: Uuid, credential_hash: &str) -> ServiceResult<bool> {
        let result = sqlx::query("UPDATE users SET credential_hash = ? WHERE id = ?")
            .bind(credential_hash)
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn record_login(&self, id: Uuid) -> ServiceResult<bool> {
        let result = sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Create `email` as an admin unless an account already exists for it.
    pub async fn ensure_admin(&self, email: &str) -> ServiceResult<User> {
        if let Some(existing) = self.find_by_email(&email.to_lowercase()).await? {
            if existing.is_admin() {
                return Ok(existing);
            }
            return self
                .update_role(existing.id, Role::Admin)
                .await?
                .ok_or_else(|| ServiceError::not_found("user not found"));
        }
        let name = email.split('@').next().unwrap_or(email);
        self.create_user(email, name, "", Role::Admin).await
    }
}
