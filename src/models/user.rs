//! Represents an account that owns folders and files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Access level of a user. Admins may manage other users; folder and file
/// mutations are still restricted to the owner.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("role must be either \"user\" or \"admin\", got `{}`", other)),
        }
    }
}

/// A registered user.
///
/// Only `role`, `credential_hash` and `last_login` change after creation.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct User {
    /// Stable identifier.
    pub id: Uuid,

    /// Login email, stored lowercased and unique without regard to case.
    pub email: String,

    /// Display name.
    pub name: String,

    /// Opaque hash produced by the external credential service.
    #[serde(skip_serializing)]
    pub credential_hash: String,

    pub role: Role,

    pub created_at: DateTime<Utc>,

    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
