//! User model — the identity layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered user account, persisted in the `users` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub uuid: Uuid,
    pub username: String,
    /// `H(password ‖ salt)` — never serialized out over the wire. Column
    /// is named `password` in the schema.
    #[serde(skip_serializing)]
    #[sqlx(rename = "password")]
    pub password_hash: Vec<u8>,
    #[serde(skip_serializing)]
    #[sqlx(rename = "salt")]
    pub password_salt: Vec<u8>,
    pub is_authenticated: bool,
    #[sqlx(rename = "last_auth")]
    pub last_auth_time: Option<DateTime<Utc>>,
    #[sqlx(rename = "created")]
    pub created_at: DateTime<Utc>,
    #[sqlx(rename = "profile_picture")]
    pub profile_picture_id: Option<Uuid>,
}

/// Result of the persistence engine's `register_client` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Ok,
    AlreadyExists,
}

/// Result of the persistence engine's `login` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Ok,
    NotFound,
    InvalidPassword,
}
