//! User repository — CRUD over the `users` table.

use iplchat_common::models::user::User;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Insert a new user row. Callers are expected to have already checked for
/// a username collision (the engine does this inside a transaction); the
/// `UNIQUE(username)` constraint is the last line of defense.
pub async fn create(
    pool: &SqlitePool,
    uuid: Uuid,
    username: &str,
    password_hash: &[u8],
    password_salt: &[u8],
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (uuid, username, password, salt, is_authenticated, created)
        VALUES (?, ?, ?, ?, 0, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        RETURNING *
        "#,
    )
    .bind(uuid.to_string())
    .bind(username)
    .bind(password_hash)
    .bind(password_salt)
    .fetch_one(pool)
    .await
}

pub async fn find_by_uuid(pool: &SqlitePool, uuid: Uuid) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE uuid = ?")
        .bind(uuid.to_string())
        .fetch_optional(pool)
        .await
}

pub async fn find_by_username(pool: &SqlitePool, username: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await
}

/// Usernames matching `pattern` as a substring, excluding `exclude_uuid`,
/// ordered ascending, capped at `limit` rows (`search_users`).
pub async fn search_by_username(
    pool: &SqlitePool,
    pattern: &str,
    exclude_uuid: Uuid,
    limit: i64,
) -> Result<Vec<User>, sqlx::Error> {
    let like = format!("%{}%", escape_like(pattern));
    sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users
        WHERE username LIKE ? ESCAPE '\' AND uuid != ?
        ORDER BY username ASC
        LIMIT ?
        "#,
    )
    .bind(like)
    .bind(exclude_uuid.to_string())
    .bind(limit)
    .fetch_all(pool)
    .await
}

fn escape_like(pattern: &str) -> String {
    pattern.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

pub async fn set_authenticated(
    pool: &SqlitePool,
    uuid: Uuid,
    authenticated: bool,
    last_auth_now: bool,
) -> Result<(), sqlx::Error> {
    if last_auth_now {
        sqlx::query(
            "UPDATE users SET is_authenticated = ?, last_auth = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE uuid = ?",
        )
        .bind(authenticated)
        .bind(uuid.to_string())
        .execute(pool)
        .await?;
    } else {
        sqlx::query("UPDATE users SET is_authenticated = ? WHERE uuid = ?")
            .bind(authenticated)
            .bind(uuid.to_string())
            .execute(pool)
            .await?;
    }
    Ok(())
}
