//! Subscription relation (`channels_users`).
//!
//! The original source inserted both `(channel, user)` and `(user,
//! channel)` rows for the same membership, a redundant write. This module
//! keeps exactly one row per membership and queries both directions via
//! join (see `channels::subscribed_by` for the user→channels direction;
//! this module is the write side plus the membership check).

use sqlx::SqlitePool;
use uuid::Uuid;

/// Idempotent join: a duplicate `(channel, user)` pair is not inserted
/// (`join_channel`).
pub async fn join(pool: &SqlitePool, user: Uuid, channel: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO channels_users (channel, user) VALUES (?, ?) ON CONFLICT(channel, user) DO NOTHING",
    )
    .bind(channel.to_string())
    .bind(user.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn is_member(pool: &SqlitePool, user: Uuid, channel: Uuid) -> Result<bool, sqlx::Error> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM channels_users WHERE channel = ? AND user = ?")
            .bind(channel.to_string())
            .bind(user.to_string())
            .fetch_optional(pool)
            .await?;
    Ok(row.is_some())
}
