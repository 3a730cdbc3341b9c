//! Channel repository — CRUD over `channels`, joined against
//! `channels_users` for the subscriber set.

use iplchat_common::models::channel::Channel;
use sqlx::SqlitePool;
use std::collections::HashSet;
use uuid::Uuid;

/// Insert a channel row if `uuid` is not already present. Used both for
/// operator-created channels and for the registration-time self-channel.
pub async fn create_if_absent(pool: &SqlitePool, name: &str, uuid: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO channels (uuid, name, created, request_count)
        VALUES (?, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), 0)
        ON CONFLICT(uuid) DO NOTHING
        "#,
    )
    .bind(uuid.to_string())
    .bind(name)
    .execute(pool)
    .await?;
    Ok(())
}

async fn subscribers_of(pool: &SqlitePool, channel: Uuid) -> Result<HashSet<Uuid>, sqlx::Error> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT user FROM channels_users WHERE channel = ?")
            .bind(channel.to_string())
            .fetch_all(pool)
            .await?;
    Ok(rows
        .into_iter()
        .filter_map(|(s,)| Uuid::parse_str(&s).ok())
        .collect())
}

/// Load a channel row plus its subscriber set, bypassing any cache.
pub async fn find_by_uuid(pool: &SqlitePool, uuid: Uuid) -> Result<Option<Channel>, sqlx::Error> {
    let row = sqlx::query_as::<_, Channel>("SELECT * FROM channels WHERE uuid = ?")
        .bind(uuid.to_string())
        .fetch_optional(pool)
        .await?;
    match row {
        Some(mut channel) => {
            channel.subscribers = subscribers_of(pool, uuid).await?;
            Ok(Some(channel))
        }
        None => Ok(None),
    }
}

/// All channels `user` subscribes to (`subscribed_channels`).
pub async fn subscribed_by(pool: &SqlitePool, user: Uuid) -> Result<Vec<Channel>, sqlx::Error> {
    let rows = sqlx::query_as::<_, Channel>(
        r#"
        SELECT c.* FROM channels c
        INNER JOIN channels_users cu ON cu.channel = c.uuid
        WHERE cu.user = ?
        "#,
    )
    .bind(user.to_string())
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for mut channel in rows {
        channel.subscribers = subscribers_of(pool, channel.uuid).await?;
        out.push(channel);
    }
    Ok(out)
}

/// Bump `request_count` and `last_request`, which (via the relevance
/// formula) raises the channel's cache priority.
pub async fn record_request(pool: &SqlitePool, uuid: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE channels SET
            request_count = request_count + 1,
            last_request = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
        WHERE uuid = ?
        "#,
    )
    .bind(uuid.to_string())
    .execute(pool)
    .await?;
    Ok(())
}
