//! Message repository — the durable side of the write queue. The broker
//! never stores plaintext: `content` is the ciphertext body
//! (`nonce || AEAD ciphertext`) copied verbatim from the wire envelope.

use iplchat_common::models::message::{MessageKind, StoredMessage};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Insert one message row. Called by the write queue's `flush()`, never
/// directly by request handling.
pub async fn insert(
    pool: &SqlitePool,
    kind: MessageKind,
    sender: Uuid,
    channel: Uuid,
    content: &[u8],
    file: Option<Uuid>,
) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO messages (kind, sender, channel, content, timestamp, file)
        VALUES (?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), ?)
        RETURNING id
        "#,
    )
    .bind(kind)
    .bind(sender.to_string())
    .bind(channel.to_string())
    .bind(content)
    .bind(file.map(|u| u.to_string()))
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Messages in `channel` with `id > since_id`, oldest first — backs the
/// `MESSAGE_SYNC_*` exchange.
pub async fn since(
    pool: &SqlitePool,
    channel: Uuid,
    since_id: i64,
) -> Result<Vec<StoredMessage>, sqlx::Error> {
    sqlx::query_as::<_, StoredMessage>(
        "SELECT * FROM messages WHERE channel = ? AND id > ? ORDER BY id ASC",
    )
    .bind(channel.to_string())
    .bind(since_id)
    .fetch_all(pool)
    .await
}
