//! Persisted message model — one row per message in the `messages` table.
//! Distinct from the wire-protocol `Message` envelope (`protocol.rs`),
//! which additionally carries the sender's signature and never touches
//! disk in envelope form: the broker unwraps it, and stores only the
//! ciphertext body alongside its routing metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `messages.kind` — content kind. The schema reserves the `file`
/// variant's column but the broker does not implement file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    File,
}

/// A stored message row, joined against `users`/`channels` by uuid.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredMessage {
    pub id: i64,
    pub kind: MessageKind,
    pub sender: Uuid,
    pub channel: Uuid,
    /// The AEAD ciphertext body (`nonce || ciphertext`) — the broker never
    /// holds the plaintext.
    pub content: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub file: Option<Uuid>,
}
