//! Session record — in-memory, broker-side, one per connection.

use crate::crypto::{AsymmetricPublicKey, SymmetricKey};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use uuid::Uuid;

/// Opaque handle for a live connection. Assigned once per accepted socket.
pub type StreamId = u64;

/// Per-connection session state, populated incrementally as the protocol
/// advances (handshake → auth → notification endpoint). Channel membership
/// is not cached here; it's looked up from `Engine::get_channel` on every
/// request so a membership change elsewhere is seen immediately.
///
/// `Clone` so the broker's session registry can hand callers a snapshot to
/// read (e.g. to route a push) without holding the registry lock for the
/// duration of network I/O — the notification pusher does its network I/O
/// without holding any broker lock.
#[derive(Clone)]
pub struct Session {
    pub stream_id: StreamId,
    pub user_uuid: Option<Uuid>,
    pub username: Option<String>,
    /// Established on HANDSHAKE_REQUEST/RESPONSE; `None` before the
    /// handshake completes.
    pub session_key: Option<SymmetricKey>,
    pub peer_public_key: Option<AsymmetricPublicKey>,
    pub notification_endpoint: Option<SocketAddr>,

    // Rate-limit/throttling fields: present but no policy is enforced
    // (left to the implementer).
    pub login_attempts: u32,
    pub register_attempts: u32,
    pub last_login_time: Option<DateTime<Utc>>,
    pub last_register_time: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            user_uuid: None,
            username: None,
            session_key: None,
            peer_public_key: None,
            notification_endpoint: None,
            login_attempts: 0,
            register_attempts: 0,
            last_login_time: None,
            last_register_time: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_uuid.is_some()
    }

    pub fn has_session_key(&self) -> bool {
        self.session_key.is_some()
    }
}
