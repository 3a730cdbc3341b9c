//! Server-side session registry (C4).
//!
//! Grounded on `nexus_gateway::session::SessionManager` — an
//! `RwLock<HashMap<..>>` behind an `Arc`, with `register`/`remove` lifecycle
//! methods — generalized from Nexus's session-id/user-id double map to a
//! single `stream_id -> Session` map plus a linear `find_by_uuid` scan,
//! used to route client-to-client key exchange and messages to the right
//! connection.

use iplchat_common::models::session::{Session, StreamId};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Tracks every live connection's [`Session`]. A session's own
/// connection-handling task is the only writer of its entry; other tasks
/// (the notification pusher, the admin console) only ever read snapshots.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<StreamId, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// `true` if a session record already exists for `stream_id` — the
    /// precondition for `HANDSHAKE_REQUEST` (requires no existing session
    /// for `stream_id`).
    pub async fn contains(&self, stream_id: StreamId) -> bool {
        self.sessions.read().await.contains_key(&stream_id)
    }

    /// Created on `HANDSHAKE_REQUEST`.
    pub async fn insert(&self, session: Session) {
        self.sessions.write().await.insert(session.stream_id, session);
    }

    /// Removed on disconnect or `LOGOUT_REQUEST`.
    pub async fn remove(&self, stream_id: StreamId) -> Option<Session> {
        self.sessions.write().await.remove(&stream_id)
    }

    /// A cloned snapshot of the current session state, read outside the
    /// lock by the caller (e.g. before doing network I/O to push a
    /// notification — the pusher does its network I/O without holding any
    /// broker lock).
    pub async fn snapshot(&self, stream_id: StreamId) -> Option<Session> {
        self.sessions.read().await.get(&stream_id).cloned()
    }

    /// Apply `f` to the session in place, if present. The only mutation
    /// path — every write goes through here so the lock is held for the
    /// minimum span.
    pub async fn mutate<F>(&self, stream_id: StreamId, f: F)
    where
        F: FnOnce(&mut Session),
    {
        if let Some(session) = self.sessions.write().await.get_mut(&stream_id) {
            f(session);
        }
    }

    /// `find_by_uuid(uuid) -> stream_id?` — linear scan. Used to route the
    /// two-phase peer key exchange and message relay to the recipient's
    /// connection.
    pub async fn find_by_uuid(&self, uuid: Uuid) -> Option<StreamId> {
        self.sessions
            .read()
            .await
            .values()
            .find(|s| s.user_uuid == Some(uuid))
            .map(|s| s.stream_id)
    }

    /// Snapshots of every connected session — backs the admin console's
    /// `clients` command.
    pub async fn all(&self) -> Vec<Session> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn find_by_uuid_scans_authenticated_sessions() {
        let reg = SessionRegistry::new();
        let mut s = Session::new(1);
        let uuid = Uuid::new_v4();
        s.user_uuid = Some(uuid);
        reg.insert(s).await;
        assert_eq!(reg.find_by_uuid(uuid).await, Some(1));
        assert_eq!(reg.find_by_uuid(Uuid::new_v4()).await, None);
    }

    #[tokio::test]
    async fn remove_drops_the_entry() {
        let reg = SessionRegistry::new();
        reg.insert(Session::new(1)).await;
        assert!(reg.contains(1).await);
        reg.remove(1).await;
        assert!(!reg.contains(1).await);
    }

    #[tokio::test]
    async fn mutate_updates_in_place() {
        let reg = SessionRegistry::new();
        reg.insert(Session::new(1)).await;
        reg.mutate(1, |s| s.login_attempts += 1).await;
        let snap = reg.snapshot(1).await.unwrap();
        assert_eq!(snap.login_attempts, 1);
    }
}
