//! The persistence engine facade (C6) — the one shared state handle passed
//! through the broker, grounded on the reference stack's
//! `nexus_db::Database` ("one shared state handle passed through the
//! server" pattern), generalized from its Postgres/Any-pool shape to a
//! single embedded SQLite pool plus the cache/queue/snapshot subsystems
//! this spec requires and the reference stack does not have.

use crate::cache::ChannelCache;
use crate::queue::{PendingMessage, WriteQueue};
use crate::repository;
use crate::snapshot;
use iplchat_common::crypto;
use iplchat_common::models::channel::Channel;
use iplchat_common::models::message::MessageKind;
use iplchat_common::models::user::{LoginOutcome, RegisterOutcome, User};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] snapshot::SnapshotError),
}

pub type EngineResult<T> = Result<T, EngineError>;

pub struct Engine {
    pool: SqlitePool,
    database_file: PathBuf,
    snapshot_dir: PathBuf,
    snapshot_backlog: usize,
    buffered_access: bool,
    cache: ChannelCache,
    queue: WriteQueue,
    /// Monotonically incrementing snapshot-load counter, surfaced by the
    /// admin console's `snapshot-list`/`snapshot` commands for operator
    /// visibility; not part of any spec invariant.
    snapshot_count: AtomicI64,
    /// Serializes writes: batch flush runs under an exclusive database
    /// lock. Reads (repository queries) go straight to the pool and may
    /// run concurrently; this lock is taken only around `flush`,
    /// `save_snapshot`, `load_snapshot`, and `revert_snapshot_load`.
    write_lock: Mutex<()>,
}

impl Engine {
    pub async fn connect(
        database_file: PathBuf,
        snapshot_dir: PathBuf,
        snapshot_backlog: usize,
        buffered_access: bool,
    ) -> EngineResult<Self> {
        if let Some(parent) = database_file.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let url = format!("sqlite://{}?mode=rwc", database_file.display());
        let pool = SqlitePool::connect(&url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            database_file,
            snapshot_dir,
            snapshot_backlog,
            buffered_access,
            cache: ChannelCache::new(),
            queue: WriteQueue::new(),
            snapshot_count: AtomicI64::new(0),
            write_lock: Mutex::new(()),
        })
    }

    // ========================================================
    // Users
    // ========================================================

    /// `register_client(uuid, name, password)`. Hashes the password with a
    /// fresh 16-byte salt.
    pub async fn register_client(
        &self,
        uuid: Uuid,
        username: &str,
        password: &str,
    ) -> EngineResult<RegisterOutcome> {
        if repository::users::find_by_username(&self.pool, username)
            .await?
            .is_some()
        {
            return Ok(RegisterOutcome::AlreadyExists);
        }
        let salt = crypto::random_bytes(16);
        let hash = crypto::hash(&[password.as_bytes(), &salt].concat());
        match repository::users::create(&self.pool, uuid, username, &hash, &salt).await {
            Ok(_) => Ok(RegisterOutcome::Ok),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Ok(RegisterOutcome::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `login(name, password)`. Constant-time comparison over the salted
    /// hash; on success sets `is_authenticated=true` and refreshes
    /// `last_auth`.
    pub async fn login(&self, username: &str, password: &str) -> EngineResult<(LoginOutcome, Option<User>)> {
        let Some(user) = repository::users::find_by_username(&self.pool, username).await? else {
            return Ok((LoginOutcome::NotFound, None));
        };
        let candidate = crypto::hash(&[password.as_bytes(), &user.password_salt].concat());
        use subtle::ConstantTimeEq;
        if candidate[..].ct_eq(user.password_hash.as_slice()).unwrap_u8() != 1 {
            return Ok((LoginOutcome::InvalidPassword, None));
        }
        repository::users::set_authenticated(&self.pool, user.uuid, true, true).await?;
        let mut user = user;
        user.is_authenticated = true;
        Ok((LoginOutcome::Ok, Some(user)))
    }

    pub async fn deauthenticate(&self, uuid: Uuid) -> EngineResult<()> {
        repository::users::set_authenticated(&self.pool, uuid, false, false).await?;
        Ok(())
    }

    pub async fn get_user_uuid(&self, username: &str) -> EngineResult<Option<Uuid>> {
        Ok(repository::users::find_by_username(&self.pool, username)
            .await?
            .map(|u| u.uuid))
    }

    pub async fn get_username(&self, uuid: Uuid) -> EngineResult<Option<String>> {
        Ok(repository::users::find_by_uuid(&self.pool, uuid)
            .await?
            .map(|u| u.username))
    }

    /// `search_users(requester_name, pattern, depth=3)`.
    pub async fn search_users(
        &self,
        requester_uuid: Uuid,
        pattern: &str,
        depth: i64,
    ) -> EngineResult<Vec<User>> {
        Ok(repository::users::search_by_username(&self.pool, pattern, requester_uuid, depth).await?)
    }

    // ========================================================
    // Channels
    // ========================================================

    pub async fn create_channel_if_absent(&self, name: &str, uuid: Uuid) -> EngineResult<()> {
        repository::channels::create_if_absent(&self.pool, name, uuid).await?;
        Ok(())
    }

    /// `join_channel(user_uuid, channel_uuid)` — idempotent.
    pub async fn join_channel(&self, user_uuid: Uuid, channel_uuid: Uuid) -> EngineResult<()> {
        repository::subscriptions::join(&self.pool, user_uuid, channel_uuid).await?;
        if let Some(channel) = repository::channels::find_by_uuid(&self.pool, channel_uuid).await? {
            self.cache.update(channel);
        }
        Ok(())
    }

    pub async fn is_subscribed(&self, user_uuid: Uuid, channel_uuid: Uuid) -> EngineResult<bool> {
        Ok(repository::subscriptions::is_member(&self.pool, user_uuid, channel_uuid).await?)
    }

    pub async fn subscribed_channels(&self, user_uuid: Uuid) -> EngineResult<Vec<Channel>> {
        Ok(repository::channels::subscribed_by(&self.pool, user_uuid).await?)
    }

    /// `get_channel(uuid)` — cache lookup first when buffering is enabled
    /// (`databaseBufferedAccess`), otherwise a direct read. A cache hit
    /// still records the access (bumping relevance); a miss
    /// reads through and offers the result to the cache under the
    /// eviction rule.
    pub async fn get_channel(&self, uuid: Uuid) -> EngineResult<Option<Channel>> {
        if self.buffered_access {
            if let Some(mut cached) = self.cache.get(uuid) {
                repository::channels::record_request(&self.pool, uuid).await?;
                cached.record_request(chrono::Utc::now());
                self.cache.update(cached.clone());
                return Ok(Some(cached));
            }
        }
        repository::channels::record_request(&self.pool, uuid).await?;
        let Some(mut channel) = repository::channels::find_by_uuid(&self.pool, uuid).await? else {
            return Ok(None);
        };
        channel.record_request(chrono::Utc::now());
        if self.buffered_access {
            self.cache.insert(channel.clone());
        }
        Ok(Some(channel))
    }

    #[cfg(test)]
    pub(crate) fn cache_len(&self) -> usize {
        self.cache.len()
    }

    // ========================================================
    // Messages (write queue)
    // ========================================================

    pub fn enqueue_message(
        &self,
        kind: MessageKind,
        sender: Uuid,
        channel: Uuid,
        content: Vec<u8>,
        file: Option<Uuid>,
    ) {
        self.queue.enqueue(PendingMessage {
            kind,
            sender,
            channel,
            content,
            file,
        });
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Drain the write queue to durable storage in enqueue order.
    pub async fn flush(&self) -> EngineResult<usize> {
        let _guard = self.write_lock.lock().await;
        let pending = self.queue.drain();
        let n = pending.len();
        for msg in pending {
            repository::messages::insert(&self.pool, msg.kind, msg.sender, msg.channel, &msg.content, msg.file)
                .await?;
        }
        Ok(n)
    }

    pub async fn messages_since(
        &self,
        channel: Uuid,
        since_id: i64,
    ) -> EngineResult<Vec<iplchat_common::models::message::StoredMessage>> {
        Ok(repository::messages::since(&self.pool, channel, since_id).await?)
    }

    // ========================================================
    // Snapshots
    // ========================================================

    pub async fn save_snapshot(&self) -> EngineResult<String> {
        let _guard = self.write_lock.lock().await;
        let name = snapshot::save(&self.database_file, &self.snapshot_dir, self.snapshot_backlog).await?;
        self.snapshot_count.fetch_add(1, Ordering::Relaxed);
        Ok(name)
    }

    pub async fn load_snapshot(&self, name: &str) -> EngineResult<()> {
        let _guard = self.write_lock.lock().await;
        snapshot::load(&self.database_file, &self.snapshot_dir, name).await?;
        Ok(())
    }

    pub async fn revert_snapshot_load(&self) -> EngineResult<()> {
        let _guard = self.write_lock.lock().await;
        snapshot::revert(&self.database_file).await?;
        Ok(())
    }

    pub async fn list_snapshots(&self) -> EngineResult<Vec<String>> {
        Ok(snapshot::list(&self.snapshot_dir).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_engine() -> Engine {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::connect(dir.path().join("test.db"), dir.path().join("snapshots"), 10, true)
            .await
            .unwrap();
        // Leak the tempdir: the pool outlives this function and still needs
        // the file on disk.
        std::mem::forget(dir);
        engine
    }

    #[tokio::test]
    async fn flush_writes_enqueued_messages_in_order() {
        let engine = test_engine().await;
        let sender = Uuid::new_v4();
        let channel = Uuid::new_v4();
        engine.create_channel_if_absent("general", channel).await.unwrap();

        for i in 0..5u8 {
            engine.enqueue_message(MessageKind::Text, sender, channel, vec![i], None);
        }
        assert_eq!(engine.queue_len(), 5);

        let flushed = engine.flush().await.unwrap();
        assert_eq!(flushed, 5);
        assert_eq!(engine.queue_len(), 0);

        let stored = engine.messages_since(channel, 0).await.unwrap();
        assert_eq!(stored.len(), 5);
        for (i, msg) in stored.iter().enumerate() {
            assert_eq!(msg.content, vec![i as u8]);
            assert_eq!(msg.sender, sender);
            assert_eq!(msg.channel, channel);
        }
        assert!(stored.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn flush_on_empty_queue_writes_nothing() {
        let engine = test_engine().await;
        assert_eq!(engine.flush().await.unwrap(), 0);
    }
}
