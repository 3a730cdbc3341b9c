//! Channel cache — capacity-100, relevance-weighted eviction.
//!
//! New code: the reference stack has no read-through cache layer of its
//! own (its "hot path" is Postgres + optional Redis, not an in-process
//! LRU-like structure), so this is designed directly from the eviction
//! rule below. The lock covers both the capacity check and the
//! insertion/eviction decision as one atomic step, so the eviction rule
//! cannot race.

use chrono::Utc;
use iplchat_common::models::channel::Channel;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

pub const CACHE_CAPACITY: usize = 100;

pub struct ChannelCache {
    entries: Mutex<HashMap<Uuid, Channel>>,
}

impl ChannelCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(CACHE_CAPACITY)),
        }
    }

    pub fn get(&self, uuid: Uuid) -> Option<Channel> {
        self.entries.lock().unwrap().get(&uuid).cloned()
    }

    /// Insert or refresh `channel` in the cache, applying the eviction
    /// rule: if the key is already resident, the insert is a no-op (the
    /// caller should update in place via [`ChannelCache::update`] instead);
    /// if the cache has room, insert unconditionally; if full, replace the
    /// lowest-relevance resident only if `channel`'s relevance strictly
    /// exceeds it, otherwise the channel is left uncached (written
    /// through).
    ///
    /// Returns `true` if `channel` ended up cached.
    pub fn insert(&self, channel: Channel) -> bool {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&channel.uuid) {
            return true;
        }
        if entries.len() < CACHE_CAPACITY {
            entries.insert(channel.uuid, channel);
            return true;
        }
        let incumbent_key = entries
            .iter()
            .min_by(|a, b| {
                a.1.relevance(now)
                    .partial_cmp(&b.1.relevance(now))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(k, _)| *k);
        let Some(incumbent_key) = incumbent_key else {
            entries.insert(channel.uuid, channel);
            return true;
        };
        let incumbent_relevance = entries[&incumbent_key].relevance(now);
        if channel.relevance(now) > incumbent_relevance {
            entries.remove(&incumbent_key);
            entries.insert(channel.uuid, channel);
            true
        } else {
            false
        }
    }

    /// Overwrite a resident entry in place (used after a write that
    /// changes a cached channel's subscriber set or relevance-affecting
    /// fields, so the cache stays consistent with the database).
    pub fn update(&self, channel: Channel) {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&channel.uuid) {
            entries.insert(channel.uuid, channel);
        }
    }

    pub fn remove(&self, uuid: Uuid) {
        self.entries.lock().unwrap().remove(&uuid);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ChannelCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn channel_with_relevance(subscribers: usize) -> Channel {
        Channel {
            uuid: Uuid::new_v4(),
            name: "test".into(),
            description: None,
            created_at: Utc::now(),
            request_count: 0,
            last_request_time: Some(Utc::now() - Duration::seconds(1)),
            subscribers: (0..subscribers).map(|_| Uuid::new_v4()).collect(),
        }
    }

    #[test]
    fn fills_up_to_capacity_unconditionally() {
        let cache = ChannelCache::new();
        for _ in 0..CACHE_CAPACITY {
            assert!(cache.insert(channel_with_relevance(1)));
        }
        assert_eq!(cache.len(), CACHE_CAPACITY);
    }

    #[test]
    fn never_exceeds_capacity_and_rejects_lower_relevance() {
        let cache = ChannelCache::new();
        for _ in 0..CACHE_CAPACITY {
            // relevance ~= 0.5*1 + 0.2*~1.0 = 0.7
            cache.insert(channel_with_relevance(1));
        }
        // A brand-new channel with no subscribers and no request history
        // decays to relevance 0 — strictly lower than any resident.
        let low = Channel {
            uuid: Uuid::new_v4(),
            name: "low".into(),
            description: None,
            created_at: Utc::now(),
            request_count: 0,
            last_request_time: None,
            subscribers: Default::default(),
        };
        assert!(!cache.insert(low));
        assert_eq!(cache.len(), CACHE_CAPACITY);
    }

    #[test]
    fn evicts_lowest_relevance_for_strictly_higher_candidate() {
        let cache = ChannelCache::new();
        for _ in 0..CACHE_CAPACITY {
            cache.insert(channel_with_relevance(1));
        }
        let high = Channel {
            uuid: Uuid::new_v4(),
            name: "high".into(),
            description: None,
            created_at: Utc::now(),
            request_count: 1000,
            last_request_time: Some(Utc::now()),
            subscribers: (0..50).map(|_| Uuid::new_v4()).collect(),
        };
        assert!(cache.insert(high));
        assert_eq!(cache.len(), CACHE_CAPACITY);
    }

    #[test]
    fn duplicate_insert_is_a_no_op() {
        let cache = ChannelCache::new();
        let c = channel_with_relevance(1);
        assert!(cache.insert(c.clone()));
        assert!(cache.insert(c));
        assert_eq!(cache.len(), 1);
    }
}
