//! Channel model — a named destination for messages, addressed by uuid.
//! Direct messages use a channel whose uuid equals the recipient user's
//! uuid.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// A channel record as stored in (and read back from) the `channels` table,
/// joined against `channels_users` for the subscriber set. `subscribers` is
/// never a DB column directly — the repository layer fills it in from a
/// separate `channels_users` query after the row load (`sqlx::FromRow`
/// skips it).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Channel {
    pub uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[sqlx(rename = "created")]
    pub created_at: DateTime<Utc>,
    pub request_count: i64,
    #[sqlx(rename = "last_request")]
    pub last_request_time: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub subscribers: HashSet<Uuid>,
}

/// Tunables for the relevance formula.
const DELTA: f64 = 0.0001;
const RHO: f64 = 0.1;

impl Channel {
    /// `relevance = 0.5·|subscribers| + 0.3·request_count + 0.2·decay`
    /// where `decay = (1 − Δ) ^ (Δt / ρ)` and `Δt` is seconds since
    /// `last_request_time`.
    pub fn relevance(&self, now: DateTime<Utc>) -> f64 {
        let delta_t = match self.last_request_time {
            Some(last) => (now - last).num_milliseconds().max(0) as f64 / 1000.0,
            // No requests yet — treat as maximally decayed, not ageless.
            None => f64::MAX,
        };
        let decay = if delta_t.is_finite() {
            (1.0 - DELTA).powf(delta_t / RHO)
        } else {
            0.0
        };
        0.5 * self.subscribers.len() as f64 + 0.3 * self.request_count as f64 + 0.2 * decay
    }

    /// Record a new request: bump `request_count` and refresh
    /// `last_request_time`, which (by the formula above) increases
    /// relevance.
    pub fn record_request(&mut self, now: DateTime<Utc>) {
        self.request_count += 1;
        self.last_request_time = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn channel(subscribers: usize, request_count: i64, last_request: Option<DateTime<Utc>>) -> Channel {
        Channel {
            uuid: Uuid::new_v4(),
            name: "test".into(),
            description: None,
            created_at: Utc::now(),
            request_count,
            last_request_time: last_request,
            subscribers: (0..subscribers).map(|_| Uuid::new_v4()).collect(),
        }
    }

    #[test]
    fn relevance_decreases_with_time_absent_new_requests() {
        let now = Utc::now();
        let c = channel(1, 1, Some(now - Duration::seconds(10)));
        let earlier = c.relevance(now);
        let later = c.relevance(now + Duration::seconds(3600));
        assert!(later < earlier);
    }

    #[test]
    fn relevance_increases_on_access() {
        let now = Utc::now();
        let mut c = channel(1, 1, Some(now - Duration::seconds(1000)));
        let before = c.relevance(now);
        c.record_request(now);
        let after = c.relevance(now);
        assert!(after > before);
    }
}
