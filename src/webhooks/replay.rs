//! Replay suppression for webhook deliveries.
//!
//! The primary store is shared Redis (`SET NX EX`), so suppression holds
//! across processes. When Redis is unreachable the guard degrades to a
//! bounded in-process cache rather than letting duplicates through.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::clock::Clock;
use crate::error::EngineResult;

/// First-seen registration for a delivery key. Returns `true` when the key
/// was not seen within the window (the delivery is fresh), `false` on a
/// duplicate.
#[async_trait]
pub trait ReplayStore: Send + Sync {
    async fn check_and_set(&self, key: &str, ttl_secs: i64) -> EngineResult<bool>;
}

/// Shared Redis replay store. `SET NX EX` is a single atomic round trip,
/// so two racing deliveries of the same key cannot both win.
pub struct RedisReplayStore {
    conn: ConnectionManager,
}

impl RedisReplayStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ReplayStore for RedisReplayStore {
    async fn check_and_set(&self, key: &str, ttl_secs: i64) -> EngineResult<bool> {
        let mut conn = self.conn.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs.max(1))
            .query_async(&mut conn)
            .await?;
        Ok(set.is_some())
    }
}

/// Bounded in-process fallback. Purges expired entries first; if still at
/// capacity, evicts the oldest entry by insertion order.
pub struct FallbackReplayCache {
    inner: Mutex<FallbackInner>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

struct FallbackInner {
    expiries: HashMap<String, DateTime<Utc>>,
    insertion_order: VecDeque<String>,
}

impl FallbackReplayCache {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(FallbackInner {
                expiries: HashMap::new(),
                insertion_order: VecDeque::new(),
            }),
            capacity,
            clock,
        }
    }

    /// Synchronous because all state is local; the async trait wrapper
    /// below is for use as a `ReplayStore`.
    pub fn check_and_set_local(&self, key: &str, ttl_secs: i64) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(expiry) = inner.expiries.get(key) {
            if *expiry > now {
                return false;
            }
            // Expired entry for the same key; re-registering it is fresh.
        }

        // Purge expired entries before considering eviction.
        let expired: Vec<String> = inner
            .expiries
            .iter()
            .filter(|(_, expiry)| **expiry <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            inner.expiries.remove(k);
        }
        inner
            .insertion_order
            .retain(|k| !expired.contains(k));

        while inner.expiries.len() >= self.capacity {
            let Some(oldest) = inner.insertion_order.pop_front() else {
                break;
            };
            inner.expiries.remove(&oldest);
        }

        inner
            .expiries
            .insert(key.to_string(), now + Duration::seconds(ttl_secs));
        inner.insertion_order.push_back(key.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .expiries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReplayStore for FallbackReplayCache {
    async fn check_and_set(&self, key: &str, ttl_secs: i64) -> EngineResult<bool> {
        Ok(self.check_and_set_local(key, ttl_secs))
    }
}

/// Primary-plus-fallback replay guard. A primary store error downgrades to
/// the fallback cache with a warning instead of failing the delivery.
pub struct ReplayGuard {
    primary: Option<Arc<dyn ReplayStore>>,
    fallback: FallbackReplayCache,
}

impl ReplayGuard {
    pub fn new(primary: Option<Arc<dyn ReplayStore>>, fallback: FallbackReplayCache) -> Self {
        Self { primary, fallback }
    }

    /// In-process only, no shared store. Suppression then holds within this
    /// process but not across replicas.
    pub fn local_only(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            primary: None,
            fallback: FallbackReplayCache::new(capacity, clock),
        }
    }

    pub async fn first_seen(&self, key: &str, ttl_secs: i64) -> bool {
        if let Some(primary) = &self.primary {
            match primary.check_and_set(key, ttl_secs).await {
                Ok(fresh) => return fresh,
                Err(err) => {
                    warn!(%err, "replay store unreachable, using in-process fallback");
                }
            }
        }
        self.fallback.check_and_set_local(key, ttl_secs)
    }
}
