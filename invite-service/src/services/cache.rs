//! Redis-backed cache and counter store.
//!
//! One keyspace serves two jobs: the read-through invite cache
//! (`invite:{id}`) and the TTL'd counters behind the rate limiter and spam
//! guard (`ratelimit:*`, `spam:*`). Keeping the counters here instead of in
//! process memory keeps them correct across service instances.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};

use super::ServiceError;
use crate::models::Invite;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    async fn set(&self, key: &str, value: &str, expiry_seconds: i64) -> Result<(), anyhow::Error>;
    async fn del(&self, key: &str) -> Result<(), anyhow::Error>;
    /// Increment a counter, attaching `expiry_seconds` as TTL when the key is
    /// first created. Returns the post-increment value.
    async fn incr(&self, key: &str, expiry_seconds: i64) -> Result<i64, anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisService {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisService {
    pub async fn new(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %url, "Connecting to Redis");
        let client = Client::open(url.to_string())?;

        // ConnectionManager reconnects automatically
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl CacheStore for RedisService {
    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get cache key: {}", e))
    }

    async fn set(&self, key: &str, value: &str, expiry_seconds: i64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(expiry_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set cache key: {}", e))
    }

    async fn del(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete cache key: {}", e))
    }

    async fn incr(&self, key: &str, expiry_seconds: i64) -> Result<i64, anyhow::Error> {
        let mut conn = self.manager.clone();
        let count: i64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to increment counter: {}", e))?;

        // NX keeps the window anchored at the first attempt
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(expiry_seconds)
            .arg("NX")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set counter expiry: {}", e))?;

        Ok(count)
    }
}

/// In-memory cache used by tests. Counters honour expiry via stored
/// deadlines; string entries ignore TTL.
pub struct MemoryCache {
    entries: std::sync::Mutex<std::collections::HashMap<String, String>>,
    counters: std::sync::Mutex<std::collections::HashMap<String, (i64, std::time::Instant)>>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: std::sync::Mutex::new(std::collections::HashMap::new()),
            counters: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let val = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Memory cache mutex poisoned: {}", e))?
            .get(key)
            .cloned();
        if val.is_some() {
            return Ok(val);
        }
        // Counters share the keyspace, as they do in redis
        let counters = self
            .counters
            .lock()
            .map_err(|e| anyhow::anyhow!("Memory cache mutex poisoned: {}", e))?;
        Ok(counters.get(key).and_then(|(count, deadline)| {
            (std::time::Instant::now() < *deadline).then(|| count.to_string())
        }))
    }

    async fn set(&self, key: &str, value: &str, _expiry_seconds: i64) -> Result<(), anyhow::Error> {
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Memory cache mutex poisoned: {}", e))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), anyhow::Error> {
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Memory cache mutex poisoned: {}", e))?
            .remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, expiry_seconds: i64) -> Result<i64, anyhow::Error> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|e| anyhow::anyhow!("Memory cache mutex poisoned: {}", e))?;

        let now = std::time::Instant::now();
        let entry = counters.entry(key.to_string()).or_insert_with(|| {
            (
                0,
                now + std::time::Duration::from_secs(expiry_seconds.max(0) as u64),
            )
        });
        if now >= entry.1 {
            *entry = (
                0,
                now + std::time::Duration::from_secs(expiry_seconds.max(0) as u64),
            );
        }
        entry.0 += 1;
        Ok(entry.0)
    }
}

/// Read-through cache of invite records, keyed `invite:{id}`.
///
/// Advisory for reads only: every state-changing decision re-checks the row
/// under a lock, so a briefly stale entry cannot drive a double accept.
#[derive(Clone)]
pub struct InviteCache {
    store: std::sync::Arc<dyn CacheStore>,
    ttl_seconds: i64,
}

impl InviteCache {
    pub fn new(store: std::sync::Arc<dyn CacheStore>, ttl_seconds: i64) -> Self {
        Self { store, ttl_seconds }
    }

    fn key(id: uuid::Uuid) -> String {
        format!("invite:{}", id)
    }

    pub async fn get(&self, id: uuid::Uuid) -> Result<Option<Invite>, ServiceError> {
        let raw = self
            .store
            .get(&Self::key(id))
            .await
            .map_err(ServiceError::Cache)?;
        match raw {
            Some(json) => match serde_json::from_str(&json) {
                Ok(invite) => Ok(Some(invite)),
                Err(e) => {
                    // Treat undecodable entries as a miss and drop them
                    tracing::warn!(invite_id = %id, error = %e, "Evicting undecodable cache entry");
                    let _ = self.store.del(&Self::key(id)).await;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub async fn put(&self, invite: &Invite) -> Result<(), ServiceError> {
        let json = serde_json::to_string(invite)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;
        self.store
            .set(&Self::key(invite.invite_id), &json, self.ttl_seconds)
            .await
            .map_err(ServiceError::Cache)
    }

    pub async fn del(&self, id: uuid::Uuid) -> Result<(), ServiceError> {
        self.store
            .del(&Self::key(id))
            .await
            .map_err(ServiceError::Cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InviteRole;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn invite_cache_round_trip_and_invalidate() {
        let cache = InviteCache::new(Arc::new(MemoryCache::new()), 3600);
        let invite = Invite::new(
            "kid@example.com".to_string(),
            InviteRole::Student,
            Uuid::new_v4(),
            7,
        );

        assert!(cache.get(invite.invite_id).await.unwrap().is_none());

        cache.put(&invite).await.unwrap();
        let cached = cache.get(invite.invite_id).await.unwrap().unwrap();
        assert_eq!(cached.invite_id, invite.invite_id);
        assert_eq!(cached.email, invite.email);

        cache.del(invite.invite_id).await.unwrap();
        assert!(cache.get(invite.invite_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_counter_increments() {
        let cache = MemoryCache::new();
        assert_eq!(cache.incr("spam:x", 60).await.unwrap(), 1);
        assert_eq!(cache.incr("spam:x", 60).await.unwrap(), 2);
        assert_eq!(cache.incr("spam:y", 60).await.unwrap(), 1);
    }
}
