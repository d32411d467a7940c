//! Presence-with-TTL stores backing at-most-once emission per window.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::error::StoreError;

#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Whether `key` is present and unexpired.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Mark `key` present for `ttl` unless it already is. Returns whether
    /// this call created the marker.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
}

// ── Redis ───────────────────────────────────────────────────────────

/// `EXISTS` plus `SET key 1 NX EX <secs>`.
#[derive(Clone)]
pub struct RedisDedupStore {
    conn: ConnectionManager,
}

impl RedisDedupStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        info!("redis dedup store connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

// ── In-memory ───────────────────────────────────────────────────────

/// Expired markers are swept once per this many writes.
const PRUNE_EVERY: u64 = 1024;

/// Process-local store. Markers expire on access, and every
/// `PRUNE_EVERY` writes all expired markers are dropped.
#[derive(Debug, Default)]
pub struct MemoryDedupStore {
    entries: Mutex<HashMap<String, Instant>>,
    writes: AtomicU64,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unexpired markers.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().expect("dedup store lock poisoned");
        entries.values().filter(|expires| **expires > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("dedup store lock poisoned");
        match entries.get(key) {
            Some(expires) if *expires > now => Ok(true),
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("dedup store lock poisoned");
        if matches!(entries.get(key), Some(expires) if *expires > now) {
            return Ok(false);
        }
        entries.insert(key.to_string(), now + ttl);

        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_EVERY == 0 {
            let before = entries.len();
            entries.retain(|_, expires| *expires > now);
            debug!(pruned = before - entries.len(), "pruned expired dedup markers");
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_set_if_absent() {
        let store = MemoryDedupStore::new();
        assert!(!store.exists("attr:r:a.com").await.unwrap());
        assert!(store
            .set_if_absent("attr:r:a.com", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(store.exists("attr:r:a.com").await.unwrap());
        assert!(!store
            .set_if_absent("attr:r:a.com", Duration::from_secs(60))
            .await
            .unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn memory_store_sweeps_expired_markers() {
        let store = MemoryDedupStore::new();
        for i in 0..PRUNE_EVERY - 1 {
            store
                .set_if_absent(&format!("old:{i}"), Duration::from_millis(10))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Expired keys are never looked up again; the next sweep drops them.
        store
            .set_if_absent("fresh", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.entries.lock().unwrap().len(), 1);
        assert!(store.exists("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn memory_store_entries_expire() {
        let store = MemoryDedupStore::new();
        store
            .set_if_absent("k", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(store.exists("k").await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!store.exists("k").await.unwrap());
        assert!(store.is_empty());
        assert!(store.set_if_absent("k", Duration::from_secs(1)).await.unwrap());
    }
}
