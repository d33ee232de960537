use super::{Item, Kind, Snapshot, Store, StoreError, StoreResult};
use crate::config::RedisConfig;
use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

struct CacheEntry {
    item: Item,
    expires_at: Instant,
}

/// Shared feature store backed by Redis, fronted by a short-lived local
/// cache so a burst of reads for the same key doesn't round-trip to Redis
/// on every request. Writes always go straight through and invalidate the
/// local entry.
pub struct RedisStore {
    config: RedisConfig,
    prefix: String,
    conn: RwLock<Option<ConnectionManager>>,
    local_cache: DashMap<String, CacheEntry>,
    initialized: AtomicBool,
}

impl RedisStore {
    pub fn new(config: RedisConfig, prefix: String) -> Self {
        Self {
            config,
            prefix,
            conn: RwLock::new(None),
            local_cache: DashMap::new(),
            initialized: AtomicBool::new(false),
        }
    }

    async fn connection(&self) -> StoreResult<ConnectionManager> {
        if let Some(conn) = self.conn.read().await.as_ref() {
            return Ok(conn.clone());
        }

        let mut guard = self.conn.write().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let url = format!("redis://{}:{}", self.config.host, self.config.port);
        let client =
            Client::open(url.as_str()).map_err(|e| StoreError::Connection(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        *guard = Some(manager.clone());
        Ok(manager)
    }

    fn key(&self, kind: Kind, item_key: &str) -> String {
        format!("{}:{}:{}", self.prefix, kind.store_segment(), item_key)
    }

    fn inited_key(&self) -> String {
        format!("{}:$inited", self.prefix)
    }

    fn cache_key(&self, kind: Kind, item_key: &str) -> String {
        format!("{}|{}", kind.store_segment(), item_key)
    }

    fn ttl(&self) -> Duration {
        Duration::from_millis(self.config.local_ttl_ms)
    }

    fn cache_put(&self, kind: Kind, item: Item) {
        let cache_key = self.cache_key(kind, &item.key);
        self.local_cache.insert(
            cache_key,
            CacheEntry {
                item,
                expires_at: Instant::now() + self.ttl(),
            },
        );
    }

    fn cache_invalidate(&self, kind: Kind, item_key: &str) {
        self.local_cache.remove(&self.cache_key(kind, item_key));
    }

    /// Like `get`, but returns tombstones too — needed by `upsert`/`delete`
    /// to compare against the version of a deleted item.
    async fn get_raw(&self, kind: Kind, key: &str) -> StoreResult<Option<Item>> {
        if let Some(item) = self.cache_get_raw(kind, key) {
            return Ok(Some(item));
        }

        let mut conn = self.connection().await?;
        let redis_key = self.key(kind, key);
        let json: Option<String> = conn
            .get(&redis_key)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        match json {
            Some(json) => {
                let item: Item = serde_json::from_str(&json)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                self.cache_put(kind, item.clone());
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    fn cache_get_raw(&self, kind: Kind, item_key: &str) -> Option<Item> {
        let cache_key = self.cache_key(kind, item_key);
        match self.local_cache.get(&cache_key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.item.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn init(&self, snapshot: Snapshot) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        self.local_cache.clear();

        for (kind, items) in snapshot {
            for (item_key, item) in items {
                let redis_key = self.key(kind, &item_key);
                let json = serde_json::to_string(&item)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                conn.set::<_, _, ()>(&redis_key, json)
                    .await
                    .map_err(|e| StoreError::Connection(e.to_string()))?;
            }
        }

        conn.set::<_, _, ()>(self.inited_key(), "1")
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn get(&self, kind: Kind, key: &str) -> StoreResult<Option<Item>> {
        Ok(self.get_raw(kind, key).await?.filter(|i| !i.deleted))
    }

    async fn all(&self, kind: Kind) -> StoreResult<HashMap<String, Item>> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}:{}:*", self.prefix, kind.store_segment());
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let mut result = HashMap::new();
        for redis_key in keys {
            let json: Option<String> = conn
                .get(&redis_key)
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))?;
            if let Some(json) = json {
                match serde_json::from_str::<Item>(&json) {
                    Ok(item) if !item.deleted => {
                        result.insert(item.key.clone(), item);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("dropping unparsable stored item at {}: {}", redis_key, e),
                }
            }
        }

        Ok(result)
    }

    async fn upsert(&self, kind: Kind, item: Item) -> StoreResult<bool> {
        let existing = self.get_raw(kind, &item.key).await?;
        if let Some(existing) = &existing {
            if existing.version >= item.version {
                return Ok(false);
            }
        }

        let mut conn = self.connection().await?;
        let redis_key = self.key(kind, &item.key);
        let json = serde_json::to_string(&item)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        conn.set::<_, _, ()>(&redis_key, json)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        self.cache_invalidate(kind, &item.key);
        self.cache_put(kind, item);
        debug!("upsert accepted for {}", redis_key);
        Ok(true)
    }

    async fn delete(&self, kind: Kind, key: &str, version: u64) -> StoreResult<bool> {
        let existing = self.get_raw(kind, key).await?;
        if let Some(existing) = &existing {
            if existing.version >= version {
                return Ok(false);
            }
        }

        let tombstone = Item::tombstone(key, version);
        let mut conn = self.connection().await?;
        let redis_key = self.key(kind, key);
        let json = serde_json::to_string(&tombstone)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        conn.set::<_, _, ()>(&redis_key, json)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        self.cache_invalidate(kind, key);
        Ok(true)
    }

    async fn initialized(&self) -> bool {
        if self.initialized.load(Ordering::Acquire) {
            return true;
        }

        let Ok(mut conn) = self.connection().await else {
            return false;
        };
        let exists: bool = conn.exists(self.inited_key()).await.unwrap_or(false);
        if exists {
            self.initialized.store(true, Ordering::Release);
        }
        exists
    }
}
