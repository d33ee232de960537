mod memory;
mod redis_backed;

pub use memory::MemoryStore;
pub use redis_backed::RedisStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Config, EnvironmentConfig};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store unavailable")]
    Unavailable,
}

/// The two collections a flag-data item can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Kind {
    Flags,
    Segments,
}

impl Kind {
    /// Wire-format name, used in SSE envelopes and patch/delete paths
    /// (`{"flags": ..., "segments": ...}`, `/flags/<key>`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Flags => "flags",
            Kind::Segments => "segments",
        }
    }

    /// Persisted-store namespace segment. The shared backend's key layout
    /// predates the `flags` wire name (`<prefix>:features:<key>`), so this
    /// intentionally differs from `as_str()` for `Flags`.
    pub fn store_segment(&self) -> &'static str {
        match self {
            Kind::Flags => "features",
            Kind::Segments => "segments",
        }
    }

    pub const ALL: [Kind; 2] = [Kind::Flags, Kind::Segments];
}

/// A single versioned item, opaque beyond its version and deletion state.
/// The `value` payload is never interpreted by the store itself — only by
/// the minimal evaluator in `crate::http::eval`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub key: String,
    pub version: u64,
    #[serde(default)]
    pub deleted: bool,
    /// Opaque flag/segment payload as received from upstream.
    pub value: Value,
}

impl Item {
    pub fn tombstone(key: &str, version: u64) -> Self {
        Item {
            key: key.to_string(),
            version,
            deleted: true,
            value: Value::Null,
        }
    }
}

/// A full snapshot of one environment's data set, as delivered by the
/// upstream `put` event.
pub type Snapshot = HashMap<Kind, HashMap<String, Item>>;

pub fn empty_snapshot() -> Snapshot {
    Kind::ALL.iter().map(|k| (*k, HashMap::new())).collect()
}

/// Per-environment feature store: holds the latest known state for one
/// environment's flags and segments, with monotonic-version write semantics.
///
/// `init` replaces the whole snapshot and marks the store initialized;
/// `upsert`/`delete` apply a single versioned mutation, silently ignoring
/// any version at or behind the one already stored.
#[async_trait]
pub trait Store: Send + Sync {
    async fn init(&self, snapshot: Snapshot) -> StoreResult<()>;

    async fn get(&self, kind: Kind, key: &str) -> StoreResult<Option<Item>>;

    async fn all(&self, kind: Kind) -> StoreResult<HashMap<String, Item>>;

    /// Applies an upsert. Returns `true` if the item was actually written
    /// (i.e. its version was newer than what was stored), `false` if it was
    /// a stale or duplicate write that was ignored.
    async fn upsert(&self, kind: Kind, item: Item) -> StoreResult<bool>;

    /// Applies a delete (tombstone) at `version`. Same accepted/ignored
    /// semantics as `upsert`.
    async fn delete(&self, kind: Kind, key: &str, version: u64) -> StoreResult<bool>;

    async fn initialized(&self) -> bool;
}

/// Builds the backend configured for one environment: in-memory when no
/// `[redis]` section is present, Redis-backed (with a local TTL cache in
/// front of reads) otherwise.
pub fn create_store(config: &Config, env: &EnvironmentConfig) -> Arc<dyn Store> {
    match &config.redis {
        Some(redis_cfg) => {
            let prefix = env.prefix.clone().unwrap_or_else(|| env.name.clone());
            Arc::new(RedisStore::new(redis_cfg.clone(), prefix))
        }
        None => Arc::new(MemoryStore::new()),
    }
}
