use super::{Item, Kind, Snapshot, Store, StoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Single-process feature store: one `DashMap` per kind, guarded
/// independently so reads of flags never block writes to segments.
pub struct MemoryStore {
    flags: DashMap<String, Item>,
    segments: DashMap<String, Item>,
    initialized: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            flags: DashMap::new(),
            segments: DashMap::new(),
            initialized: AtomicBool::new(false),
        }
    }

    fn map(&self, kind: Kind) -> &DashMap<String, Item> {
        match kind {
            Kind::Flags => &self.flags,
            Kind::Segments => &self.segments,
        }
    }

    /// Like `get`, but returns tombstones too — needed by `upsert`/`delete`
    /// to compare against the version of a deleted item, mirroring the
    /// `get_raw`/`get` split in `RedisStore`.
    fn get_raw(&self, kind: Kind, key: &str) -> Option<Item> {
        self.map(kind).get(key).map(|e| e.value().clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn init(&self, snapshot: Snapshot) -> StoreResult<()> {
        self.flags.clear();
        self.segments.clear();

        for (kind, items) in snapshot {
            let map = self.map(kind);
            for (key, item) in items {
                map.insert(key, item);
            }
        }

        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn get(&self, kind: Kind, key: &str) -> StoreResult<Option<Item>> {
        Ok(self.get_raw(kind, key).filter(|i| !i.deleted))
    }

    async fn all(&self, kind: Kind) -> StoreResult<HashMap<String, Item>> {
        Ok(self
            .map(kind)
            .iter()
            .filter(|e| !e.value().deleted)
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect())
    }

    async fn upsert(&self, kind: Kind, item: Item) -> StoreResult<bool> {
        let accepted = match self.get_raw(kind, &item.key) {
            Some(existing) if existing.version >= item.version => false,
            _ => true,
        };
        if accepted {
            self.map(kind).insert(item.key.clone(), item);
        }
        Ok(accepted)
    }

    async fn delete(&self, kind: Kind, key: &str, version: u64) -> StoreResult<bool> {
        let accepted = match self.get_raw(kind, key) {
            Some(existing) if existing.version >= version => false,
            _ => true,
        };
        if accepted {
            self.map(kind).insert(key.to_string(), Item::tombstone(key, version));
        }
        Ok(accepted)
    }

    async fn initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(key: &str, version: u64) -> Item {
        Item {
            key: key.to_string(),
            version,
            deleted: false,
            value: json!({"value": true}),
        }
    }

    #[tokio::test]
    async fn rejects_stale_upsert() {
        let store = MemoryStore::new();
        assert!(store.upsert(Kind::Flags, item("a", 5)).await.unwrap());
        assert!(!store.upsert(Kind::Flags, item("a", 3)).await.unwrap());
        assert!(store.upsert(Kind::Flags, item("a", 6)).await.unwrap());

        let stored = store.get(Kind::Flags, "a").await.unwrap().unwrap();
        assert_eq!(stored.version, 6);
    }

    #[tokio::test]
    async fn delete_tombstones_and_excludes_from_all() {
        let store = MemoryStore::new();
        store.upsert(Kind::Flags, item("a", 1)).await.unwrap();
        assert!(store.delete(Kind::Flags, "a", 2).await.unwrap());

        // The public `get` never surfaces a tombstone...
        assert!(store.get(Kind::Flags, "a").await.unwrap().is_none());
        assert!(store.all(Kind::Flags).await.unwrap().is_empty());
        // ...but the raw version is still visible so a later stale write is rejected.
        assert!(store.get_raw(Kind::Flags, "a").unwrap().deleted);
        assert!(!store.delete(Kind::Flags, "a", 1).await.unwrap());
    }

    #[tokio::test]
    async fn init_replaces_snapshot_and_marks_initialized() {
        let store = MemoryStore::new();
        assert!(!store.initialized().await);

        let mut snapshot = super::super::empty_snapshot();
        snapshot
            .get_mut(&Kind::Flags)
            .unwrap()
            .insert("a".to_string(), item("a", 1));
        store.init(snapshot).await.unwrap();

        assert!(store.initialized().await);
        assert_eq!(store.all(Kind::Flags).await.unwrap().len(), 1);
    }
}
