use crate::sse::{Publisher, SseEvent};
use crate::store::{Item, Kind, Snapshot, Store, StoreResult};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Wraps a `Store` and republishes every accepted mutation as a downstream
/// SSE event. A mutation the store rejects (stale version, duplicate) never
/// reaches subscribers — only state changes that actually happened do.
pub struct RelayStoreAdapter {
    inner: Arc<dyn Store>,
    publisher: Arc<Publisher>,
}

impl RelayStoreAdapter {
    pub fn new(inner: Arc<dyn Store>, publisher: Arc<Publisher>) -> Self {
        Self { inner, publisher }
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    /// Builds the synthetic `put` event describing the full current state,
    /// used both when publishing a fresh snapshot and to replay state to a
    /// subscriber that just connected.
    pub async fn current_put_event(&self) -> StoreResult<SseEvent> {
        let mut data = HashMap::new();
        for kind in Kind::ALL {
            data.insert(kind.as_str(), self.inner.all(kind).await?);
        }
        Ok(SseEvent::new("put", json!({ "data": data }).to_string()))
    }
}

#[async_trait]
impl Store for RelayStoreAdapter {
    async fn init(&self, snapshot: Snapshot) -> StoreResult<()> {
        self.inner.init(snapshot).await?;
        let event = self.current_put_event().await?;
        self.publisher.publish(event);
        Ok(())
    }

    async fn get(&self, kind: Kind, key: &str) -> StoreResult<Option<Item>> {
        self.inner.get(kind, key).await
    }

    async fn all(&self, kind: Kind) -> StoreResult<HashMap<String, Item>> {
        self.inner.all(kind).await
    }

    async fn upsert(&self, kind: Kind, item: Item) -> StoreResult<bool> {
        let accepted = self.inner.upsert(kind, item.clone()).await?;
        if accepted {
            let payload = json!({
                "path": format!("/{}/{}", kind.as_str(), item.key),
                "data": item.value,
                "version": item.version,
            });
            self.publisher.publish(SseEvent::new("patch", payload.to_string()));
        }
        Ok(accepted)
    }

    async fn delete(&self, kind: Kind, key: &str, version: u64) -> StoreResult<bool> {
        let accepted = self.inner.delete(kind, key, version).await?;
        if accepted {
            let payload = json!({
                "path": format!("/{}/{}", kind.as_str(), key),
                "version": version,
            });
            self.publisher.publish(SseEvent::new("delete", payload.to_string()));
        }
        Ok(accepted)
    }

    async fn initialized(&self) -> bool {
        self.inner.initialized().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json as j;
    use std::time::Duration;

    fn test_item(key: &str, version: u64) -> Item {
        Item {
            key: key.to_string(),
            version,
            deleted: false,
            value: j!({"value": true}),
        }
    }

    #[tokio::test]
    async fn accepted_upsert_publishes_patch_event() {
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(Publisher::new(16, Duration::from_secs(30)));
        let mut rx = publisher.subscribe();
        let adapter = RelayStoreAdapter::new(store, publisher);

        assert!(adapter.upsert(Kind::Flags, test_item("a", 1)).await.unwrap());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "patch");
        assert!(event.data.contains("/flags/a"));
    }

    #[tokio::test]
    async fn rejected_upsert_does_not_publish() {
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(Publisher::new(16, Duration::from_secs(30)));
        let mut rx = publisher.subscribe();
        let adapter = RelayStoreAdapter::new(store, publisher);

        adapter.upsert(Kind::Flags, test_item("a", 5)).await.unwrap();
        rx.recv().await.unwrap();

        assert!(!adapter.upsert(Kind::Flags, test_item("a", 3)).await.unwrap());
        assert!(rx.try_recv().is_err());
    }
}
