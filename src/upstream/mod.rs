use crate::relay::RelayStoreAdapter;
use crate::store::{Item, Kind, Snapshot};
use anyhow::{Context, Result};
use eventsource_client::{Client, ClientBuilder, SSE};
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Consumes the upstream `all` SSE stream for one environment and feeds
/// every event into its `RelayStoreAdapter`, which applies the mutation and
/// re-publishes it downstream. Grounded on `eventsource-client`, the crate
/// LaunchDarkly itself maintains for exactly this purpose (and precedented
/// in the corpus by Unleash Edge's streaming ingestion).
pub struct UpstreamClient {
    stream_uri: String,
    api_key: String,
}

impl UpstreamClient {
    pub fn new(stream_uri: &str, api_key: &str) -> Self {
        Self {
            stream_uri: stream_uri.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Runs the ingestion loop until cancelled. Reconnection is handled by
    /// `eventsource-client` itself; this loop only needs to restart the
    /// subscription if the stream ends (the client's retry policy gives up
    /// or the server closes cleanly).
    pub async fn run(&self, adapter: Arc<RelayStoreAdapter>) -> Result<()> {
        loop {
            if let Err(err) = self.run_once(&adapter).await {
                warn!(error = %err, "upstream stream ended, reconnecting in 1s");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    async fn run_once(&self, adapter: &Arc<RelayStoreAdapter>) -> Result<()> {
        let url = format!("{}/all", self.stream_uri);
        let client = ClientBuilder::for_url(&url)
            .with_context(|| format!("invalid stream uri: {}", url))?
            .header("Authorization", &self.api_key)
            .context("invalid api key header")?
            .build();

        let mut stream = client.stream();

        while let Some(event) = stream.next().await {
            match event {
                Ok(SSE::Event(event)) => {
                    if let Err(err) = self.apply(adapter, &event.event_type, &event.data).await {
                        error!(error = %err, event = %event.event_type, "failed to apply upstream event");
                    }
                }
                Ok(SSE::Comment(_)) => {}
                Err(err) => return Err(anyhow::anyhow!(err.to_string())),
            }
        }

        Ok(())
    }

    async fn apply(
        &self,
        adapter: &Arc<RelayStoreAdapter>,
        event_type: &str,
        data: &str,
    ) -> Result<()> {
        use crate::store::Store;

        match event_type {
            "put" => {
                let snapshot = parse_put(data).context("parsing put event")?;
                adapter.init(snapshot).await?;
                info!("initialized store from upstream put event");
            }
            "patch" => {
                let (kind, item) = parse_patch(data).context("parsing patch event")?;
                adapter.upsert(kind, item).await?;
            }
            "delete" => {
                let (kind, key, version) = parse_delete(data).context("parsing delete event")?;
                adapter.delete(kind, &key, version).await?;
            }
            other => {
                warn!(event = other, "ignoring unrecognized upstream event type");
            }
        }
        Ok(())
    }
}

fn kind_from_path(path: &str) -> Option<(Kind, String)> {
    let trimmed = path.trim_start_matches('/');
    let (prefix, key) = trimmed.split_once('/')?;
    let kind = match prefix {
        "flags" => Kind::Flags,
        "segments" => Kind::Segments,
        _ => return None,
    };
    Some((kind, key.to_string()))
}

fn parse_put(data: &str) -> Result<Snapshot> {
    let parsed: Value = serde_json::from_str(data)?;
    let mut snapshot = crate::store::empty_snapshot();

    for kind in Kind::ALL {
        let Some(items) = parsed
            .get("data")
            .and_then(|d| d.get(kind.as_str()))
            .and_then(Value::as_object)
        else {
            continue;
        };

        let mut map = HashMap::new();
        for (key, value) in items {
            map.insert(key.clone(), item_from_value(key, value)?);
        }
        snapshot.insert(kind, map);
    }

    Ok(snapshot)
}

fn parse_patch(data: &str) -> Result<(Kind, Item)> {
    let parsed: Value = serde_json::from_str(data)?;
    let path = parsed
        .get("path")
        .and_then(Value::as_str)
        .context("patch event missing path")?;
    let (kind, key) = kind_from_path(path).context("unrecognized patch path")?;
    let payload = parsed.get("data").context("patch event missing data")?;
    Ok((kind, item_from_value(&key, payload)?))
}

fn parse_delete(data: &str) -> Result<(Kind, String, u64)> {
    let parsed: Value = serde_json::from_str(data)?;
    let path = parsed
        .get("path")
        .and_then(Value::as_str)
        .context("delete event missing path")?;
    let (kind, key) = kind_from_path(path).context("unrecognized delete path")?;
    let version = parsed
        .get("version")
        .and_then(Value::as_u64)
        .context("delete event missing version")?;
    Ok((kind, key, version))
}

fn item_from_value(key: &str, value: &Value) -> Result<Item> {
    let version = value
        .get("version")
        .and_then(Value::as_u64)
        .context("item payload missing version")?;
    let deleted = value
        .get("deleted")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok(Item {
        key: key.to_string(),
        version,
        deleted,
        value: value.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_put_event_into_snapshot() {
        let data = r#"{"data":{"flags":{"a":{"version":1,"value":true}},"segments":{}}}"#;
        let snapshot = parse_put(data).unwrap();
        assert_eq!(snapshot[&Kind::Flags].len(), 1);
        assert_eq!(snapshot[&Kind::Flags]["a"].version, 1);
    }

    #[test]
    fn parses_patch_event() {
        let data = r#"{"path":"/flags/a","data":{"version":4,"value":42}}"#;
        let (kind, item) = parse_patch(data).unwrap();
        assert_eq!(kind, Kind::Flags);
        assert_eq!(item.key, "a");
        assert_eq!(item.version, 4);
    }

    #[test]
    fn parses_delete_event() {
        let data = r#"{"path":"/segments/b","version":7}"#;
        let (kind, key, version) = parse_delete(data).unwrap();
        assert_eq!(kind, Kind::Segments);
        assert_eq!(key, "b");
        assert_eq!(version, 7);
    }
}
