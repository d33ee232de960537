use crate::config::EventsConfig;
use bytes::Bytes;
use reqwest::Client;

/// Forwards the raw body of `POST /bulk` to the upstream analytics
/// ingestion endpoint. Event buffering, sampling, and persistence are
/// explicitly out of scope — this is a contract-only passthrough that
/// preserves the caller's API key and content type.
pub struct EventForwarder {
    client: Client,
    events_uri: Option<String>,
    enabled: bool,
}

impl EventForwarder {
    pub fn new(config: &EventsConfig) -> Self {
        Self {
            client: Client::new(),
            events_uri: config.events_uri.clone(),
            enabled: config.send_events,
        }
    }

    pub async fn forward(
        &self,
        api_key: &str,
        content_type: Option<&str>,
        body: Bytes,
    ) -> anyhow::Result<u16> {
        if !self.enabled {
            return Ok(202);
        }

        let Some(events_uri) = &self.events_uri else {
            return Ok(202);
        };

        let mut request = self
            .client
            .post(format!("{}/bulk", events_uri.trim_end_matches('/')))
            .header("Authorization", api_key)
            .body(body);

        if let Some(content_type) = content_type {
            request = request.header(reqwest::header::CONTENT_TYPE, content_type);
        }

        let response = request.send().await?;
        Ok(response.status().as_u16())
    }
}
