use bytes::Bytes;
use dashmap::DashMap;
use reqwest::Client;
use std::time::{Duration, Instant};

struct CachedGoals {
    body: Bytes,
    etag: Option<String>,
    content_type: Option<String>,
    fetched_at: Instant,
    max_age: Duration,
}

impl CachedGoals {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.max_age
    }
}

/// Passthrough cache for the upstream `/sdk/goals/<envId>` endpoint.
/// Goals change rarely, so honoring the upstream's own `Cache-Control`
/// max-age (falling back to a minute) avoids hammering it on every
/// browser-SDK page load while still picking up edits promptly.
pub struct GoalsCache {
    client: Client,
    base_uri: String,
    cache: DashMap<String, CachedGoals>,
}

pub struct GoalsResponse {
    pub status: u16,
    pub body: Bytes,
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

impl GoalsCache {
    pub fn new(base_uri: &str) -> Self {
        Self {
            client: Client::new(),
            base_uri: base_uri.trim_end_matches('/').to_string(),
            cache: DashMap::new(),
        }
    }

    pub async fn fetch(&self, env_id: &str) -> anyhow::Result<GoalsResponse> {
        if let Some(cached) = self.cache.get(env_id) {
            if cached.is_fresh() {
                return Ok(GoalsResponse {
                    status: 200,
                    body: cached.body.clone(),
                    etag: cached.etag.clone(),
                    content_type: cached.content_type.clone(),
                });
            }
        }

        let url = format!("{}/sdk/goals/{}", self.base_uri, env_id);
        let response = self.client.get(&url).send().await?;
        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let max_age = response
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age)
            .unwrap_or(Duration::from_secs(60));
        let body = response.bytes().await?;

        if status == 200 {
            self.cache.insert(
                env_id.to_string(),
                CachedGoals {
                    body: body.clone(),
                    etag: etag.clone(),
                    content_type: content_type.clone(),
                    fetched_at: Instant::now(),
                    max_age,
                },
            );
        }

        Ok(GoalsResponse {
            status,
            body,
            etag,
            content_type,
        })
    }
}

fn parse_max_age(header: &str) -> Option<Duration> {
    header.split(',').find_map(|directive| {
        let directive = directive.trim();
        let seconds = directive.strip_prefix("max-age=")?;
        seconds.parse().ok().map(Duration::from_secs)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_max_age_directive_among_others() {
        assert_eq!(
            parse_max_age("public, max-age=120, must-revalidate"),
            Some(Duration::from_secs(120))
        );
        assert_eq!(parse_max_age("no-store"), None);
    }
}
