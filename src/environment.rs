use crate::config::EnvironmentConfig;
use crate::sse::Publisher;
use crate::store::Store;
use std::sync::Arc;

/// Everything the request router needs to serve one configured environment:
/// its feature store (for `/sdk/*` polling endpoints), its SSE publisher
/// (for the `/flags` streaming endpoint), and the static config it was
/// built from (for goals-cache lookups and logging).
pub struct EnvironmentHandle {
    pub config: EnvironmentConfig,
    pub store: Arc<dyn Store>,
    pub publisher: Arc<Publisher>,
}

impl EnvironmentHandle {
    pub fn new(config: EnvironmentConfig, store: Arc<dyn Store>, publisher: Arc<Publisher>) -> Self {
        Self {
            config,
            store,
            publisher,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}
