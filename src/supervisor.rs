use crate::config::Config;
use crate::environment::EnvironmentHandle;
use crate::registry::CredentialRegistry;
use crate::relay::RelayStoreAdapter;
use crate::sse::Publisher;
use crate::store::{create_store, Store};
use crate::upstream::UpstreamClient;
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Brings every configured environment up: builds its store, SSE publisher,
/// and relay adapter, registers it under all three credential kinds, and
/// spawns the task that keeps it in sync with the upstream stream.
///
/// Mirrors the teacher's "spawn one task per long-lived unit, track the
/// handle, wait for a shutdown signal" shape from `server/mod.rs`, applied
/// per environment instead of per entrypoint.
pub struct Supervisor {
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Supervisor {
    /// Starts every environment in `config`, populating `registry` as each
    /// one comes up. Returns once every environment has either initialized
    /// or been given up on, honoring `exitOnError`/`ignoreConnectionErrors`.
    pub async fn start(config: &Config, registry: &mut CredentialRegistry) -> Result<Self> {
        let mut tasks = Vec::new();

        for env in &config.environments {
            let store = create_store(config, env);
            let publisher = Arc::new(Publisher::new(
                1024,
                Duration::from_secs(config.main.heartbeat_interval_secs),
            ));
            let adapter = Arc::new(RelayStoreAdapter::new(store.clone(), publisher.clone()));

            let handle = Arc::new(EnvironmentHandle::new(
                env.clone(),
                adapter.clone() as Arc<dyn Store>,
                publisher,
            ));
            registry.register(handle.clone());
            if config.events.send_events {
                registry.register_event_handler(handle);
            }

            let client = UpstreamClient::new(&config.main.stream_uri, &env.api_key);
            let adapter_for_task = adapter.clone();
            let env_name = env.name.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(err) = client.run(adapter_for_task).await {
                    error!(environment = %env_name, error = %err, "upstream ingestion task ended");
                }
            }));

            let deadline = Duration::from_secs(config.main.init_timeout_secs);
            let ready = tokio::time::timeout(deadline, wait_until_initialized(&adapter)).await;

            match ready {
                Ok(()) => info!(environment = %env.name, "environment initialized"),
                Err(_) if config.main.ignore_connection_errors => {
                    warn!(
                        environment = %env.name,
                        timeout_secs = config.main.init_timeout_secs,
                        "environment did not initialize in time, continuing (ignoreConnectionErrors)"
                    );
                }
                Err(_) if config.main.exit_on_error => {
                    bail!(
                        "environment '{}' failed to initialize within {}s",
                        env.name,
                        config.main.init_timeout_secs
                    );
                }
                Err(_) => {
                    warn!(
                        environment = %env.name,
                        timeout_secs = config.main.init_timeout_secs,
                        "environment did not initialize in time, continuing"
                    );
                }
            }
        }

        Ok(Self { tasks })
    }

    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

async fn wait_until_initialized(adapter: &Arc<RelayStoreAdapter>) {
    while !adapter.initialized().await {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
