mod listener;

pub use listener::Listener;

use crate::config::Config;
use crate::events::EventForwarder;
use crate::http::{GoalsCache, Router as HttpRouter};
use crate::registry::CredentialRegistry;
use crate::supervisor::Supervisor;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::info;

pub struct Server {
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(&self) -> Result<()> {
        let mut registry = CredentialRegistry::new();
        let supervisor = Supervisor::start(&self.config, &mut registry)
            .await
            .context("failed to start environments")?;

        let goals = GoalsCache::new(&self.config.main.base_uri);
        let events = EventForwarder::new(&self.config.events);
        let router = Arc::new(HttpRouter::new(Arc::new(registry), goals, events));

        let listener = Listener::new(self.config.main.port, router);
        let mut listener_handle = tokio::spawn(async move { listener.serve().await });

        info!(port = self.config.main.port, "relay listening, waiting for shutdown signal");

        let result = tokio::select! {
            _ = shutdown_signal() => {
                info!("shutdown signal received, stopping");
                listener_handle.abort();
                Ok(())
            }
            joined = &mut listener_handle => {
                let err = match joined {
                    Ok(Ok(())) => anyhow::anyhow!("listener exited unexpectedly"),
                    Ok(Err(err)) => err,
                    Err(join_err) => anyhow::anyhow!(join_err),
                };
                tracing::error!(error = %err, "listener failed");
                if self.config.main.exit_on_error {
                    Err(err)
                } else {
                    Ok(())
                }
            }
        };

        supervisor.shutdown();
        result
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
