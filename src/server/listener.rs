use crate::http::Router as HttpRouter;
use anyhow::{Context, Result};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Single-port accept loop. No TLS termination and no per-entrypoint
/// routing rules — every downstream SDK talks to one plain-HTTP port and
/// is routed purely by credential, matching the teacher's
/// `serve_connection_with_upgrades` accept loop minus the multi-entrypoint
/// and TLS-acceptor machinery it uses for its reverse-proxy role.
pub struct Listener {
    port: u16,
    router: Arc<HttpRouter>,
}

impl Listener {
    pub fn new(port: u16, router: Arc<HttpRouter>) -> Self {
        Self { port, router }
    }

    pub async fn serve(&self) -> Result<()> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind to {}", addr))?;

        info!("relay listening on {}", addr);

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                    continue;
                }
            };

            let router = Arc::clone(&self.router);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let router = Arc::clone(&router);
                    async move { Ok::<_, hyper::Error>(router.handle(req).await) }
                });

                let builder = AutoBuilder::new(TokioExecutor::new());
                if let Err(e) = builder.serve_connection_with_upgrades(io, service).await {
                    debug!("connection error from {}: {}", remote_addr, e);
                }
            });
        }
    }
}
