//! HTTP listener serving mock traffic and the control plane on one port.

mod control;
mod handler;
mod response;

pub use control::{is_control_path, CONTROL_PREFIX};
pub use handler::{handle_request, serve_mock, ConnectionDropped};
pub use response::{error_response, json_response, to_hyper, HyperResponse};

use crate::context::MockServerContext;
use anyhow::{Context, Result};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// How often expired expectations are dropped from the registry.
const PURGE_INTERVAL: Duration = Duration::from_secs(1);

/// A bound, not yet serving, mock server.
pub struct MockServer {
    context: Arc<MockServerContext>,
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
}

impl MockServer {
    /// Bind to the configured listen address.
    pub async fn bind(context: Arc<MockServerContext>) -> Result<Self> {
        let address = context.config.listen.address();
        Self::bind_to(context, &address).await
    }

    pub async fn bind_to(context: Arc<MockServerContext>, address: &str) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to bind {address}"))?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        info!("Mock server listening on {}", local_addr);
        Ok(Self {
            context,
            listener,
            local_addr,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> &Arc<MockServerContext> {
        &self.context
    }

    /// Sender that stops the accept loop when signalled.
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Accept connections until shutdown is signalled.
    pub async fn serve(self) {
        let MockServer {
            context,
            listener,
            local_addr,
            shutdown_tx,
        } = self;
        let mut shutdown_rx = shutdown_tx.subscribe();
        let mut purge = tokio::time::interval(PURGE_INTERVAL);
        purge.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = purge.tick() => {
                    context.registry.purge_expired();
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let context = Arc::clone(&context);
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let context = Arc::clone(&context);
                                    async move { handle_request(req, context, local_addr).await }
                                });
                                if let Err(e) = http1::Builder::new()
                                    .keep_alive(true)
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!("Connection from {} closed: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error on {}: {}", local_addr, e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Mock server on {} shutting down", local_addr);
                    break;
                }
            }
        }
    }

    /// Serve on a background task.
    pub fn spawn(self) -> ServerHandle {
        let local_addr = self.local_addr;
        let shutdown_tx = self.shutdown_sender();
        let context = Arc::clone(&self.context);
        let task = tokio::spawn(self.serve());
        ServerHandle {
            local_addr,
            shutdown_tx,
            context,
            task,
        }
    }
}

/// Handle to a server running on a background task.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    context: Arc<MockServerContext>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> &Arc<MockServerContext> {
        &self.context
    }

    /// Stop accepting, wait for the loop to exit and stop the scheduler.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            error!("Server task failed: {}", e);
        }
        self.context.shutdown();
    }
}
