//! TCP accept loop for client sockets

use crate::auth::TokenValidator;
use crate::error::{Result, WsError};
use crate::registry::ConnectionRegistry;
use crate::session::run_session;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

/// WebSocket server configuration
#[derive(Debug, Clone, Copy)]
pub struct WsConfig {
    /// Frames buffered per connection before new ones are dropped
    pub outbound_capacity: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 64,
        }
    }
}

impl WsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }
}

/// Accepts sockets and runs a session for each
pub struct WsServer {
    registry: ConnectionRegistry,
    validator: Arc<dyn TokenValidator>,
    config: WsConfig,
}

impl WsServer {
    pub fn new(registry: ConnectionRegistry, validator: Arc<dyn TokenValidator>) -> Self {
        Self {
            registry,
            validator,
            config: WsConfig::default(),
        }
    }

    pub fn config(mut self, config: WsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Bind `addr` and serve until `shutdown` fires
    pub async fn run(self, addr: &str, shutdown: CancellationToken) -> Result<()> {
        let addr: SocketAddr = addr.parse().map_err(|e| {
            WsError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    ///
    /// On shutdown, stops accepting, closes every open session and waits
    /// for their tasks to finish.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        info!("WebSocket server listening on ws://{}", listener.local_addr()?);
        let tracker = TaskTracker::new();

        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Accept error: {}", e);
                        continue;
                    }
                },
            };

            let registry = self.registry.clone();
            let validator = Arc::clone(&self.validator);
            let capacity = self.config.outbound_capacity;
            let shutdown = shutdown.child_token();

            tracker.spawn(async move {
                if let Err(e) =
                    handle_connection(stream, registry, validator, capacity, shutdown).await
                {
                    error!(remote_addr = %remote_addr, "Connection error: {}", e);
                }
            });
        }

        tracker.close();
        tracker.wait().await;
        info!("WebSocket server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for WsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsServer")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn handle_connection(
    stream: TcpStream,
    registry: ConnectionRegistry,
    validator: Arc<dyn TokenValidator>,
    capacity: usize,
    shutdown: CancellationToken,
) -> Result<()> {
    let socket = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| WsError::handshake_failed(e.to_string()))?;
    run_session(socket, registry, validator, capacity, shutdown).await
}
