//! STOMP server listener
//!
//! Handles the TCP accept loop and hands every socket to the registry.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::broker::Broker;
use crate::error::Result;
use crate::server::config::BrokerConfig;
use crate::server::registry::ConnectionRegistry;

/// STOMP server
pub struct StompServer {
    config: BrokerConfig,
    registry: Arc<ConnectionRegistry>,
    broker: Arc<Broker>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl StompServer {
    /// Create a server with routing installed on a fresh registry
    pub fn new(config: BrokerConfig) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let registry = Arc::new(ConnectionRegistry::new(config.clone()));
        let broker = Arc::new(Broker::new());
        broker.install(&registry);

        Self {
            config,
            registry,
            broker,
            connection_semaphore,
        }
    }

    /// Get a reference to the connection registry
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get a reference to the subscription store
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Run the server
    ///
    /// This method blocks until the listener fails to bind.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "STOMP server listening");

        self.accept_loop(&listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "STOMP server listening");

        self.serve_until(listener, shutdown).await
    }

    /// Accept on an already bound listener until `shutdown` resolves
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        for conn in self.registry.connections() {
            conn.request_close();
        }

        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            // Held until the session ends
            let _permit = permit;
            if let Err(e) = registry.serve(socket, Some(peer_addr)).await {
                tracing::debug!(peer = %peer_addr, error = %e, "Session ended with error");
            }
        });
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn test_accepts_and_handshakes() {
        let server = Arc::new(StompServer::new(BrokerConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let srv = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            srv.serve_until(listener, async {
                let _ = stop_rx.await;
            })
            .await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"CONNECT\n\n\0").await.unwrap();

        let mut buf = vec![0u8; 256];
        let mut received = Vec::new();
        while !received.contains(&0) {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0);
            received.extend_from_slice(&buf[..n]);
        }
        assert!(received.starts_with(b"CONNECTED\n"));

        let _ = stop_tx.send(());
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let config = BrokerConfig::default().max_connections(1);
        let server = Arc::new(StompServer::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let srv = Arc::clone(&server);
        tokio::spawn(async move { srv.serve_until(listener, std::future::pending()).await });

        let _first = TcpStream::connect(addr).await.unwrap();
        // Let the first session register before the second arrives
        while server.registry().connection_count() == 0 {
            tokio::task::yield_now().await;
        }

        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 16];
        // Rejected sockets are dropped straight away
        let n = second.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
        assert_eq!(server.registry().connection_count(), 1);
    }
}
