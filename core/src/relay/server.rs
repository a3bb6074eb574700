//! Relay Server — accepts websocket clients and fans their frames out

use super::distributor::{Distributor, RelayStats, CLIENT_CHANNEL_CAPACITY};
use super::protocol::DEFAULT_LISTEN_ADDR;
use super::session::serve_connection;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite;
use tracing::{debug, error, info};

/// Relay server configuration
#[derive(Debug, Clone)]
pub struct RelayServerConfig {
    /// Address to listen on, e.g. `0.0.0.0:6679`
    pub listen_addr: String,
    /// Outbound frames buffered per client before deliveries are dropped
    pub client_channel_capacity: usize,
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            client_channel_capacity: CLIENT_CHANNEL_CAPACITY,
        }
    }
}

/// Relay server error types
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Websocket handshake with {0} failed: {1}")]
    Handshake(SocketAddr, #[source] tungstenite::Error),
}

/// The relay server
pub struct RelayServer {
    listener: TcpListener,
    distributor: Arc<Distributor>,
}

impl RelayServer {
    /// Bind the listening socket. The server does not accept until [`run`].
    ///
    /// [`run`]: RelayServer::run
    pub async fn bind(config: &RelayServerConfig) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?;

        Ok(Self {
            listener,
            distributor: Arc::new(Distributor::with_capacity(config.client_channel_capacity)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared handle to the client registry.
    pub fn distributor(&self) -> Arc<Distributor> {
        Arc::clone(&self.distributor)
    }

    pub fn stats(&self) -> RelayStats {
        self.distributor.stats()
    }

    /// Accept connections forever, one session task per client.
    pub async fn run(self) -> Result<(), RelayError> {
        info!("relay listening on {}", self.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("new connection from {}", addr);
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("failed to set TCP_NODELAY for {}: {}", addr, e);
                    }

                    let distributor = Arc::clone(&self.distributor);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, addr, distributor).await {
                            error!("failed to upgrade connection: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("error accepting connection: {}", e);
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn local_config() -> RelayServerConfig {
        RelayServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = RelayServerConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:6679");
        assert_eq!(config.client_channel_capacity, 800);
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = RelayServer::bind(&local_config()).await.unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.stats(), RelayStats::default());
    }

    #[tokio::test]
    async fn test_bind_conflict_reports_address() {
        let first = RelayServer::bind(&local_config()).await.unwrap();
        let taken = first.local_addr().unwrap().to_string();

        let config = RelayServerConfig {
            listen_addr: taken.clone(),
            ..Default::default()
        };
        match RelayServer::bind(&config).await {
            Err(RelayError::Bind { addr, .. }) => assert_eq!(addr, taken),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("second bind on {} should fail", taken),
        }
    }

    #[tokio::test]
    async fn test_non_websocket_client_does_not_register() {
        let server = RelayServer::bind(&local_config()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let distributor = server.distributor();
        tokio::spawn(server.run());

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        drop(stream);

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(distributor.client_count(), 0);
    }
}
