//! WebSocket Race Server
//!
//! Accepts WebSocket upgrades on the challenge path, authorizes the
//! `auth_token` query parameter and hands admitted sockets to the channel
//! driver.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::network::channel::{drive, Channel, ChannelEvent};
use crate::network::coordinator::MatchCoordinator;
use crate::session::token::fingerprint;
use crate::session::AuthGuard;

/// Query parameter carrying the session token.
pub const TOKEN_PARAM: &str = "auth_token";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound queue depth per channel.
    pub outbound_buffer: usize,
    /// Upgrade path.
    pub path: String,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5001)),
            max_connections: 1000,
            outbound_buffer: 64,
            path: "/ws/challenge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Check limits are usable.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }
        if self.outbound_buffer == 0 {
            return Err("outbound_buffer must be greater than 0".to_string());
        }
        if !self.path.starts_with('/') {
            return Err(format!("path must start with '/': {}", self.path));
        }
        Ok(())
    }
}

/// Race server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Configuration rejected by [`ServerConfig::validate`].
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

/// Extract the session token from a raw query string.
pub fn token_from_query(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == TOKEN_PARAM)
        .map(|(_, value)| value.to_string())
}

/// The race server.
pub struct RaceServer {
    config: ServerConfig,
    guard: Arc<AuthGuard>,
    coordinator: Arc<MatchCoordinator>,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RaceServer {
    /// Create a new race server.
    pub fn new(
        config: ServerConfig,
        guard: Arc<AuthGuard>,
        coordinator: Arc<MatchCoordinator>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            guard,
            coordinator,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.run_with_listener(listener).await
    }

    /// Serve on an already bound listener until [`RaceServer::shutdown`].
    #[instrument(skip_all)]
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.config.validate().map_err(ServerError::InvalidConfig)?;
        let addr = listener.local_addr()?;
        info!(
            "Race server v{} listening on ws://{}{}",
            self.config.version, addr, self.config.path
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            if self.connections.load(Ordering::SeqCst) >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", peer);
                                continue;
                            }
                            debug!("New connection from {}", peer);
                            self.handle_connection(stream, peer);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Signal the accept loop and every open connection to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Currently open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let guard = self.guard.clone();
        let coordinator = self.coordinator.clone();
        let connections = self.connections.clone();
        let path = self.config.path.clone();
        let buffer = self.config.outbound_buffer;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        connections.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let mut token = None;
            let callback = |request: &Request, response: Response| {
                if request.uri().path() != path {
                    let mut reject = ErrorResponse::new(Some("not found".to_string()));
                    *reject.status_mut() = StatusCode::NOT_FOUND;
                    return Err(reject);
                }
                token = token_from_query(request.uri().query());
                Ok(response)
            };

            let mut ws_stream = match accept_hdr_async(stream, callback).await {
                Ok(ws) => ws,
                Err(e) => {
                    debug!("WebSocket handshake failed for {}: {}", peer, e);
                    connections.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
            };

            let token = token.unwrap_or_default();
            let username = match guard.authorize(&token).await {
                Ok(username) => username,
                Err(e) => {
                    warn!(%peer, token = %fingerprint(&token), error = %e, "rejected channel");
                    let frame = CloseFrame {
                        code: CloseCode::from(e.close_code()),
                        reason: e.reason().into(),
                    };
                    let _ = ws_stream.close(Some(frame)).await;
                    connections.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
            };
            info!(%peer, user = %username, "channel admitted");

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (channel, mut outbound) = Channel::pair(username.clone(), buffer);
            let (event_tx, event_rx) = mpsc::channel::<ChannelEvent>(buffer);

            let writer = tokio::spawn(async move {
                while let Some(msg) = outbound.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let reader = async move {
                loop {
                    tokio::select! {
                        msg = ws_receiver.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if event_tx.send(ChannelEvent::Frame(text)).await.is_err() {
                                        break;
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    debug!("Client {} disconnected", peer);
                                    break;
                                }
                                Some(Err(e)) => {
                                    debug!("WebSocket error for {}: {}", peer, e);
                                    break;
                                }
                                // Control and binary frames carry nothing for the race
                                Some(Ok(_)) => {}
                            }
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
                let _ = event_tx.send(ChannelEvent::Closed).await;
            };

            tokio::join!(reader, drive(coordinator, channel, event_rx));

            writer.abort();
            connections.fetch_sub(1, Ordering::SeqCst);
            info!(%peer, user = %username, "channel closed");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_query() {
        assert_eq!(
            token_from_query(Some("auth_token=abc.def.ghi")),
            Some("abc.def.ghi".to_string())
        );
        assert_eq!(
            token_from_query(Some("foo=1&auth_token=xyz&bar=2")),
            Some("xyz".to_string())
        );
        assert_eq!(token_from_query(Some("auth_token=")), Some(String::new()));
        assert_eq!(token_from_query(Some("token=xyz")), None);
        assert_eq!(token_from_query(Some("auth_token")), None);
        assert_eq!(token_from_query(None), None);
    }

    #[test]
    fn test_default_config_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr.port(), 5001);
        assert_eq!(config.path, "/ws/challenge");
    }

    #[test]
    fn test_config_rejects_zero_limits() {
        let config = ServerConfig {
            max_connections: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            outbound_buffer: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            path: "ws".to_string(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
