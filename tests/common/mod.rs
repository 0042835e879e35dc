use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use typerace::network::{MatchCoordinator, RaceServer, ServerConfig};
use typerace::session::{AuthConfig, AuthGuard, TokenStore};
use typerace::store::{MemoryCorpus, MemoryLedger, UserLedger};

pub const RACE_TEXT: &str = "the quick brown fox jumps over the lazy dog";

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub addr: SocketAddr,
    pub tokens: Arc<TokenStore>,
    pub ledger: Arc<MemoryLedger>,
    pub coordinator: Arc<MatchCoordinator>,
    pub server: Arc<RaceServer>,
}

impl TestServer {
    pub async fn start(users: &[&str]) -> Self {
        Self::start_with(AuthConfig::with_secret(b"e2e-secret"), users).await
    }

    pub async fn start_with(auth: AuthConfig, users: &[&str]) -> Self {
        Self::start_split(auth.clone(), auth, users).await
    }

    /// Tokens are signed with `issuer`'s secret but verified with `verifier`'s.
    pub async fn start_split(issuer: AuthConfig, verifier: AuthConfig, users: &[&str]) -> Self {
        let ledger = Arc::new(MemoryLedger::new());
        for user in users {
            ledger.create_user(user, "unused").unwrap();
        }
        let tokens = Arc::new(TokenStore::new(&issuer));
        let guard = Arc::new(AuthGuard::new(tokens.clone(), &verifier));
        let coordinator = Arc::new(MatchCoordinator::new(
            Arc::new(MemoryCorpus::new([RACE_TEXT])),
            ledger.clone(),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(RaceServer::new(
            ServerConfig {
                bind_addr: addr,
                ..ServerConfig::default()
            },
            guard,
            coordinator.clone(),
        ));
        let running = server.clone();
        tokio::spawn(async move { running.run_with_listener(listener).await });

        Self {
            addr,
            tokens,
            ledger,
            coordinator,
            server,
        }
    }

    pub async fn login(&self, user: &str) -> String {
        self.tokens.issue(user).await.unwrap().token
    }

    pub fn url(&self, query: &str) -> String {
        format!("ws://{}/ws/challenge{}", self.addr, query)
    }

    pub async fn connect(&self, token: &str) -> TestClient {
        TestClient::connect(&self.url(&format!("?auth_token={token}"))).await
    }

    /// Poll until `check` holds or the timeout elapses.
    pub async fn wait_for<F, Fut>(&self, mut check: F)
    where
        F: FnMut(Arc<MatchCoordinator>) -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        while !check(self.coordinator.clone()).await {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached in time"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub struct TestClient {
    pub ws_tx: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        Message,
    >,
    pub ws_rx: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    >,
}

impl TestClient {
    pub async fn connect(url: &str) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let (ws_tx, ws_rx) = ws.split();
        Self { ws_tx, ws_rx }
    }

    pub async fn send_json(&mut self, value: Value) {
        self.ws_tx
            .send(Message::Text(value.to_string()))
            .await
            .unwrap();
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws_tx
            .send(Message::Text(text.to_string()))
            .await
            .unwrap();
    }

    /// Next text frame as JSON.
    pub async fn recv_json(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(RECV_TIMEOUT, self.ws_rx.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("websocket error");
            match msg {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Close(frame) => panic!("unexpected close: {frame:?}"),
                _ => continue,
            }
        }
    }

    /// True if no text frame arrives within `wait`.
    pub async fn stays_quiet(&mut self, wait: Duration) -> bool {
        match tokio::time::timeout(wait, self.ws_rx.next()).await {
            Err(_) => true,
            Ok(Some(Ok(Message::Text(text)))) => {
                eprintln!("unexpected frame: {text}");
                false
            }
            Ok(_) => true,
        }
    }

    /// Wait for the server's close frame.
    pub async fn recv_close(&mut self) -> Option<CloseFrame<'static>> {
        loop {
            let next = tokio::time::timeout(RECV_TIMEOUT, self.ws_rx.next())
                .await
                .expect("timed out waiting for close");
            match next {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws_tx.close().await;
    }
}
