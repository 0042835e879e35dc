//! Typerace Server
//!
//! Serves the login flow over HTTP and head-to-head races over WebSocket.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use typerace::{
    http::{build_router, cors_layer, AppState},
    network::{MatchCoordinator, RaceServer, ServerConfig},
    session::{spawn_sweeper, Accounts, AuthConfig, AuthGuard, TokenStore},
    store::{Argon2Credentials, MemoryCorpus, MemoryLedger, TextCorpus},
    VERSION,
};

/// Practice lines used when no corpus file is given.
const DEFAULT_TEXTS: &[&str] = &[
    "The quick brown fox jumps over the lazy dog.",
    "Pack my box with five dozen liquor jugs.",
    "How vexingly quick daft zebras jump.",
    "Sphinx of black quartz, judge my vow.",
    "Typing fast is mostly about typing accurately.",
];

/// CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "typerace-server")]
#[command(about = "Head-to-head typing race server")]
#[command(version)]
struct Args {
    /// Socket address for race WebSocket connections.
    #[arg(long, default_value = "0.0.0.0:5001", env = "TYPERACE_WS_ADDR")]
    ws_addr: SocketAddr,
    /// Socket address for the HTTP login flow.
    #[arg(long, default_value = "0.0.0.0:5000", env = "TYPERACE_HTTP_ADDR")]
    http_addr: SocketAddr,
    /// Corpus file, one practice line per non-empty line.
    #[arg(long, env = "TYPERACE_TEXTS")]
    texts: Option<PathBuf>,
    /// Token lifetime in seconds.
    #[arg(long, env = "TYPERACE_TOKEN_TTL")]
    token_ttl: Option<u64>,
    /// Seconds between expired-token sweeps.
    #[arg(long, env = "TYPERACE_SWEEP_INTERVAL")]
    sweep_interval: Option<u64>,
    /// Maximum concurrent WebSocket connections.
    #[arg(long, default_value = "1000", env = "TYPERACE_MAX_CONNECTIONS")]
    max_connections: usize,
    /// Usernames allowed to manage practice text lines.
    #[arg(long = "admin", env = "TYPERACE_ADMINS", value_delimiter = ',')]
    admins: Vec<String>,
    /// Browser origins allowed to call the HTTP API.
    #[arg(
        long = "cors-origin",
        default_value = "http://localhost:8080",
        env = "TYPERACE_CORS_ORIGINS",
        value_delimiter = ','
    )]
    cors_origins: Vec<String>,
}

fn load_corpus(path: Option<&PathBuf>) -> anyhow::Result<MemoryCorpus> {
    let corpus = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading corpus {}", path.display()))?;
            MemoryCorpus::from_text(&text)
        }
        None => MemoryCorpus::new(DEFAULT_TEXTS.iter().copied()),
    };
    ensure!(!corpus.is_empty(), "corpus has no practice lines");
    Ok(corpus)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let args = Args::parse();
    info!("Typerace Server v{}", VERSION);

    let mut auth = AuthConfig::from_env();
    if let Some(ttl) = args.token_ttl {
        auth.token_ttl = Duration::from_secs(ttl);
    }
    if let Some(every) = args.sweep_interval {
        auth.sweep_interval = Duration::from_secs(every);
    }
    auth
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid auth config: {e}"))?;

    let server_config = ServerConfig {
        bind_addr: args.ws_addr,
        max_connections: args.max_connections,
        ..ServerConfig::default()
    };
    server_config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid server config: {e}"))?;

    let corpus = Arc::new(load_corpus(args.texts.as_ref())?);
    info!("Loaded {} practice lines", corpus.len());

    let ledger = Arc::new(MemoryLedger::new());
    let tokens = Arc::new(TokenStore::new(&auth));
    let guard = Arc::new(AuthGuard::new(tokens.clone(), &auth));
    let accounts = Arc::new(Accounts::new(
        ledger.clone(),
        Arc::new(Argon2Credentials),
        guard.clone(),
    ));
    let coordinator = Arc::new(MatchCoordinator::new(corpus.clone(), ledger));

    let sweeper = spawn_sweeper(tokens, auth.sweep_interval);

    let cors = cors_layer(&args.cors_origins).context("invalid CORS origin")?;
    let admins: BTreeSet<String> = args.admins.iter().cloned().collect();
    info!("Admins: {:?}", admins);
    let router = build_router(AppState {
        accounts,
        corpus,
        coordinator: coordinator.clone(),
        admins: Arc::new(admins),
    })
    .layer(cors);
    let http_listener = tokio::net::TcpListener::bind(args.http_addr)
        .await
        .with_context(|| format!("binding HTTP on {}", args.http_addr))?;
    info!("HTTP listening on http://{}", args.http_addr);
    let http = tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, router).await {
            error!("HTTP server error: {}", e);
        }
    });

    let server = RaceServer::new(server_config, guard, coordinator);
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            server.shutdown();
        }
    }

    sweeper.abort();
    http.abort();
    Ok(())
}
