//! Docgate Proxy - secure document download proxy
//!
//! Serves browser-clickable download links for documents held behind a
//! credentialed upstream API. Cooperating processes register links over an
//! authenticated internal endpoint; browsers resolve them anonymously while
//! the proxy enforces the upstream rate limit and circuit-breaks outages.
//!
//! # Features
//!
//! - Public resolution endpoint streaming documents under friendly filenames
//! - Internal registration endpoint guarded by a shared trust secret
//! - Global 5-per-10s sliding-window rate limit (upstream policy)
//! - Circuit breaker with single half-open trial
//! - Standalone (in-memory, session links) and shared (SQLite, 7-day links)
//!   deployment modes
//! - Prometheus metrics and health monitoring

use anyhow::{Context, Result};
use clap::Parser;
use docgate_core::{
    config::{CredentialVault, ProxyConfig, ProxyMode},
    issuer::{detect_topology, IssuerSelection},
    store::{LinkStore, MemoryStore, SqliteStore},
    token::SealedCodec,
    trust::{self, InternalTrust},
    upstream::{DocumentFetcher, FetcherConfig},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

mod app;

use app::AppState;

#[derive(Parser, Debug)]
#[command(name = "docgate-proxy")]
#[command(about = "Docgate - Secure document download proxy", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Periodic expiry sweep bounding storage growth
async fn sweep_loop(store: Arc<dyn LinkStore>, metrics: docgate_core::metrics::Metrics) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    loop {
        ticker.tick().await;
        match store.sweep() {
            Ok(0) => {}
            Ok(removed) => {
                metrics.record_sweep(removed);
                info!("sweep removed {} expired links", removed);
            }
            Err(e) => error!("expiry sweep failed: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = args
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .json()
        .init();

    info!("Docgate Proxy v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ProxyConfig::from_env().context("Failed to load configuration from environment")?;

    info!("Deployment mode: {:?}", config.mode);
    info!("Listen address: {}", config.listen_address);

    // Trust secret: first process generates, the rest read the same value
    let trust = InternalTrust::load_or_generate(&config.secret_path())
        .context("Failed to initialize internal trust secret")?;

    let vault = CredentialVault::from_entries(&config.credentials)
        .context("Failed to load upstream credentials")?;

    // Mode decides backend and codec: ephemeral lookup keys for a standalone
    // proxy, sealed tokens over a persistent store for the shared one
    let (store, codec): (Arc<dyn LinkStore>, Option<Arc<SealedCodec>>) = match config.mode {
        ProxyMode::Standalone => {
            // A running shared proxy would make this instance redundant for
            // cooperating processes; say so, but serve anyway
            if let IssuerSelection::UseShared(port) = detect_topology(&config).await {
                warn!(
                    port,
                    "a shared proxy is already running; cooperating processes should register there"
                );
            }
            (Arc::new(MemoryStore::new()), None)
        }
        ProxyMode::Shared => {
            let key = trust::load_or_generate_codec_key(&config.codec_key_path())
                .context("Failed to initialize sealed-token codec key")?;
            let codec = SealedCodec::new(&key).context("Invalid sealed-token codec key")?;
            let store = SqliteStore::open(&config.db_path())
                .context("Failed to open link database")?;
            info!("Link database: {:?}", config.db_path());
            (Arc::new(store), Some(Arc::new(codec)))
        }
    };

    let fetcher = DocumentFetcher::new(FetcherConfig {
        timeout: config.upstream_timeout(),
        require_https: true,
    })
    .context("Failed to build upstream client")?;

    // Create application state
    let state = AppState::new(config.clone(), store.clone(), codec, trust, vault, fetcher);

    // Start expiry sweep
    tokio::spawn(sweep_loop(store, state.metrics.clone()));

    // Build router
    let app = app::router(state);

    // Parse listen address
    let addr: std::net::SocketAddr = config
        .listen_address
        .parse()
        .context("Invalid listen address")?;

    info!("Starting server on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
