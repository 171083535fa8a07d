//! Hub entry point.
//!
//! Startup order matters: logging, configuration, process lock (abort if
//! another hub owns this host), database, shared state, background tasks,
//! then the two listeners. Mid-flight errors never kill the process; only
//! startup failures do.

use std::net::SocketAddr;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use concord_store::Database;

use concord_server::api;
use concord_server::config::ServerConfig;
use concord_server::hub;
use concord_server::liveness;
use concord_server::lock::ProcessLock;
use concord_server::state::AppState;

/// Concord multi-agent coordination hub.
#[derive(Debug, Parser)]
#[command(name = "concord-hub", version, about)]
struct Cli {
    /// Address to bind both listeners to.
    #[arg(long)]
    host: Option<std::net::IpAddr>,

    /// Port for the agent stream (WebSocket) listener.
    #[arg(long)]
    port: Option<u16>,

    /// Port for the Request API listener (defaults to stream port + 1).
    #[arg(long)]
    api_port: Option<u16>,

    /// Data directory for the database and lock file.
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,concord_server=debug")),
        )
        .init();

    info!("Starting Concord hub v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration (env, then CLI overrides)
    // -----------------------------------------------------------------------
    let cli = Cli::parse();
    let mut config = ServerConfig::from_env();
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
        config.api_port = port + 1;
    }
    if let Some(api_port) = cli.api_port {
        config.api_port = api_port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = Some(data_dir);
    }
    info!(
        stream_addr = %config.stream_addr(),
        api_addr = %config.api_addr(),
        signing_key_from_env = config.signing_key_from_env,
        "Loaded configuration"
    );
    if !config.signing_key_from_env {
        tracing::warn!("CONCORD_TOKEN_KEY not set; using derived development key");
    }

    // -----------------------------------------------------------------------
    // 3. Process lock: exactly one hub per host
    // -----------------------------------------------------------------------
    let _lock = ProcessLock::acquire(&config.lock_path())
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    // -----------------------------------------------------------------------
    // 4. Open the database (fatal on unrecoverable state)
    // -----------------------------------------------------------------------
    let db = match (&config.db_path, &config.data_dir) {
        (Some(path), _) => Database::open_at(path)?,
        (None, Some(dir)) => {
            std::fs::create_dir_all(dir)?;
            Database::open_at(&dir.join("concord.db"))?
        }
        (None, None) => Database::new()?,
    };

    let state = AppState::new(db, config.clone());

    // -----------------------------------------------------------------------
    // 5. Spawn background tasks
    // -----------------------------------------------------------------------
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Liveness loop (challenge / sleep / evict).
    tokio::spawn(liveness::run(state.clone(), shutdown_tx.subscribe()));

    // Periodic expired-token sweep.
    {
        let sweep_state = state.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_state.config.token_sweep_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match sweep_state.auth.sweep_expired() {
                            Ok(0) => {}
                            Ok(n) => info!(removed = n, "swept expired tokens"),
                            Err(e) => tracing::error!(error = %e, "token sweep failed"),
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle
    // >10 min).
    {
        let limiter = state.rate_limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                interval.tick().await;
                limiter.purge_stale(600.0);
            }
        });
    }

    // -----------------------------------------------------------------------
    // 6. Serve both listeners until shutdown
    // -----------------------------------------------------------------------
    let stream_listener = tokio::net::TcpListener::bind(config.stream_addr()).await?;
    let api_listener = tokio::net::TcpListener::bind(config.api_addr()).await?;
    info!(
        stream_addr = %config.stream_addr(),
        api_addr = %config.api_addr(),
        "Hub listening"
    );

    let stream_app = hub::stream_router(state.clone())
        .into_make_service_with_connect_info::<SocketAddr>();
    let api_app = api::api_router(state.clone())
        .into_make_service_with_connect_info::<SocketAddr>();

    tokio::select! {
        result = axum::serve(stream_listener, stream_app) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "stream listener failed");
                return Err(e.into());
            }
        }
        result = axum::serve(api_listener, api_app) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "API listener failed");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    // -----------------------------------------------------------------------
    // 7. Flush: close out live sessions, stop background loops
    // -----------------------------------------------------------------------
    let _ = shutdown_tx.send(());
    let open_sessions = state.registry.drain();
    if !open_sessions.is_empty() {
        let db = state.db.lock();
        for (log_id, ai_id) in open_sessions {
            if log_id != 0 {
                if let Err(e) = db.record_hub_disconnect(log_id, "shutdown") {
                    tracing::error!(error = %e, ai_id = %ai_id, "failed to flush session");
                }
            }
        }
    }

    info!("Hub stopped cleanly");
    Ok(())
}
