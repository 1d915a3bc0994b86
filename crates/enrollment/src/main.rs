//! Enrollment audit server - read-only HTTP view of the attempt ledger.

use account_ledger::Ledger;
use enrollment::{
    api::{create_router, AppState},
    config::Config,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting enrollment audit server");

    let ledger = if config.ledger.persist {
        match Ledger::open(config.ledger.path.clone()).await {
            Ok(l) => {
                info!(
                    path = %config.ledger.path.display(),
                    entries = l.count().await,
                    "Ledger opened"
                );
                l
            }
            Err(e) => {
                error!("Failed to open ledger at {}: {}", config.ledger.path.display(), e);
                std::process::exit(1);
            }
        }
    } else {
        info!("Persistence disabled, using in-memory ledger");
        Ledger::memory()
    };

    let state = AppState::new(ledger, config.ledger.export_dir.clone());
    let app = create_router(state);

    let addr = SocketAddr::new(
        config
            .server
            .listen_addr
            .parse()
            .unwrap_or([127, 0, 0, 1].into()),
        config.server.port,
    );

    info!("Listening on {}", addr);

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
