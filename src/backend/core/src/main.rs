//! Follow Server - Main entry point
//!
//! Hosts account followers behind the HTTP ingress.

use std::net::SocketAddr;
use std::sync::Arc;

use follow_core::{
    api::{self, AppState},
    config::Config,
    domain::account::{account_event_types, AccountDb, AccountEvent, AccountReadModel},
    follower::FollowerDeps,
    registry::FollowerRegistry,
    storage::{
        self, EventStorage, InMemoryEventStorage, InMemorySnapshotStorage, PgEventStorage,
        PgSnapshotStorage, SnapshotStorage,
    },
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let loaded = match std::env::var("FOLLOW_CONFIG") {
        Ok(path) => Config::from_file(&path),
        Err(_) => Config::load(),
    };
    let config = loaded.unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config: {}. Using defaults.", e);
        Config::default()
    });

    telemetry::init_telemetry("follow-server", &config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Follow Server"
    );

    let types = Arc::new(account_event_types());
    let (event_storage, snapshot_storage): (
        Arc<dyn EventStorage<AccountEvent>>,
        Arc<dyn SnapshotStorage>,
    ) = match &config.database {
        Some(database) => {
            let pool = storage::connect(database).await?;
            (
                Arc::new(PgEventStorage::new(pool.clone(), Arc::clone(&types))),
                Arc::new(PgSnapshotStorage::new(pool)),
            )
        }
        None => {
            tracing::warn!("No database configured; using in-memory stores, event log built from ingress");
            (
                Arc::new(InMemoryEventStorage::new()),
                Arc::new(InMemorySnapshotStorage::new()),
            )
        }
    };

    let accounts = Arc::new(AccountReadModel::new());
    let registry = Arc::new(FollowerRegistry::new(FollowerDeps {
        types,
        event_storage,
        snapshot_storage,
        handler: Arc::new(AccountDb::new(Arc::clone(&accounts))),
        config: config.follower.clone(),
    }));
    registry.start_eviction();

    let app = api::build_router(AppState {
        registry: Arc::clone(&registry),
        accounts,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain followers so their last batches are committed
    registry.shutdown().await;
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
