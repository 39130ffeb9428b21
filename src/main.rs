use duckdb::Connection;
use parking_lot::Mutex;
use sitepulse::config::Config;
use sitepulse::ingest::handler::AppState;
use sitepulse::server;
use sitepulse::storage::migrations;
use sitepulse::storage::store::DuckDbEventStore;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sitepulse=info,tower_http=info".into()),
        )
        .init();

    // Load configuration
    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref().map(std::path::Path::new));

    tracing::info!(
        host = %config.host,
        port = config.port,
        database = ?config.database_path,
        "Starting SitePulse"
    );

    // Initialize DuckDB
    let conn = match &config.database_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).expect("Failed to create database directory");
            }
            Connection::open(path).expect("Failed to open DuckDB")
        }
        None => {
            tracing::warn!("No database_path set, events are kept in memory only");
            Connection::open_in_memory().expect("Failed to open DuckDB")
        }
    };
    migrations::run_migrations(&conn).expect("Failed to run migrations");

    let store = DuckDbEventStore::new(Arc::new(Mutex::new(conn)));

    let secret = config.secret.clone().unwrap_or_else(|| {
        tracing::warn!("No SITEPULSE_SECRET set, using a random secret. Derived visitor IDs will change across restarts.");
        uuid::Uuid::new_v4().to_string()
    });

    let mut state = AppState::new(store, config.flush_event_count, secret);
    state.dashboard_origin = config.dashboard_origin.clone();
    state.default_limit = config.default_limit;
    let state = Arc::new(state);

    // Set up periodic flush
    let flush_state = Arc::clone(&state);
    let flush_interval = config.flush_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(flush_interval));
        loop {
            interval.tick().await;
            let state = Arc::clone(&flush_state);
            match tokio::task::spawn_blocking(move || state.buffer.flush()).await {
                Ok(Ok(count)) if count > 0 => {
                    tracing::info!(count, "Periodic flush completed");
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Periodic flush failed"),
                Err(e) => tracing::error!(error = %e, "Periodic flush task panicked"),
            }
        }
    });

    let app = server::build_router(Arc::clone(&state));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!(addr = %addr, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // Final flush so buffered events survive the shutdown
    let timeout = Duration::from_secs(config.shutdown_timeout_secs);
    let final_state = Arc::clone(&state);
    let flush = tokio::task::spawn_blocking(move || final_state.buffer.flush());
    match tokio::time::timeout(timeout, flush).await {
        Ok(Ok(Ok(count))) => tracing::info!(count, "Final flush completed"),
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "Final flush failed"),
        Ok(Err(e)) => tracing::error!(error = %e, "Final flush task panicked"),
        Err(_) => tracing::error!(
            timeout_secs = config.shutdown_timeout_secs,
            buffered = state.buffer.len(),
            "Final flush timed out"
        ),
    }

    tracing::info!("Server shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
