//! LIVES Export Server - Main entry point

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use lives_common::logging::{init_logging, LogConfig};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tracing::info;

use lives_server::{
    config::Config,
    export::{export_routes, ArtifactStore, ExportCache, ExportState},
    middleware,
    source::PgDataSource,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::from_env()
        .unwrap_or_default()
        .with_file_prefix("lives-server")
        .with_filter_directives("lives_server=debug,tower_http=debug,sqlx=info");

    init_logging(&log_config)?;

    info!("Starting LIVES export server");

    // Load configuration
    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    // Initialize database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .connect(&config.database.url)
        .await?;

    info!("Database connection pool established");

    // Run migrations
    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    // Open the artifact store and wire up the export cache
    let store = Arc::new(ArtifactStore::open(&config.export.data_dir)?);
    let cache = Arc::new(ExportCache::new(
        Arc::new(PgDataSource::new(db_pool.clone())),
        store,
        Duration::from_secs(config.export.build_lease_secs),
        config.export.base_url.clone(),
    ));

    // Build the application router
    let app = create_router(ExportState { cache }, db_pool, &config);

    // Create socket address
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    // Create TCP listener
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}

/// Create the application router with all routes and middleware
fn create_router(state: ExportState, db: sqlx::PgPool, config: &Config) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(db)
        .merge(export_routes().with_state(state))
        // Apply layers from innermost to outermost
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

/// Health check handler
async fn health_check(State(db): State<sqlx::PgPool>) -> Result<Response, StatusCode> {
    match sqlx::query("SELECT 1").fetch_one(&db).await {
        Ok(_) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        },
    }
}

/// Graceful shutdown signal handler
///
/// Resolves when a shutdown signal arrives; axum then drains in-flight
/// connections before `serve` returns. A build cut off mid-flight leaves
/// only staging files, which the store sweeps at next startup.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
