//! HTTP server initialization and runtime setup.
//!
//! Handles database migrations, cache backend setup, the invalidation bus and its
//! background consumer, and the Axum server lifecycle.

use crate::config::Config;
use crate::infrastructure::bus::{InvalidationBus, spawn_consumer};
use crate::infrastructure::cache::{CacheBackend, CacheStore, NullBackend, RedisBackend};
use crate::routes::app_router;
use crate::state::AppState;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Runs the HTTP server with the given configuration.
///
/// Initializes:
/// - PostgreSQL connection pool
/// - Apply migrations
/// - Redis cache backend (or NullBackend fallback)
/// - Invalidation bus with bounded connect retry
/// - Background invalidation consumer
/// - Axum HTTP server
///
/// The server only exposes health checks. The cache services are library types
/// that API processes construct over their own pool, so the pool here is closed
/// once migrations have run.
///
/// # Errors
///
/// Returns an error if:
/// - Database connection or migration fails
/// - The broker is still unreachable after the retry budget
/// - Server bind fails
/// - Server runtime error occurs
pub async fn run(config: Config) -> Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_connect_timeout))
        .idle_timeout(Duration::from_secs(config.db_idle_timeout))
        .max_lifetime(Duration::from_secs(config.db_max_lifetime))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Connected to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to migrate")?;
    pool.close().await;

    let backend = connect_backend(&config).await;
    let store = Arc::new(CacheStore::new(
        backend,
        config.cache_ttl_seconds,
        config.cache_scan_batch,
    ));

    let broker_url = config
        .broker_url
        .as_deref()
        .context("BROKER_URL must be set")?;
    let bus = InvalidationBus::connect_redis(
        broker_url,
        &config.bus_exchange,
        &config.retry_policy(),
    )
    .await
    .context("Invalidation bus unavailable")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = spawn_consumer(
        bus.transport(),
        store.clone(),
        config.consumer_settings(),
        shutdown_rx,
    );

    let state = AppState::new(store, bus);
    let app = app_router(state);

    let addr: SocketAddr = config.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The receiver may already be gone if the consumer task panicked.
    let _ = shutdown_tx.send(true);
    if let Err(e) = consumer.await {
        tracing::error!("Invalidation consumer task failed: {}", e);
    }
    tracing::info!("Server stopped");

    Ok(())
}

/// Connects the shared cache backend.
///
/// An unreachable or unconfigured cache is not fatal: the service runs with a
/// [`NullBackend`] and every read goes to the authoritative store.
pub async fn connect_backend(config: &Config) -> Arc<dyn CacheBackend> {
    let Some(redis_url) = &config.redis_url else {
        tracing::info!("Cache disabled (NullBackend)");
        return Arc::new(NullBackend::new());
    };

    match RedisBackend::connect(redis_url, config.cache_op_timeout()).await {
        Ok(redis) => {
            tracing::info!("Cache enabled (Redis)");
            Arc::new(redis)
        }
        Err(e) => {
            tracing::warn!("Failed to connect to Redis: {}. Using NullBackend.", e);
            Arc::new(NullBackend::new())
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
