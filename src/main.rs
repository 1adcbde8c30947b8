use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use discover_engine::{
    api::{create_router, AppState},
    config::Config,
    db::cache::{create_redis_client, RedisCache},
    db::sqlite::AggregateStore,
    pipeline::{backfill, Orchestrator},
    store::{DocumentStore, HttpStore, MemoryStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "discover_engine=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        tick_seconds = config.tick_seconds,
        "Starting discover engine"
    );

    let redis_client = create_redis_client(&config.redis_url)?;
    let (cache, cache_writer) = RedisCache::new(redis_client).await;

    let aggregates = AggregateStore::connect(&config.database_url).await?;

    let store: Arc<dyn DocumentStore> = match &config.document_store_url {
        Some(url) => Arc::new(HttpStore::new(url.clone())),
        None => {
            tracing::warn!(
                "DOCUMENT_STORE_URL is unset, falling back to the empty in-memory store"
            );
            Arc::new(MemoryStore::new())
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(
        store,
        Arc::new(cache),
        aggregates,
        config.clone(),
    ));

    if !orchestrator.load_persisted_model().await {
        tracing::warn!("No persisted model found, scoring is unavailable until first training");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(Arc::clone(&orchestrator).scheduler_loop(shutdown_rx.clone()));
    tokio::spawn(backfill::backfill_loop(
        Arc::clone(&orchestrator),
        shutdown_rx.clone(),
    ));

    let state = AppState::new(orchestrator, shutdown_tx);
    let app = create_router(state);

    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.host, config.port)).await?;
    tracing::info!(address = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
        .await?;

    cache_writer.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Resolves when either the in-process shutdown flag flips (the /shutdown
/// endpoint) or the process receives ctrl-c.
async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    let flag = async {
        while shutdown_rx.changed().await.is_ok() {
            if *shutdown_rx.borrow() {
                return;
            }
        }
    };

    tokio::select! {
        _ = flag => tracing::info!("Shutdown flag observed"),
        _ = tokio::signal::ctrl_c() => tracing::info!("Ctrl-c received"),
    }
}
