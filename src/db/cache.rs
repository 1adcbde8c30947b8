use std::collections::HashMap;
use std::fmt::Display;

use redis::AsyncCommands;
use redis::Client;
use tokio::sync::{mpsc, RwLock};

use crate::error::{PipelineError, PipelineResult};

/// Keys for memoized pipeline values
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// The latest fetched raw interaction batch
    FetchBatch,
    /// Version marker of the most recently trained model
    ModelVersion,
    /// User ids already seen by the new-user backfill sweep
    KnownUsers,
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::FetchBatch => write!(f, "fetch:batch"),
            CacheKey::ModelVersion => write!(f, "model:version"),
            CacheKey::KnownUsers => write!(f, "users:known"),
        }
    }
}

/// Memoization seam used by the orchestrator and backfill sweep.
///
/// The Redis implementation backs production; the in-memory one keeps tests
/// free of a running Redis server.
#[async_trait::async_trait]
pub trait Memoizer: Send + Sync {
    async fn get_value(&self, key: &CacheKey) -> PipelineResult<Option<serde_json::Value>>;

    async fn set_value(
        &self,
        key: &CacheKey,
        value: serde_json::Value,
        ttl: u64,
    ) -> PipelineResult<()>;
}

/// Typed read through the memoizer seam
pub async fn get_as<T: serde::de::DeserializeOwned>(
    cache: &dyn Memoizer,
    key: &CacheKey,
) -> PipelineResult<Option<T>> {
    match cache.get_value(key).await? {
        Some(value) => {
            let data = serde_json::from_value(value)
                .map_err(|e| PipelineError::Internal(format!("Cache deserialization error: {}", e)))?;
            Ok(Some(data))
        }
        None => Ok(None),
    }
}

/// Typed write through the memoizer seam
pub async fn set_as<T: serde::Serialize>(
    cache: &dyn Memoizer,
    key: &CacheKey,
    value: &T,
    ttl: u64,
) -> PipelineResult<()> {
    let json = serde_json::to_value(value)
        .map_err(|e| PipelineError::Internal(format!("Cache serialization error: {}", e)))?;
    cache.set_value(key, json, ttl).await
}

/// Creates a Redis client for memoization
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Message for asynchronous cache writes
struct CacheWriteMessage {
    key: String,
    value: String,
    ttl: u64,
}

/// Redis-backed memoizer
///
/// Writes go through a background task so pipeline stages never wait on a
/// cache write; reads use a multiplexed connection directly.
#[derive(Clone)]
pub struct RedisCache {
    redis_client: Client,
    write_tx: mpsc::UnboundedSender<CacheWriteMessage>,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl CacheWriterHandle {
    /// Sends a shutdown signal to the writer task and lets it flush
    /// pending writes to Redis.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
    }
}

impl RedisCache {
    /// Creates a new cache with its async write background task
    pub async fn new(redis_client: Client) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let client = redis_client.clone();
        tokio::spawn(async move {
            Self::cache_writer_task(client, write_rx, shutdown_rx).await;
        });

        let cache = Self {
            redis_client,
            write_tx,
        };

        let handle = CacheWriterHandle { shutdown_tx };

        (cache, handle)
    }

    /// Background task that processes cache write messages, flushing any
    /// remaining ones when the shutdown signal arrives.
    async fn cache_writer_task(
        client: Client,
        mut write_rx: mpsc::UnboundedReceiver<CacheWriteMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");

        loop {
            tokio::select! {
                Some(msg) = write_rx.recv() => {
                    if let Err(e) = Self::write_to_redis(&client, msg).await {
                        tracing::error!(error = %e, "Failed to write to Redis cache");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Cache writer shutting down, flushing remaining writes");

                    while let Ok(msg) = write_rx.try_recv() {
                        if let Err(e) = Self::write_to_redis(&client, msg).await {
                            tracing::error!(error = %e, "Failed to flush cache write during shutdown");
                        }
                    }

                    tracing::info!("Cache writer task stopped");
                    break;
                }
            }
        }
    }

    async fn write_to_redis(client: &Client, msg: CacheWriteMessage) -> PipelineResult<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(msg.key, msg.value, msg.ttl).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Memoizer for RedisCache {
    async fn get_value(&self, key: &CacheKey) -> PipelineResult<Option<serde_json::Value>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(format!("{}", key)).await?;

        match cached {
            Some(json) => {
                let value = serde_json::from_str(&json).map_err(|e| {
                    PipelineError::Internal(format!("Cache deserialization error: {}", e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set_value(
        &self,
        key: &CacheKey,
        value: serde_json::Value,
        ttl: u64,
    ) -> PipelineResult<()> {
        let json = serde_json::to_string(&value)
            .map_err(|e| PipelineError::Internal(format!("Cache serialization error: {}", e)))?;

        let msg = CacheWriteMessage {
            key: format!("{}", key),
            value: json,
            ttl,
        };

        self.write_tx
            .send(msg)
            .map_err(|e| PipelineError::Internal(format!("Cache writer unavailable: {}", e)))?;

        Ok(())
    }
}

/// In-memory memoizer used by tests; TTLs are accepted and ignored.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Memoizer for MemoryCache {
    async fn get_value(&self, key: &CacheKey) -> PipelineResult<Option<serde_json::Value>> {
        Ok(self.entries.read().await.get(&format!("{}", key)).cloned())
    }

    async fn set_value(
        &self,
        key: &CacheKey,
        value: serde_json::Value,
        _ttl: u64,
    ) -> PipelineResult<()> {
        self.entries
            .write()
            .await
            .insert(format!("{}", key), value);
        Ok(())
    }
}
