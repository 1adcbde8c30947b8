use serde::Deserialize;

use crate::ml::TrainerConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Redis connection URL (batch/model memoization)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// SQLite database URL for the relational aggregate store
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Base URL of the document store REST API; unset means the in-memory store
    #[serde(default)]
    pub document_store_url: Option<String>,

    /// Directory holding the persisted user/video tower artifacts
    #[serde(default = "default_model_dir")]
    pub model_dir: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between scheduler ticks (fetch -> train -> write-back)
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,

    /// Seconds between new-user backfill sweeps
    #[serde(default = "default_backfill_seconds")]
    pub backfill_seconds: u64,

    /// Bounded worker pool size for CPU-heavy pipeline stages
    #[serde(default = "default_worker_permits")]
    pub worker_permits: usize,

    /// TTL for memoized values, in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,

    /// Recommendation list length for the write-back cycle
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Target list length when backfilling new users
    #[serde(default = "default_backfill_list_len")]
    pub backfill_list_len: usize,

    /// Embedding width of each id tower
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Factorization rank (clamped to the interaction matrix dimensions)
    #[serde(default = "default_svd_rank")]
    pub svd_rank: usize,

    /// Training epochs per retrain
    #[serde(default = "default_epochs")]
    pub epochs: usize,

    /// Retrieval-loss batch size
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Adagrad learning rate
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,

    /// Seed for every stochastic training stage
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_database_url() -> String {
    "sqlite://discover.db?mode=rwc".to_string()
}

fn default_model_dir() -> String {
    "./models".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_tick_seconds() -> u64 {
    1800
}

fn default_backfill_seconds() -> u64 {
    10
}

fn default_worker_permits() -> usize {
    5
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_top_k() -> usize {
    10
}

fn default_backfill_list_len() -> usize {
    100
}

fn default_embedding_dim() -> usize {
    64
}

fn default_svd_rank() -> usize {
    50
}

fn default_epochs() -> usize {
    3
}

fn default_batch_size() -> usize {
    4096
}

fn default_learning_rate() -> f32 {
    0.1
}

fn default_seed() -> u64 {
    42
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    /// Trainer hyperparameters as configured; the auxiliary text-path and
    /// clustering knobs keep their fixed defaults.
    pub fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            embedding_dim: self.embedding_dim,
            svd_rank: self.svd_rank,
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            seed: self.seed,
            ..TrainerConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            database_url: default_database_url(),
            document_store_url: None,
            model_dir: default_model_dir(),
            host: default_host(),
            port: default_port(),
            tick_seconds: default_tick_seconds(),
            backfill_seconds: default_backfill_seconds(),
            worker_permits: default_worker_permits(),
            cache_ttl: default_cache_ttl(),
            top_k: default_top_k(),
            backfill_list_len: default_backfill_list_len(),
            embedding_dim: default_embedding_dim(),
            svd_rank: default_svd_rank(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            seed: default_seed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trainer_config_carries_the_tuned_knobs() {
        let config = Config {
            embedding_dim: 16,
            svd_rank: 2,
            epochs: 5,
            batch_size: 64,
            learning_rate: 0.5,
            seed: 7,
            ..Config::default()
        };

        let trainer = config.trainer_config();
        assert_eq!(trainer.embedding_dim, 16);
        assert_eq!(trainer.svd_rank, 2);
        assert_eq!(trainer.epochs, 5);
        assert_eq!(trainer.batch_size, 64);
        assert_eq!(trainer.learning_rate, 0.5);
        assert_eq!(trainer.seed, 7);

        // Auxiliary knobs stay at their fixed defaults
        let defaults = TrainerConfig::default();
        assert_eq!(trainer.text_max_tokens, defaults.text_max_tokens);
        assert_eq!(trainer.engagement_clusters, defaults.engagement_clusters);
    }
}
