use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tokio::time::MissedTickBehavior;

use crate::{
    config::Config,
    db::cache::{self, CacheKey, Memoizer},
    db::sqlite::AggregateStore,
    error::{PipelineError, PipelineResult},
    features::FeatureExtractor,
    ml::{model_exists, HybridModel, HybridTrainer},
    models::{InteractionRecord, RawInteraction, EXCLUSION_TAG},
    recommend::recommend,
    store::{DocumentStore, UserDoc, VideoDoc},
};

pub mod backfill;

/// Owns the fetch -> train -> write-back pipeline and its shared state.
///
/// The corpus accumulates featurized records across fetch cycles and is only
/// drained once a write-back cycle has landed every bucket update, so a failed
/// cycle retries over the same records on the next tick. The current model is
/// swapped wholesale behind an `RwLock`; request handlers clone the `Arc` and
/// keep scoring against the old model while a retrain is in flight.
///
/// Cycles themselves never overlap: the scheduler tick and the force endpoints
/// can fire concurrently, so every cycle runs under `cycle_gate`. In
/// particular a write-back's corpus snapshot and its final drain must belong
/// to the same cycle.
pub struct Orchestrator {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) cache: Arc<dyn Memoizer>,
    pub(crate) aggregates: AggregateStore,
    pub(crate) config: Config,
    corpus: Mutex<Vec<InteractionRecord>>,
    model: RwLock<Option<Arc<HybridModel>>>,
    workers: Arc<Semaphore>,
    cycle_gate: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<dyn Memoizer>,
        aggregates: AggregateStore,
        config: Config,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_permits));
        Self {
            store,
            cache,
            aggregates,
            config,
            corpus: Mutex::new(Vec::new()),
            model: RwLock::new(None),
            workers,
            cycle_gate: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn aggregates(&self) -> &AggregateStore {
        &self.aggregates
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn current_model(&self) -> Option<Arc<HybridModel>> {
        self.model.read().await.clone()
    }

    pub async fn corpus_len(&self) -> usize {
        self.corpus.lock().await.len()
    }

    /// Restores the last persisted model, if any. Called once at startup so
    /// scoring survives a restart without waiting for the first retrain.
    pub async fn load_persisted_model(&self) -> bool {
        let dir = Path::new(&self.config.model_dir);
        if !model_exists(dir) {
            return false;
        }

        match HybridModel::load(dir) {
            Ok(model) => {
                tracing::info!(version = %model.version, "Restored persisted model");
                *self.model.write().await = Some(Arc::new(model));
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to restore persisted model");
                false
            }
        }
    }

    /// Every (user, video) pairing for this fetch, minus videos carrying the
    /// exclusion tag.
    fn build_interactions(users: &[UserDoc], videos: &[VideoDoc]) -> Vec<RawInteraction> {
        let kept: Vec<&VideoDoc> = videos
            .iter()
            .filter(|video| !video.tags.iter().any(|tag| tag == EXCLUSION_TAG))
            .collect();

        let mut raws = Vec::with_capacity(users.len() * kept.len());
        for user in users {
            for video in &kept {
                raws.push(RawInteraction {
                    user_id: user.id.clone(),
                    video_id: video.id.clone(),
                    interests: user.tags.clone(),
                    watched_views: user.watched_views.clone(),
                    tags: video.tags.clone(),
                    description: video.description.clone(),
                    views: video.views,
                    impressions: video.impressions,
                    likes: video.likes.clone(),
                    comments_count: video.comments_count,
                    comments: video.comments.clone(),
                });
            }
        }

        raws
    }

    /// Runs a CPU-heavy job on the blocking pool, bounded by the worker
    /// semaphore so concurrent cycles cannot starve the runtime.
    async fn run_blocking<T, F>(&self, job: F) -> PipelineResult<T>
    where
        F: FnOnce() -> PipelineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::Internal(format!("worker pool closed: {}", e)))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("worker task failed: {}", e)))?
    }

    /// Fetch cycle: pull both collections (or reuse the memoized batch while
    /// its TTL is live), featurize off the async runtime, and extend the
    /// corpus. Returns the number of records added.
    pub async fn fetch_cycle(&self) -> PipelineResult<usize> {
        let _cycle = self.cycle_gate.lock().await;

        let memoized =
            cache::get_as::<Vec<RawInteraction>>(self.cache.as_ref(), &CacheKey::FetchBatch)
                .await?;
        let raws = match memoized {
            Some(batch) => {
                tracing::info!(pairs = batch.len(), "Reusing memoized fetch batch");
                batch
            }
            None => {
                let users = self.store.fetch_users().await?;
                let videos = self.store.fetch_videos().await?;
                let raws = Self::build_interactions(&users, &videos);

                tracing::info!(
                    users = users.len(),
                    videos = videos.len(),
                    pairs = raws.len(),
                    "Fetched document collections"
                );

                cache::set_as(
                    self.cache.as_ref(),
                    &CacheKey::FetchBatch,
                    &raws,
                    self.config.cache_ttl,
                )
                .await?;

                raws
            }
        };

        let records = self
            .run_blocking(move || {
                let extractor = FeatureExtractor::new();
                Ok(extractor.extract_batch(raws))
            })
            .await?;

        let added = records.len();
        let mut corpus = self.corpus.lock().await;
        corpus.extend(records);
        tracing::info!(added, corpus = corpus.len(), "Fetch cycle complete");

        Ok(added)
    }

    /// Train cycle: retrain over a corpus snapshot, persist the artifacts,
    /// swap the serving model, and refresh the relational aggregates. An
    /// empty corpus skips the cycle rather than failing it, and a serving
    /// model whose version memo is still live skips the retrain until the
    /// memo expires.
    pub async fn train_cycle(&self) -> PipelineResult<()> {
        let _cycle = self.cycle_gate.lock().await;

        if let Some(memoized) =
            cache::get_as::<String>(self.cache.as_ref(), &CacheKey::ModelVersion).await?
        {
            if let Some(model) = self.current_model().await {
                if model.version == memoized {
                    tracing::info!(version = %memoized, "Model memo is live, skipping retrain");
                    return Ok(());
                }
            }
        }

        let snapshot = { self.corpus.lock().await.clone() };
        if snapshot.is_empty() {
            tracing::info!("Corpus is empty, skipping training cycle");
            return Ok(());
        }

        let model_dir = PathBuf::from(&self.config.model_dir);
        let records = snapshot.clone();
        let trainer_config = self.config.trainer_config();

        let model = self
            .run_blocking(move || {
                let trainer = HybridTrainer::new(trainer_config);
                let model = trainer.train(&snapshot)?;
                model.save(&model_dir)?;
                Ok(model)
            })
            .await?;

        let version = model.version.clone();
        *self.model.write().await = Some(Arc::new(model));

        cache::set_as(
            self.cache.as_ref(),
            &CacheKey::ModelVersion,
            &version,
            self.config.cache_ttl,
        )
        .await?;

        self.aggregates.upsert_batch(&records).await?;
        tracing::info!(version = %version, "Training cycle complete");

        Ok(())
    }

    /// Write-back cycle: recompute each corpus user's discover bucket and
    /// replace it upstream. The processed corpus slice is dropped only after
    /// every bucket write has succeeded; any failure leaves the whole corpus
    /// for the next tick.
    pub async fn write_back_cycle(&self) -> PipelineResult<usize> {
        let _cycle = self.cycle_gate.lock().await;

        let model = match self.current_model().await {
            Some(model) => model,
            None => {
                tracing::warn!("No trained model available, skipping write-back");
                return Ok(0);
            }
        };

        let (users, snapshot_len) = {
            let corpus = self.corpus.lock().await;
            let mut seen = HashSet::new();
            let mut users: Vec<(String, Vec<String>)> = Vec::new();
            for record in corpus.iter() {
                if seen.insert(record.user_id.clone()) {
                    users.push((record.user_id.clone(), record.watched_views.clone()));
                }
            }
            (users, corpus.len())
        };

        if users.is_empty() {
            tracing::info!("Corpus is empty, skipping write-back");
            return Ok(0);
        }

        let catalog = self.store.list_video_ids().await?;

        for (user_id, watched) in &users {
            let watched: HashSet<&str> = watched.iter().map(String::as_str).collect();

            let candidates: Vec<String> = catalog
                .iter()
                .filter(|id| !watched.contains(id.as_str()))
                .cloned()
                .collect();
            let recommendations =
                recommend(user_id, &model, &candidates, self.config.top_k);

            // Merge: keep what the user already has (minus anything watched
            // since), then append the fresh recommendations.
            let current = self.store.discover_bucket(user_id).await?;
            let mut merged: Vec<String> = Vec::new();
            for id in current {
                if !watched.contains(id.as_str()) && !merged.contains(&id) {
                    merged.push(id);
                }
            }
            for id in recommendations {
                if !merged.contains(&id) {
                    merged.push(id);
                }
            }

            self.store.replace_discover_bucket(user_id, merged).await?;
        }

        self.corpus.lock().await.drain(0..snapshot_len);
        tracing::info!(users = users.len(), "Write-back cycle complete");

        Ok(users.len())
    }

    /// One scheduled tick: fetch, train, write back, strictly in that order.
    /// Each stage logs its own failure; a failed stage never takes the
    /// scheduler down.
    pub async fn run_tick(&self) {
        if let Err(e) = self.fetch_cycle().await {
            tracing::error!(error = %e, "Fetch cycle failed");
        }
        if let Err(e) = self.train_cycle().await {
            tracing::error!(error = %e, "Training cycle failed");
        }
        if let Err(e) = self.write_back_cycle().await {
            tracing::error!(error = %e, "Write-back cycle failed");
        }
    }

    /// Fixed-interval scheduler. Stops when the shutdown flag flips.
    pub async fn scheduler_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.tick_seconds));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            tick_seconds = self.config.tick_seconds,
            "Pipeline scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Pipeline scheduler stopping");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::cache::MemoryCache;
    use crate::store::MemoryStore;

    fn user(id: &str, watched: &[&str]) -> UserDoc {
        UserDoc {
            id: id.to_string(),
            tags: vec!["music".to_string()],
            watched_views: watched.iter().map(|w| w.to_string()).collect(),
        }
    }

    fn video(id: &str, tags: &[&str]) -> VideoDoc {
        VideoDoc {
            id: id.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            description: "an amazing guitar solo compilation".to_string(),
            views: Some(30),
            impressions: Some(100),
            likes: vec!["u2".to_string()],
            comments_count: 0,
            comments: vec![],
        }
    }

    async fn orchestrator_with_config(
        store: Arc<dyn DocumentStore>,
        config: Config,
    ) -> Orchestrator {
        let aggregates = AggregateStore::connect("sqlite::memory:").await.unwrap();
        Orchestrator::new(store, Arc::new(MemoryCache::new()), aggregates, config)
    }

    async fn orchestrator_with(
        store: Arc<dyn DocumentStore>,
        model_dir: &Path,
    ) -> Orchestrator {
        let config = Config {
            model_dir: model_dir.to_string_lossy().into_owned(),
            top_k: 3,
            ..Config::default()
        };
        orchestrator_with_config(store, config).await
    }

    #[tokio::test]
    async fn fetch_cycle_builds_the_cross_product() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert_user(user("u1", &[])).await;
        store.insert_user(user("u2", &[])).await;
        store.insert_video(video("v1", &["rock"])).await;
        store.insert_video(video("v2", &["jazz"])).await;

        let orchestrator = orchestrator_with(store, dir.path()).await;
        let added = orchestrator.fetch_cycle().await.unwrap();

        assert_eq!(added, 4);
        assert_eq!(orchestrator.corpus_len().await, 4);
    }

    #[tokio::test]
    async fn excluded_videos_never_enter_the_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert_user(user("u1", &[])).await;
        store.insert_video(video("v1", &["rock"])).await;
        store
            .insert_video(video("v2", &["rock", EXCLUSION_TAG]))
            .await;

        let orchestrator = orchestrator_with(store, dir.path()).await;
        let added = orchestrator.fetch_cycle().await.unwrap();

        assert_eq!(added, 1);
    }

    #[tokio::test]
    async fn train_cycle_on_empty_corpus_is_a_logged_skip() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator =
            orchestrator_with(Arc::new(MemoryStore::new()), dir.path()).await;

        orchestrator.train_cycle().await.unwrap();
        assert!(orchestrator.current_model().await.is_none());
    }

    #[tokio::test]
    async fn write_back_without_a_model_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator =
            orchestrator_with(Arc::new(MemoryStore::new()), dir.path()).await;

        let written = orchestrator.write_back_cycle().await.unwrap();
        assert_eq!(written, 0);
    }

    #[tokio::test]
    async fn full_tick_populates_buckets_and_drains_the_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert_user(user("u1", &["v1X"])).await;
        store.insert_user(user("u2", &[])).await;
        store.insert_video(video("v1", &["rock"])).await;
        store.insert_video(video("v2", &["rock"])).await;
        store.insert_video(video("v3", &["jazz"])).await;

        let orchestrator = orchestrator_with(store.clone(), dir.path()).await;
        orchestrator.fetch_cycle().await.unwrap();
        orchestrator.train_cycle().await.unwrap();
        let written = orchestrator.write_back_cycle().await.unwrap();

        assert_eq!(written, 2);
        assert_eq!(orchestrator.corpus_len().await, 0);
        assert!(orchestrator.current_model().await.is_some());
        assert!(model_exists(dir.path()));

        // u1 watched v1, so the bucket must not contain it
        let bucket = store.bucket("u1").await.unwrap();
        assert!(!bucket.is_empty());
        assert!(!bucket.contains(&"v1".to_string()));

        let bucket = store.bucket("u2").await.unwrap();
        assert_eq!(bucket.len(), 3);
    }

    #[tokio::test]
    async fn write_back_merge_preserves_unwatched_bucket_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert_user(user("u1", &["v1X"])).await;
        store.insert_video(video("v1", &["rock"])).await;
        store.insert_video(video("v2", &["rock"])).await;

        // Pre-existing bucket: one entry the user has since watched, one kept
        store
            .replace_discover_bucket(
                "u1",
                vec!["v1".to_string(), "v_legacy".to_string()],
            )
            .await
            .unwrap();

        let orchestrator = orchestrator_with(store.clone(), dir.path()).await;
        orchestrator.fetch_cycle().await.unwrap();
        orchestrator.train_cycle().await.unwrap();
        orchestrator.write_back_cycle().await.unwrap();

        let bucket = store.bucket("u1").await.unwrap();
        assert!(!bucket.contains(&"v1".to_string()));
        assert!(bucket.contains(&"v_legacy".to_string()));
        assert!(bucket.contains(&"v2".to_string()));

        let unique: HashSet<&String> = bucket.iter().collect();
        assert_eq!(unique.len(), bucket.len());
    }

    #[tokio::test]
    async fn failed_bucket_write_leaves_the_corpus_intact() {
        struct FailingStore {
            inner: MemoryStore,
        }

        #[async_trait::async_trait]
        impl DocumentStore for FailingStore {
            async fn fetch_users(&self) -> PipelineResult<Vec<UserDoc>> {
                self.inner.fetch_users().await
            }
            async fn fetch_videos(&self) -> PipelineResult<Vec<VideoDoc>> {
                self.inner.fetch_videos().await
            }
            async fn list_user_ids(&self) -> PipelineResult<Vec<String>> {
                self.inner.list_user_ids().await
            }
            async fn list_video_ids(&self) -> PipelineResult<Vec<String>> {
                self.inner.list_video_ids().await
            }
            async fn watched_views(&self, user_id: &str) -> PipelineResult<Vec<String>> {
                self.inner.watched_views(user_id).await
            }
            async fn discover_bucket(&self, user_id: &str) -> PipelineResult<Vec<String>> {
                self.inner.discover_bucket(user_id).await
            }
            async fn ensure_discover_bucket(&self, user_id: &str) -> PipelineResult<()> {
                self.inner.ensure_discover_bucket(user_id).await
            }
            async fn replace_discover_bucket(
                &self,
                _user_id: &str,
                _video_ids: Vec<String>,
            ) -> PipelineResult<()> {
                Err(PipelineError::Upstream("write refused".to_string()))
            }
            async fn union_discover_bucket(
                &self,
                user_id: &str,
                video_ids: Vec<String>,
            ) -> PipelineResult<()> {
                self.inner.union_discover_bucket(user_id, video_ids).await
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let inner = MemoryStore::new();
        inner.insert_user(user("u1", &[])).await;
        inner.insert_video(video("v1", &["rock"])).await;
        let store = Arc::new(FailingStore { inner });

        let orchestrator = orchestrator_with(store, dir.path()).await;
        orchestrator.fetch_cycle().await.unwrap();
        orchestrator.train_cycle().await.unwrap();

        let before = orchestrator.corpus_len().await;
        assert!(orchestrator.write_back_cycle().await.is_err());
        assert_eq!(orchestrator.corpus_len().await, before);
    }

    #[tokio::test]
    async fn overlapping_write_back_cycles_drain_the_corpus_once() {
        struct SlowStore {
            inner: MemoryStore,
        }

        #[async_trait::async_trait]
        impl DocumentStore for SlowStore {
            async fn fetch_users(&self) -> PipelineResult<Vec<UserDoc>> {
                self.inner.fetch_users().await
            }
            async fn fetch_videos(&self) -> PipelineResult<Vec<VideoDoc>> {
                self.inner.fetch_videos().await
            }
            async fn list_user_ids(&self) -> PipelineResult<Vec<String>> {
                self.inner.list_user_ids().await
            }
            async fn list_video_ids(&self) -> PipelineResult<Vec<String>> {
                self.inner.list_video_ids().await
            }
            async fn watched_views(&self, user_id: &str) -> PipelineResult<Vec<String>> {
                self.inner.watched_views(user_id).await
            }
            async fn discover_bucket(&self, user_id: &str) -> PipelineResult<Vec<String>> {
                self.inner.discover_bucket(user_id).await
            }
            async fn ensure_discover_bucket(&self, user_id: &str) -> PipelineResult<()> {
                self.inner.ensure_discover_bucket(user_id).await
            }
            async fn replace_discover_bucket(
                &self,
                user_id: &str,
                video_ids: Vec<String>,
            ) -> PipelineResult<()> {
                tokio::time::sleep(Duration::from_millis(100)).await;
                self.inner.replace_discover_bucket(user_id, video_ids).await
            }
            async fn union_discover_bucket(
                &self,
                user_id: &str,
                video_ids: Vec<String>,
            ) -> PipelineResult<()> {
                self.inner.union_discover_bucket(user_id, video_ids).await
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let inner = MemoryStore::new();
        inner.insert_user(user("u1", &[])).await;
        inner.insert_video(video("v1", &["rock"])).await;
        let store = Arc::new(SlowStore { inner });

        let orchestrator = orchestrator_with(store, dir.path()).await;
        orchestrator.fetch_cycle().await.unwrap();
        orchestrator.train_cycle().await.unwrap();

        // A scheduler tick and a forced write-back can land at the same time.
        // Exactly one of them gets the corpus; the other finds it empty.
        let (first, second) = tokio::join!(
            orchestrator.write_back_cycle(),
            orchestrator.write_back_cycle()
        );
        assert_eq!(first.unwrap() + second.unwrap(), 1);
        assert_eq!(orchestrator.corpus_len().await, 0);
    }

    #[tokio::test]
    async fn fetch_cycle_reuses_the_memoized_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert_user(user("u1", &[])).await;
        store.insert_video(video("v1", &["rock"])).await;

        let orchestrator = orchestrator_with(store.clone(), dir.path()).await;
        assert_eq!(orchestrator.fetch_cycle().await.unwrap(), 1);

        // A video added while the batch memo is live is not seen yet; the
        // memoized pairs land in the corpus again instead.
        store.insert_video(video("v2", &["jazz"])).await;
        assert_eq!(orchestrator.fetch_cycle().await.unwrap(), 1);
        assert_eq!(orchestrator.corpus_len().await, 2);
    }

    #[tokio::test]
    async fn train_cycle_skips_while_the_version_memo_is_live() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert_user(user("u1", &[])).await;
        store.insert_video(video("v1", &["rock"])).await;

        let orchestrator = orchestrator_with(store, dir.path()).await;
        orchestrator.fetch_cycle().await.unwrap();
        orchestrator.train_cycle().await.unwrap();
        let first = orchestrator.current_model().await.unwrap();

        orchestrator.fetch_cycle().await.unwrap();
        orchestrator.train_cycle().await.unwrap();
        let second = orchestrator.current_model().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn trainer_hyperparameters_come_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert_user(user("u1", &[])).await;
        store.insert_user(user("u2", &[])).await;
        store.insert_video(video("v1", &["rock"])).await;
        store.insert_video(video("v2", &["jazz"])).await;
        store.insert_video(video("v3", &["folk"])).await;

        let config = Config {
            model_dir: dir.path().to_string_lossy().into_owned(),
            embedding_dim: 16,
            svd_rank: 2,
            ..Config::default()
        };
        let orchestrator = orchestrator_with_config(store, config).await;
        orchestrator.fetch_cycle().await.unwrap();
        orchestrator.train_cycle().await.unwrap();

        // tower width + factor rank; the default 64 + 50 would be far wider
        let model = orchestrator.current_model().await.unwrap();
        assert_eq!(model.embedding_dim(), 18);
    }
}
