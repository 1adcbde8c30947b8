use chrono::Utc;
use ndarray::{concatenate, Array1, Array2, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::{
    error::{PipelineError, PipelineResult},
    models::InteractionRecord,
};

use super::{
    clustering::cluster_engagement,
    model::HybridModel,
    svd::truncated_svd,
    towers::{Adagrad, EmbeddingTower, TextVectorizer, Vocabulary},
};

/// Training hyperparameters. Defaults mirror the production schedule.
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub embedding_dim: usize,
    pub svd_rank: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub text_max_tokens: usize,
    pub text_sequence_length: usize,
    pub engagement_clusters: usize,
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 64,
            svd_rank: 50,
            epochs: 3,
            batch_size: 4096,
            learning_rate: 0.1,
            text_max_tokens: 20_000,
            text_sequence_length: 200,
            engagement_clusters: 5,
            seed: 42,
        }
    }
}

/// Trains the hybrid retrieval model: two id towers under an
/// in-batch-negative retrieval objective, composed with truncated-SVD factors
/// of the views interaction matrix.
pub struct HybridTrainer {
    pub config: TrainerConfig,
}

impl HybridTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    /// Trains over the corpus in ingestion order. Any failure here aborts the
    /// training cycle; the caller keeps the corpus for a retry.
    pub fn train(&self, corpus: &[InteractionRecord]) -> PipelineResult<HybridModel> {
        if corpus.is_empty() {
            return Err(PipelineError::Training(
                "training corpus is empty".to_string(),
            ));
        }

        let started = std::time::Instant::now();
        tracing::info!(records = corpus.len(), "Starting model training");

        let clusters = cluster_engagement(
            corpus,
            self.config.engagement_clusters,
            self.config.seed,
        )?;
        let mut cluster_counts = vec![0usize; self.config.engagement_clusters];
        for &label in &clusters {
            cluster_counts[label] += 1;
        }
        tracing::info!(distribution = ?cluster_counts, "Engagement cluster labels derived");

        // Auxiliary description path; bounded vocab, fixed-length sequences.
        // Not wired into the retrieval loss.
        let descriptions: Vec<Vec<String>> =
            corpus.iter().map(|r| r.description.clone()).collect();
        let vectorizer = TextVectorizer::fit(
            &descriptions,
            self.config.text_max_tokens,
            self.config.text_sequence_length,
        );
        let description_sequences: Vec<Vec<usize>> = descriptions
            .iter()
            .map(|tokens| vectorizer.vectorize(tokens))
            .collect();
        tracing::info!(
            vocab = vectorizer.vocab_len(),
            sequences = description_sequences.len(),
            "Fitted description vectorizer"
        );

        let user_vocab = Vocabulary::build(corpus.iter().map(|r| r.user_id.as_str()));
        let video_vocab = Vocabulary::build(corpus.iter().map(|r| r.video_id.as_str()));

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut user_tower =
            EmbeddingTower::new(user_vocab, self.config.embedding_dim, &mut rng);
        let mut video_tower =
            EmbeddingTower::new(video_vocab, self.config.embedding_dim, &mut rng);

        let pairs: Vec<(usize, usize)> = corpus
            .iter()
            .map(|r| {
                (
                    user_tower.vocab.lookup(&r.user_id),
                    video_tower.vocab.lookup(&r.video_id),
                )
            })
            .collect();

        // First 80% trains, the rest validates; ingestion order, no shuffle.
        let mut train_len = (pairs.len() as f64 * 0.8).floor() as usize;
        if train_len == 0 {
            train_len = pairs.len();
        }
        let (train_pairs, val_pairs) = pairs.split_at(train_len);

        let mut user_optimizer = Adagrad::new(
            self.config.learning_rate,
            user_tower.vocab.len(),
            self.config.embedding_dim,
        );
        let mut video_optimizer = Adagrad::new(
            self.config.learning_rate,
            video_tower.vocab.len(),
            self.config.embedding_dim,
        );

        for epoch in 0..self.config.epochs {
            let mut epoch_loss = 0.0;
            let mut batches = 0;

            for batch in train_pairs.chunks(self.config.batch_size) {
                epoch_loss += self.train_batch(
                    batch,
                    &mut user_tower,
                    &mut video_tower,
                    &mut user_optimizer,
                    &mut video_optimizer,
                );
                batches += 1;
            }

            tracing::info!(
                epoch = epoch + 1,
                loss = epoch_loss / batches as f32,
                "Epoch complete"
            );
        }

        if !val_pairs.is_empty() {
            let hit_rate = Self::top_k_hit_rate(val_pairs, &user_tower, &video_tower, 10);
            tracing::info!(
                validation_pairs = val_pairs.len(),
                top10_hit_rate = hit_rate,
                "Validation complete"
            );
        } else {
            tracing::info!("Corpus too small to hold out a validation slice");
        }

        // Dense views matrix over the tower vocabularies (OOV row/col stays
        // zero), factorized into fixed-rank user/video factors.
        let mut interactions =
            Array2::<f32>::zeros((user_tower.vocab.len(), video_tower.vocab.len()));
        for (record, &(u, v)) in corpus.iter().zip(&pairs) {
            interactions[[u, v]] = record.views as f32;
        }
        let factors = truncated_svd(&interactions, self.config.svd_rank, self.config.seed);
        tracing::info!(rank = factors.rank, "Matrix factorization complete");

        // Combined scoring embedding: tower embedding first, SVD factors
        // second. Serving reads these persisted rows, so the order and width
        // cannot drift between training and scoring.
        let user_combined = concatenate(
            Axis(1),
            &[user_tower.weights.view(), factors.user_factors.view()],
        )
        .map_err(|e| PipelineError::Training(format!("embedding concat failed: {}", e)))?;
        let video_combined = concatenate(
            Axis(1),
            &[video_tower.weights.view(), factors.video_factors.view()],
        )
        .map_err(|e| PipelineError::Training(format!("embedding concat failed: {}", e)))?;

        let version = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let model = HybridModel::from_parts(
            version,
            user_tower.vocab.ids().to_vec(),
            user_combined,
            video_tower.vocab.ids().to_vec(),
            video_combined,
        );

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            dim = model.embedding_dim(),
            "Model training complete"
        );

        Ok(model)
    }

    /// One in-batch-negatives step: every other positive video in the batch
    /// serves as a negative for each (user, video) pair. Returns the batch
    /// softmax cross-entropy loss.
    fn train_batch(
        &self,
        batch: &[(usize, usize)],
        user_tower: &mut EmbeddingTower,
        video_tower: &mut EmbeddingTower,
        user_optimizer: &mut Adagrad,
        video_optimizer: &mut Adagrad,
    ) -> f32 {
        let size = batch.len();
        let dim = self.config.embedding_dim;

        let mut users = Array2::<f32>::zeros((size, dim));
        let mut videos = Array2::<f32>::zeros((size, dim));
        for (i, &(u, v)) in batch.iter().enumerate() {
            users.row_mut(i).assign(&user_tower.weights.row(u));
            videos.row_mut(i).assign(&video_tower.weights.row(v));
        }

        let logits = users.dot(&videos.t());

        // Row-wise softmax with max subtraction for stability
        let mut probabilities = logits;
        let mut loss = 0.0;
        for i in 0..size {
            let mut row = probabilities.row_mut(i);
            let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            row.mapv_inplace(|v| (v - max).exp());
            let total: f32 = row.sum();
            row.mapv_inplace(|v| v / total);
            loss -= row[i].max(1e-12).ln();
        }
        loss /= size as f32;

        // d(loss)/d(logits) = (softmax - identity) / batch
        for i in 0..size {
            probabilities[[i, i]] -= 1.0;
        }
        probabilities.mapv_inplace(|v| v / size as f32);

        let user_grads = probabilities.dot(&videos);
        let video_grads = probabilities.t().dot(&users);

        for (i, &(u, v)) in batch.iter().enumerate() {
            let user_grad: Array1<f32> = user_grads.row(i).to_owned();
            let video_grad: Array1<f32> = video_grads.row(i).to_owned();
            user_optimizer.apply(&mut user_tower.weights, u, &user_grad);
            video_optimizer.apply(&mut video_tower.weights, v, &video_grad);
        }

        loss
    }

    /// Fraction of held-out pairs whose true video ranks in the top k of the
    /// full video vocabulary by tower inner product.
    fn top_k_hit_rate(
        pairs: &[(usize, usize)],
        user_tower: &EmbeddingTower,
        video_tower: &EmbeddingTower,
        k: usize,
    ) -> f64 {
        let mut hits = 0;
        for &(u, v) in pairs {
            let user = user_tower.weights.row(u);
            let scores = video_tower.weights.dot(&user);
            let true_score = scores[v];
            let better = scores.iter().filter(|&&s| s > true_score).count();
            if better < k {
                hits += 1;
            }
        }
        hits as f64 / pairs.len() as f64
    }
}
