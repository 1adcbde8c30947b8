use crate::models::{
    FeaturedComment, InteractionRecord, RawInteraction, WATCHED_STATE_MARKER,
};

pub mod sentiment;
pub mod text;
pub mod topics;

pub use sentiment::SentimentScorer;
pub use text::TextNormalizer;
pub use topics::TopicModel;

/// Strips the trailing state marker from a watched-view id to recover the
/// canonical video id.
pub fn normalize_watched_id(id: &str) -> String {
    id.trim_end_matches(WATCHED_STATE_MARKER).to_string()
}

/// views / impressions * 100, clamped to [0, 100]. Zero impressions means
/// zero retention, never a division fault.
pub fn retention_score(views: u64, impressions: u64) -> f64 {
    if impressions == 0 {
        return 0.0;
    }
    ((views as f64 / impressions as f64) * 100.0).clamp(0.0, 100.0)
}

/// Turns raw interaction records into featurized, model-ready records.
///
/// All failures are per-record: a record that fails validation or processing
/// is dropped and logged, never surfaced to the caller.
pub struct FeatureExtractor {
    normalizer: TextNormalizer,
    sentiment: SentimentScorer,
    topics: TopicModel,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self {
            normalizer: TextNormalizer::new(),
            sentiment: SentimentScorer::new(),
            topics: TopicModel::default(),
        }
    }

    /// Validates required fields; empty strings count as missing, numeric
    /// zero does not.
    fn validate(raw: &RawInteraction) -> Result<(), String> {
        if raw.user_id.is_empty() {
            return Err("user_id".to_string());
        }
        if raw.video_id.is_empty() {
            return Err("video_id".to_string());
        }
        if raw.description.is_empty() {
            return Err("description".to_string());
        }
        if raw.views.is_none() {
            return Err("views".to_string());
        }
        if raw.impressions.is_none() {
            return Err("impressions".to_string());
        }
        Ok(())
    }

    /// Featurizes one record, or drops it (with a log line) when it is
    /// malformed.
    pub fn extract(&self, raw: RawInteraction) -> Option<InteractionRecord> {
        if let Err(field) = Self::validate(&raw) {
            tracing::warn!(
                user_id = %raw.user_id,
                video_id = %raw.video_id,
                field = %field,
                "Dropping record with missing or empty required field"
            );
            return None;
        }

        let views = raw.views.unwrap_or(0);
        let impressions = raw.impressions.unwrap_or(0);
        let retention = retention_score(views, impressions);

        let interests: Vec<String> = raw.interests.iter().map(|i| i.to_lowercase()).collect();
        let tags: Vec<String> = raw.tags.iter().map(|t| t.to_lowercase()).collect();

        let description = self.normalizer.normalize(&raw.description);
        let description_sentiment = self.sentiment.score_tokens(&description);

        let comments: Vec<FeaturedComment> = raw
            .comments
            .into_iter()
            .map(|comment| FeaturedComment {
                content: self.normalizer.normalize(&comment.content),
                date: comment.date,
                likes: comment.likes,
                dislikes: comment.dislikes,
                user: comment.user,
            })
            .collect();

        let comments_sentiment = comments
            .iter()
            .map(|comment| self.sentiment.score_tokens(&comment.content))
            .collect();

        let comment_docs: Vec<Vec<String>> =
            comments.iter().map(|c| c.content.clone()).collect();
        let comments_topics = self.topics.comment_topics(&comment_docs);

        let watched_views = raw
            .watched_views
            .iter()
            .map(|view| normalize_watched_id(view))
            .collect();

        tracing::debug!(
            user_id = %raw.user_id,
            video_id = %raw.video_id,
            retention = retention,
            comments = comments.len(),
            "Featurized record"
        );

        Some(InteractionRecord {
            user_id: raw.user_id,
            video_id: raw.video_id,
            interests,
            watched_views,
            tags,
            description,
            retention,
            likes: raw.likes.len() as u64,
            comments_count: raw.comments_count,
            comments,
            impressions,
            views,
            description_sentiment,
            comments_sentiment,
            comments_topics,
        })
    }

    /// Featurizes a batch; malformed records are dropped, the rest survive.
    pub fn extract_batch(&self, raws: Vec<RawInteraction>) -> Vec<InteractionRecord> {
        let total = raws.len();
        let records: Vec<InteractionRecord> =
            raws.into_iter().filter_map(|raw| self.extract(raw)).collect();

        tracing::info!(
            input = total,
            kept = records.len(),
            dropped = total - records.len(),
            "Preprocessing complete"
        );

        records
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}
