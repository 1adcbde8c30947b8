use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Videos carrying this tag are filtered out at ingestion (domain content filter).
pub const EXCLUSION_TAG: &str = "#2x10862CE";

/// Trailing state marker appended to watched-view ids by the client; stripped to
/// recover the canonical video id.
pub const WATCHED_STATE_MARKER: char = 'X';

/// A comment as fetched from the document store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawComment {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub dislikes: i64,
    #[serde(default)]
    pub user: String,
}

/// One (user, video) pairing as observed at ingestion time, before any
/// feature derivation. Numeric fields are `Option` so that a genuinely
/// missing value is distinguishable from zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawInteraction {
    pub user_id: String,
    pub video_id: String,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub watched_views: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
    pub views: Option<u64>,
    pub impressions: Option<u64>,
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default)]
    pub comments_count: i64,
    #[serde(default)]
    pub comments: Vec<RawComment>,
}

/// VADER-style polarity scores
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct SentimentScore {
    pub neg: f64,
    pub neu: f64,
    pub pos: f64,
    pub compound: f64,
}

/// One topic from the per-record comment topic model: the topic index and its
/// weighted representative terms rendered as `0.123*"word" + ...`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicTerms {
    pub topic_id: usize,
    pub terms: String,
}

/// A comment after text normalization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeaturedComment {
    /// Stop-word-filtered, stemmed token sequence
    pub content: Vec<String>,
    pub date: Option<DateTime<Utc>>,
    pub likes: i64,
    pub dislikes: i64,
    pub user: String,
}

/// A fully featurized interaction record, ready for training.
///
/// Produced exclusively by the feature extractor; every invariant of the raw
/// record (required fields present, exclusion tag absent) has already been
/// enforced by the time a value of this type exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionRecord {
    pub user_id: String,
    pub video_id: String,
    /// Lowercased user interest tags
    pub interests: Vec<String>,
    /// Watched-view ids with the trailing state marker stripped
    pub watched_views: Vec<String>,
    /// Lowercased video tags
    pub tags: Vec<String>,
    /// Normalized description token sequence
    pub description: Vec<String>,
    /// views / impressions * 100, clamped to [0, 100]; 0 when impressions == 0
    pub retention: f64,
    /// Length of the like list
    pub likes: u64,
    pub comments_count: i64,
    pub comments: Vec<FeaturedComment>,
    pub impressions: u64,
    pub views: u64,
    pub description_sentiment: SentimentScore,
    pub comments_sentiment: Vec<SentimentScore>,
    pub comments_topics: Vec<TopicTerms>,
}

/// Response body for the scoring endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct RecommendResponse {
    pub message: String,
    pub recommendations: Vec<String>,
}
