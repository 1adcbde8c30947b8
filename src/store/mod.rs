use serde::{Deserialize, Serialize};

use crate::{error::PipelineResult, models::RawComment};

pub mod http;
pub mod memory;

pub use http::HttpStore;
pub use memory::MemoryStore;

/// A user document from the "users" collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserDoc {
    pub id: String,
    /// User interest tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Watched-view ids, raw (may carry the trailing state marker)
    #[serde(default, rename = "watchedViews")]
    pub watched_views: Vec<String>,
}

/// A video document from the "videos" collection, with its nested comments
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoDoc {
    pub id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
    pub views: Option<u64>,
    pub impressions: Option<u64>,
    /// Ids of users who liked the video
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default, rename = "comcount")]
    pub comments_count: i64,
    #[serde(default)]
    pub comments: Vec<RawComment>,
}

/// Document store collaborator
///
/// The pipeline only ever talks to the store through this seam, so the HTTP
/// implementation can be swapped for the in-memory one in tests and local runs.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Stream the full users collection
    async fn fetch_users(&self) -> PipelineResult<Vec<UserDoc>>;

    /// Stream the full videos collection, nested comments included
    async fn fetch_videos(&self) -> PipelineResult<Vec<VideoDoc>>;

    /// All known user ids
    async fn list_user_ids(&self) -> PipelineResult<Vec<String>>;

    /// All known video ids
    async fn list_video_ids(&self) -> PipelineResult<Vec<String>>;

    /// Raw watched-view list for one user (state markers intact)
    async fn watched_views(&self, user_id: &str) -> PipelineResult<Vec<String>>;

    /// Current contents of the user's "discover" recommendation bucket
    async fn discover_bucket(&self, user_id: &str) -> PipelineResult<Vec<String>>;

    /// Create the discover bucket if the user does not have one yet
    async fn ensure_discover_bucket(&self, user_id: &str) -> PipelineResult<()>;

    /// Overwrite the discover bucket with the given list
    async fn replace_discover_bucket(
        &self,
        user_id: &str,
        video_ids: Vec<String>,
    ) -> PipelineResult<()>;

    /// Append ids to the discover bucket, skipping ones already present
    async fn union_discover_bucket(
        &self,
        user_id: &str,
        video_ids: Vec<String>,
    ) -> PipelineResult<()>;
}
