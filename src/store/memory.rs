use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::error::{PipelineError, PipelineResult};

use super::{DocumentStore, UserDoc, VideoDoc};

/// In-memory document store used by tests and local runs without a backing
/// service. Buckets live alongside the user documents, keyed by user id.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    users: Vec<UserDoc>,
    videos: Vec<VideoDoc>,
    buckets: HashMap<String, Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: UserDoc) {
        let mut inner = self.inner.write().await;
        inner.users.retain(|u| u.id != user.id);
        inner.users.push(user);
    }

    pub async fn insert_video(&self, video: VideoDoc) {
        let mut inner = self.inner.write().await;
        inner.videos.retain(|v| v.id != video.id);
        inner.videos.push(video);
    }

    /// Snapshot of a user's bucket, for assertions
    pub async fn bucket(&self, user_id: &str) -> Option<Vec<String>> {
        self.inner.read().await.buckets.get(user_id).cloned()
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn fetch_users(&self) -> PipelineResult<Vec<UserDoc>> {
        Ok(self.inner.read().await.users.clone())
    }

    async fn fetch_videos(&self) -> PipelineResult<Vec<VideoDoc>> {
        Ok(self.inner.read().await.videos.clone())
    }

    async fn list_user_ids(&self) -> PipelineResult<Vec<String>> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .iter()
            .map(|u| u.id.clone())
            .collect())
    }

    async fn list_video_ids(&self) -> PipelineResult<Vec<String>> {
        Ok(self
            .inner
            .read()
            .await
            .videos
            .iter()
            .map(|v| v.id.clone())
            .collect())
    }

    async fn watched_views(&self, user_id: &str) -> PipelineResult<Vec<String>> {
        let inner = self.inner.read().await;
        inner
            .users
            .iter()
            .find(|u| u.id == user_id)
            .map(|u| u.watched_views.clone())
            .ok_or_else(|| PipelineError::Upstream(format!("unknown user: {}", user_id)))
    }

    async fn discover_bucket(&self, user_id: &str) -> PipelineResult<Vec<String>> {
        Ok(self
            .inner
            .read()
            .await
            .buckets
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn ensure_discover_bucket(&self, user_id: &str) -> PipelineResult<()> {
        self.inner
            .write()
            .await
            .buckets
            .entry(user_id.to_string())
            .or_default();
        Ok(())
    }

    async fn replace_discover_bucket(
        &self,
        user_id: &str,
        video_ids: Vec<String>,
    ) -> PipelineResult<()> {
        self.inner
            .write()
            .await
            .buckets
            .insert(user_id.to_string(), video_ids);
        Ok(())
    }

    async fn union_discover_bucket(
        &self,
        user_id: &str,
        video_ids: Vec<String>,
    ) -> PipelineResult<()> {
        let mut inner = self.inner.write().await;
        let bucket = inner.buckets.entry(user_id.to_string()).or_default();
        for id in video_ids {
            if !bucket.contains(&id) {
                bucket.push(id);
            }
        }
        Ok(())
    }
}
