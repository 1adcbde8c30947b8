use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

use super::{DocumentStore, UserDoc, VideoDoc};

/// REST-backed document store client.
///
/// Talks to the document store's JSON gateway: `/users` and `/videos` return the
/// full collections (videos with nested comments), and per-user documents hang
/// off `/users/{id}`. The discover bucket is the `vid` list of the user's
/// `algs/discover` sub-document.
#[derive(Clone)]
pub struct HttpStore {
    http_client: HttpClient,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct BucketDoc {
    #[serde(default)]
    vid: Vec<String>,
}

#[derive(Debug, Serialize)]
struct BucketUpdate {
    vid: Vec<String>,
}

impl HttpStore {
    pub fn new(base_url: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> PipelineResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http_client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Upstream(format!(
                "GET {} returned status {}: {}",
                path, status, body
            )));
        }

        Ok(response.json().await?)
    }

    async fn put_json<T: serde::Serialize>(&self, path: &str, body: &T) -> PipelineResult<()> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http_client.put(&url).json(body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Upstream(format!(
                "PUT {} returned status {}: {}",
                path, status, body
            )));
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for HttpStore {
    async fn fetch_users(&self) -> PipelineResult<Vec<UserDoc>> {
        let users: Vec<UserDoc> = self.get_json("/users").await?;
        tracing::debug!(count = users.len(), "Fetched users collection");
        Ok(users)
    }

    async fn fetch_videos(&self) -> PipelineResult<Vec<VideoDoc>> {
        let videos: Vec<VideoDoc> = self.get_json("/videos").await?;
        tracing::debug!(count = videos.len(), "Fetched videos collection");
        Ok(videos)
    }

    async fn list_user_ids(&self) -> PipelineResult<Vec<String>> {
        Ok(self
            .fetch_users()
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect())
    }

    async fn list_video_ids(&self) -> PipelineResult<Vec<String>> {
        Ok(self
            .fetch_videos()
            .await?
            .into_iter()
            .map(|v| v.id)
            .collect())
    }

    async fn watched_views(&self, user_id: &str) -> PipelineResult<Vec<String>> {
        let user: UserDoc = self.get_json(&format!("/users/{}", user_id)).await?;
        Ok(user.watched_views)
    }

    async fn discover_bucket(&self, user_id: &str) -> PipelineResult<Vec<String>> {
        let doc: BucketDoc = self
            .get_json(&format!("/users/{}/algs/discover", user_id))
            .await?;
        Ok(doc.vid)
    }

    async fn ensure_discover_bucket(&self, user_id: &str) -> PipelineResult<()> {
        match self.discover_bucket(user_id).await {
            Ok(_) => Ok(()),
            Err(PipelineError::Upstream(_)) => {
                self.put_json(
                    &format!("/users/{}/algs/discover", user_id),
                    &BucketUpdate { vid: Vec::new() },
                )
                .await
            }
            Err(e) => Err(e),
        }
    }

    async fn replace_discover_bucket(
        &self,
        user_id: &str,
        video_ids: Vec<String>,
    ) -> PipelineResult<()> {
        self.put_json(
            &format!("/users/{}/algs/discover", user_id),
            &BucketUpdate { vid: video_ids },
        )
        .await
    }

    async fn union_discover_bucket(
        &self,
        user_id: &str,
        video_ids: Vec<String>,
    ) -> PipelineResult<()> {
        let mut bucket = self.discover_bucket(user_id).await.unwrap_or_default();
        for id in video_ids {
            if !bucket.contains(&id) {
                bucket.push(id);
            }
        }
        self.replace_discover_bucket(user_id, bucket).await
    }
}
