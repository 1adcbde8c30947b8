use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};

use crate::{error::PipelineResult, models::InteractionRecord};

/// Relational aggregate store for featurized interaction rollups.
///
/// One row per (user, video) pair; re-training cycles overwrite rows in place.
#[derive(Clone)]
pub struct AggregateStore {
    pool: SqlitePool,
}

impl AggregateStore {
    /// Creates a SQLite connection pool and ensures the schema exists
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> PipelineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS interactions (
                user_id TEXT NOT NULL,
                video_id TEXT NOT NULL,
                interests TEXT,
                tags TEXT,
                description TEXT,
                retention REAL,
                likes INTEGER,
                comments INTEGER,
                correlate REAL,
                impressions INTEGER,
                views INTEGER,
                PRIMARY KEY (user_id, video_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or overwrite the aggregate row for one record.
    ///
    /// `correlate` carries the description sentiment compound score.
    pub async fn upsert(&self, record: &InteractionRecord) -> PipelineResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO interactions (
                user_id, video_id, interests, tags, description,
                retention, likes, comments, correlate, impressions, views
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.video_id)
        .bind(record.interests.join(","))
        .bind(record.tags.join(","))
        .bind(record.description.join(" "))
        .bind(record.retention)
        .bind(record.likes as i64)
        .bind(record.comments_count)
        .bind(record.description_sentiment.compound)
        .bind(record.impressions as i64)
        .bind(record.views as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn upsert_batch(&self, records: &[InteractionRecord]) -> PipelineResult<()> {
        for record in records {
            self.upsert(record).await?;
        }
        tracing::info!(rows = records.len(), "Updated aggregate store");
        Ok(())
    }

    /// Total impressions and views across all stored rows
    pub async fn totals(&self) -> PipelineResult<(i64, i64)> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(impressions), 0), COALESCE(SUM(views), 0) FROM interactions",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok((row.get(0), row.get(1)))
    }
}
