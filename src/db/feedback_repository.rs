use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

/// One persisted feedback submission. Rows are insert-only; nothing in
/// this service updates or deletes them.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Feedback {
    pub id: i32,
    pub image_url: String,
    pub predicted_spice_level: i32,
    pub actual_spice_level: i32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum FeedbackStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    /// Inserts one feedback row with a server-assigned UTC timestamp.
    /// Only called after the image upload succeeded, so every committed
    /// row references an object that exists in blob storage.
    async fn record_feedback(
        &self,
        image_url: &str,
        predicted_spice_level: i32,
        actual_spice_level: i32,
    ) -> Result<Feedback, FeedbackStoreError>;
}

#[derive(Clone)]
pub struct FeedbackRepository {
    pool: PgPool,
}

impl FeedbackRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent table creation, run once at startup when the database
    /// is reachable.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feedback (
                id SERIAL PRIMARY KEY,
                image_url TEXT NOT NULL,
                predicted_spice_level INTEGER NOT NULL,
                actual_spice_level INTEGER NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl FeedbackStore for FeedbackRepository {
    async fn record_feedback(
        &self,
        image_url: &str,
        predicted_spice_level: i32,
        actual_spice_level: i32,
    ) -> Result<Feedback, FeedbackStoreError> {
        let rec = sqlx::query_as::<_, Feedback>(
            r#"
            INSERT INTO feedback (image_url, predicted_spice_level, actual_spice_level)
            VALUES ($1, $2, $3)
            RETURNING id, image_url, predicted_spice_level, actual_spice_level, timestamp
            "#,
        )
        .bind(image_url)
        .bind(predicted_spice_level)
        .bind(actual_spice_level)
        .fetch_one(&self.pool)
        .await?;
        Ok(rec)
    }
}
