//! PostgreSQL implementation of the poll repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

use crate::domain::entities::{Poll, PollStatus};
use crate::domain::repositories::PollRepository;
use crate::error::AppError;

#[derive(sqlx::FromRow)]
struct PollRow {
    id: i64,
    question: String,
    options: Vec<String>,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PollRow> for Poll {
    type Error = AppError;

    fn try_from(row: PollRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<PollStatus>().map_err(|reason| {
            AppError::internal(
                "Corrupt poll row",
                json!({ "poll_id": row.id, "reason": reason }),
            )
        })?;
        Ok(Poll::new(
            row.id,
            row.question,
            row.options,
            status,
            row.created_at,
        ))
    }
}

/// PostgreSQL repository for polls.
pub struct PgPollRepository {
    pool: Arc<PgPool>,
}

impl PgPollRepository {
    /// Creates a new repository with a database connection pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PollRepository for PgPollRepository {
    async fn find_by_id(&self, poll_id: i64) -> Result<Option<Poll>, AppError> {
        let row = sqlx::query_as::<_, PollRow>(
            r#"
            SELECT id, question, options, status, created_at
            FROM polls
            WHERE id = $1
            "#,
        )
        .bind(poll_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(Poll::try_from).transpose()
    }

    async fn close(&self, poll_id: i64) -> Result<bool, AppError> {
        // The status guard makes Closed terminal even under concurrent close requests.
        let result = sqlx::query(
            r#"
            UPDATE polls
            SET status = 'closed', closed_at = NOW()
            WHERE id = $1 AND status = 'open'
            "#,
        )
        .bind(poll_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
