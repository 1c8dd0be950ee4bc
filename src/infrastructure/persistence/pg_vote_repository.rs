//! PostgreSQL implementation of the vote repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

use crate::domain::entities::{ChoiceCount, NewVote, Vote, VoterKey};
use crate::domain::repositories::VoteRepository;
use crate::error::AppError;

#[derive(sqlx::FromRow)]
struct VoteRow {
    id: i64,
    poll_id: i64,
    voter_key: String,
    choice: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ChoiceCountRow {
    poll_id: i64,
    choice: String,
    count: i64,
}

/// PostgreSQL repository for individual votes.
///
/// The unique index on `(poll_id, voter_key)` is the final word on deduplication.
pub struct PgVoteRepository {
    pool: Arc<PgPool>,
}

impl PgVoteRepository {
    /// Creates a new repository with a database connection pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VoteRepository for PgVoteRepository {
    async fn insert_vote(&self, new_vote: NewVote) -> Result<Vote, AppError> {
        // Locking the poll row serializes the insert against a concurrent close.
        let row = sqlx::query_as::<_, VoteRow>(
            r#"
            WITH open_poll AS (
                SELECT id FROM polls
                WHERE id = $1 AND status = 'open'
                FOR SHARE
            )
            INSERT INTO poll_votes (poll_id, voter_key, choice)
            SELECT id, $2, $3 FROM open_poll
            RETURNING id, poll_id, voter_key, choice, created_at
            "#,
        )
        .bind(new_vote.poll_id)
        .bind(new_vote.voter.to_string())
        .bind(&new_vote.choice)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| match AppError::from(e) {
            AppError::Conflict { .. } => AppError::conflict(
                "Voter already voted on this poll",
                json!({ "poll_id": new_vote.poll_id, "voter": new_vote.voter.to_string() }),
            ),
            other => other,
        })?
        .ok_or_else(|| {
            AppError::bad_request("Poll is closed", json!({ "poll_id": new_vote.poll_id }))
        })?;

        let voter = row.voter_key.parse::<VoterKey>().map_err(|reason| {
            AppError::internal("Corrupt vote row", json!({ "id": row.id, "reason": reason }))
        })?;

        Ok(Vote {
            id: row.id,
            poll_id: row.poll_id,
            voter,
            choice: row.choice,
            created_at: row.created_at,
        })
    }

    async fn find_choice(
        &self,
        poll_id: i64,
        voter: VoterKey,
    ) -> Result<Option<String>, AppError> {
        let choice = sqlx::query_scalar::<_, String>(
            r#"
            SELECT choice
            FROM poll_votes
            WHERE poll_id = $1 AND voter_key = $2
            "#,
        )
        .bind(poll_id)
        .bind(voter.to_string())
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(choice)
    }

    async fn count_by_choice(&self, poll_ids: &[i64]) -> Result<Vec<ChoiceCount>, AppError> {
        if poll_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, ChoiceCountRow>(
            r#"
            SELECT poll_id, choice, COUNT(*) AS count
            FROM poll_votes
            WHERE poll_id = ANY($1)
            GROUP BY poll_id, choice
            ORDER BY poll_id, choice
            "#,
        )
        .bind(poll_ids)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ChoiceCount {
                poll_id: row.poll_id,
                choice: row.choice,
                count: row.count,
            })
            .collect())
    }
}
