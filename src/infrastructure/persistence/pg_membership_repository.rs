//! PostgreSQL implementation of the membership repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

use crate::domain::entities::{CollectionId, MemberRecord, MembershipStatus};
use crate::domain::repositories::MembershipRepository;
use crate::error::AppError;

#[derive(sqlx::FromRow)]
struct MemberRow {
    member_id: i64,
    status: String,
    role: String,
    joined_at: DateTime<Utc>,
}

impl TryFrom<MemberRow> for MemberRecord {
    type Error = AppError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<MembershipStatus>().map_err(|reason| {
            AppError::internal(
                "Corrupt membership row",
                json!({ "member_id": row.member_id, "reason": reason }),
            )
        })?;
        Ok(MemberRecord::new(row.member_id, status, row.role, row.joined_at))
    }
}

/// PostgreSQL repository for channel, topic and event membership.
///
/// One `memberships` table holds every collection kind, keyed by
/// `(collection_kind, collection_id, member_id)`.
pub struct PgMembershipRepository {
    pool: Arc<PgPool>,
}

impl PgMembershipRepository {
    /// Creates a new repository with a database connection pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipRepository for PgMembershipRepository {
    async fn find_members(
        &self,
        collection: CollectionId,
        status: MembershipStatus,
    ) -> Result<Vec<MemberRecord>, AppError> {
        let rows = sqlx::query_as::<_, MemberRow>(
            r#"
            SELECT member_id, status, role, joined_at
            FROM memberships
            WHERE collection_kind = $1 AND collection_id = $2 AND status = $3
            ORDER BY member_id
            "#,
        )
        .bind(collection.kind.as_str())
        .bind(collection.owner_id)
        .bind(status.as_str())
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.into_iter().map(MemberRecord::try_from).collect()
    }

    async fn find_member(
        &self,
        collection: CollectionId,
        member_id: i64,
    ) -> Result<Option<MemberRecord>, AppError> {
        let row = sqlx::query_as::<_, MemberRow>(
            r#"
            SELECT member_id, status, role, joined_at
            FROM memberships
            WHERE collection_kind = $1 AND collection_id = $2 AND member_id = $3
            "#,
        )
        .bind(collection.kind.as_str())
        .bind(collection.owner_id)
        .bind(member_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(MemberRecord::try_from).transpose()
    }

    async fn count_members(
        &self,
        collection: CollectionId,
        status: MembershipStatus,
    ) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM memberships
            WHERE collection_kind = $1 AND collection_id = $2 AND status = $3
            "#,
        )
        .bind(collection.kind.as_str())
        .bind(collection.owner_id)
        .bind(status.as_str())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }
}
