//! Build job repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_core::build::{BuildJob, BuildStatus, Transition};
use launchpad_core::{AppId, BuildId};
use sqlx::PgPool;

use crate::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct BuildRow {
    id: uuid::Uuid,
    app_id: uuid::Uuid,
    name: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BuildRow> for BuildJob {
    type Error = DbError;

    fn try_from(row: BuildRow) -> DbResult<Self> {
        Ok(BuildJob {
            id: BuildId::from_uuid(row.id),
            app_id: AppId::from_uuid(row.app_id),
            name: row.name,
            status: row.status.parse().map_err(DbError::InvalidData)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
pub trait BuildRepo: Send + Sync {
    async fn create(&self, job: &BuildJob) -> DbResult<()>;
    async fn get(&self, id: BuildId) -> DbResult<BuildJob>;
    async fn list_for_app(&self, app_id: AppId, limit: i64) -> DbResult<Vec<BuildJob>>;

    /// Move a job to `to` if that is a legal forward step from its current
    /// status. The check and the write are one conditional update.
    ///
    /// Returns [`Transition::Unchanged`] when the job is already in `to` and
    /// [`DbError::InvalidTransition`] for any other rejected step.
    async fn transition(&self, id: BuildId, to: BuildStatus) -> DbResult<Transition>;
}

/// PostgreSQL implementation of BuildRepo.
pub struct PgBuildRepo {
    pool: PgPool,
}

impl PgBuildRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildRepo for PgBuildRepo {
    async fn create(&self, job: &BuildJob) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO builds (id, app_id, name, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.app_id.as_uuid())
        .bind(&job.name)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: BuildId) -> DbResult<BuildJob> {
        sqlx::query_as::<_, BuildRow>("SELECT * FROM builds WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))?
            .try_into()
    }

    async fn list_for_app(&self, app_id: AppId, limit: i64) -> DbResult<Vec<BuildJob>> {
        sqlx::query_as::<_, BuildRow>(
            "SELECT * FROM builds WHERE app_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(app_id.as_uuid())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(BuildJob::try_from)
        .collect()
    }

    async fn transition(&self, id: BuildId, to: BuildStatus) -> DbResult<Transition> {
        let from: Vec<String> = BuildStatus::predecessors(to)
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let updated = sqlx::query_as::<_, BuildRow>(
            r#"
            UPDATE builds
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(to.as_str())
        .bind(&from)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return Ok(Transition::Applied(row.try_into()?));
        }

        let current = self.get(id).await?;
        if current.status == to {
            Ok(Transition::Unchanged(current))
        } else {
            Err(DbError::InvalidTransition {
                from: current.status,
                to,
            })
        }
    }
}
