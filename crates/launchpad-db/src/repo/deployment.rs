//! Deployment repository - SPA deployments and API route snapshots.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_core::deployment::{ApiDeployment, DeploymentStatus, SpaDeployment};
use launchpad_core::{AppId, ArtifactId, BuildId, DeploymentId};
use sqlx::PgPool;

use crate::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct SpaDeploymentRow {
    id: uuid::Uuid,
    app_id: uuid::Uuid,
    build_id: Option<uuid::Uuid>,
    artifact_id: uuid::Uuid,
    status: String,
    error: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SpaDeploymentRow> for SpaDeployment {
    type Error = DbError;

    fn try_from(row: SpaDeploymentRow) -> DbResult<Self> {
        Ok(SpaDeployment {
            id: DeploymentId::from_uuid(row.id),
            app_id: AppId::from_uuid(row.app_id),
            build_id: row.build_id.map(BuildId::from_uuid),
            artifact_id: ArtifactId::from_uuid(row.artifact_id),
            status: row.status.parse().map_err(DbError::InvalidData)?,
            error: row.error,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ApiDeploymentRow {
    id: uuid::Uuid,
    app_id: uuid::Uuid,
    status: String,
    snapshot: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<ApiDeploymentRow> for ApiDeployment {
    type Error = DbError;

    fn try_from(row: ApiDeploymentRow) -> DbResult<Self> {
        Ok(ApiDeployment {
            id: DeploymentId::from_uuid(row.id),
            app_id: AppId::from_uuid(row.app_id),
            status: row.status.parse().map_err(DbError::InvalidData)?,
            snapshot: serde_json::from_value(row.snapshot)?,
            created_at: row.created_at,
        })
    }
}

/// Deployments are append-only apart from their status. The artifact, build
/// and snapshot a deployment references never change after creation.
#[async_trait]
pub trait DeploymentRepo: Send + Sync {
    // SPA deployments
    async fn create_spa(&self, deployment: &SpaDeployment) -> DbResult<()>;
    async fn set_spa_status(
        &self,
        id: DeploymentId,
        status: DeploymentStatus,
        error: Option<&str>,
    ) -> DbResult<SpaDeployment>;
    async fn get_spa(&self, app_id: AppId, id: DeploymentId) -> DbResult<SpaDeployment>;
    async fn list_spa(&self, app_id: AppId) -> DbResult<Vec<SpaDeployment>>;

    // API snapshots
    async fn create_api(&self, deployment: &ApiDeployment) -> DbResult<()>;
    async fn get_api(&self, app_id: AppId, id: DeploymentId) -> DbResult<ApiDeployment>;
    async fn list_api(&self, app_id: AppId) -> DbResult<Vec<ApiDeployment>>;
}

/// PostgreSQL implementation of DeploymentRepo.
pub struct PgDeploymentRepo {
    pool: PgPool,
}

impl PgDeploymentRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeploymentRepo for PgDeploymentRepo {
    async fn create_spa(&self, deployment: &SpaDeployment) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO spa_deployments (id, app_id, build_id, artifact_id, status, error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(deployment.id.as_uuid())
        .bind(deployment.app_id.as_uuid())
        .bind(deployment.build_id.map(|b| *b.as_uuid()))
        .bind(deployment.artifact_id.as_uuid())
        .bind(deployment.status.as_str())
        .bind(&deployment.error)
        .bind(deployment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_spa_status(
        &self,
        id: DeploymentId,
        status: DeploymentStatus,
        error: Option<&str>,
    ) -> DbResult<SpaDeployment> {
        sqlx::query_as::<_, SpaDeploymentRow>(
            "UPDATE spa_deployments SET status = $2, error = $3 WHERE id = $1 RETURNING *",
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(error)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("deployment {}", id)))?
        .try_into()
    }

    async fn get_spa(&self, app_id: AppId, id: DeploymentId) -> DbResult<SpaDeployment> {
        sqlx::query_as::<_, SpaDeploymentRow>(
            "SELECT * FROM spa_deployments WHERE id = $1 AND app_id = $2",
        )
        .bind(id.as_uuid())
        .bind(app_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("deployment {}", id)))?
        .try_into()
    }

    async fn list_spa(&self, app_id: AppId) -> DbResult<Vec<SpaDeployment>> {
        sqlx::query_as::<_, SpaDeploymentRow>(
            "SELECT * FROM spa_deployments WHERE app_id = $1 ORDER BY created_at DESC",
        )
        .bind(app_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(SpaDeployment::try_from)
        .collect()
    }

    async fn create_api(&self, deployment: &ApiDeployment) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO api_deployments (id, app_id, status, snapshot, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(deployment.id.as_uuid())
        .bind(deployment.app_id.as_uuid())
        .bind(deployment.status.as_str())
        .bind(serde_json::to_value(&deployment.snapshot)?)
        .bind(deployment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_api(&self, app_id: AppId, id: DeploymentId) -> DbResult<ApiDeployment> {
        sqlx::query_as::<_, ApiDeploymentRow>(
            "SELECT * FROM api_deployments WHERE id = $1 AND app_id = $2",
        )
        .bind(id.as_uuid())
        .bind(app_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("deployment {}", id)))?
        .try_into()
    }

    async fn list_api(&self, app_id: AppId) -> DbResult<Vec<ApiDeployment>> {
        sqlx::query_as::<_, ApiDeploymentRow>(
            "SELECT * FROM api_deployments WHERE app_id = $1 ORDER BY created_at DESC",
        )
        .bind(app_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ApiDeployment::try_from)
        .collect()
    }
}
