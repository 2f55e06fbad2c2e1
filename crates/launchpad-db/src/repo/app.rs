//! App repository - linked repository, build config, env vars, active pointers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_core::app::{App, BuildConfig, EnvVar, LinkedRepository};
use launchpad_core::deployment::DeploymentKind;
use launchpad_core::{AppId, DeploymentId};
use sqlx::PgPool;

use crate::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct AppRow {
    id: uuid::Uuid,
    name: String,
    plan: String,
    repo_provider: Option<String>,
    repo_owner: Option<String>,
    repo_name: Option<String>,
    installation_id: Option<i64>,
    build_config: Option<serde_json::Value>,
    active_spa_deployment_id: Option<uuid::Uuid>,
    active_api_deployment_id: Option<uuid::Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct EnvVarRow {
    key: String,
    value: String,
    target: String,
}

impl TryFrom<EnvVarRow> for EnvVar {
    type Error = DbError;

    fn try_from(row: EnvVarRow) -> DbResult<Self> {
        let target = row.target.parse().map_err(DbError::InvalidData)?;
        Ok(EnvVar {
            key: row.key,
            value: row.value,
            target,
        })
    }
}

impl AppRow {
    fn into_app(self, env: Vec<EnvVar>) -> DbResult<App> {
        let repository = match (self.repo_provider, self.repo_owner, self.repo_name) {
            (Some(provider), Some(owner), Some(name)) => Some(LinkedRepository {
                provider: provider.parse().map_err(DbError::InvalidData)?,
                owner,
                name,
                installation_id: self.installation_id,
            }),
            _ => None,
        };
        let build_config = self
            .build_config
            .map(serde_json::from_value::<BuildConfig>)
            .transpose()?;

        Ok(App {
            id: AppId::from_uuid(self.id),
            name: self.name,
            plan: self.plan,
            repository,
            build_config,
            env,
            active_spa_deployment_id: self.active_spa_deployment_id.map(DeploymentId::from_uuid),
            active_api_deployment_id: self.active_api_deployment_id.map(DeploymentId::from_uuid),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[async_trait]
pub trait AppRepo: Send + Sync {
    async fn get(&self, id: AppId) -> DbResult<App>;
    async fn create(&self, app: &App) -> DbResult<()>;

    /// Point the app's `kind` deployment at `deployment_id` in one atomic
    /// store operation, returning the previous value.
    async fn swap_active(
        &self,
        app_id: AppId,
        kind: DeploymentKind,
        deployment_id: DeploymentId,
    ) -> DbResult<Option<DeploymentId>>;
}

/// PostgreSQL implementation of AppRepo.
pub struct PgAppRepo {
    pool: PgPool,
}

impl PgAppRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn pointer_column(kind: DeploymentKind) -> &'static str {
    match kind {
        DeploymentKind::Spa => "active_spa_deployment_id",
        DeploymentKind::Api => "active_api_deployment_id",
    }
}

#[async_trait]
impl AppRepo for PgAppRepo {
    async fn get(&self, id: AppId) -> DbResult<App> {
        let row = sqlx::query_as::<_, AppRow>("SELECT * FROM apps WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("app {}", id)))?;

        let env = sqlx::query_as::<_, EnvVarRow>(
            "SELECT key, value, target FROM app_env_vars WHERE app_id = $1 ORDER BY key",
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(EnvVar::try_from)
        .collect::<DbResult<Vec<_>>>()?;

        row.into_app(env)
    }

    async fn create(&self, app: &App) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let build_config = app
            .build_config
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let repo = app.repository.as_ref();

        sqlx::query(
            r#"
            INSERT INTO apps (id, name, plan, repo_provider, repo_owner, repo_name,
                              installation_id, build_config, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(app.id.as_uuid())
        .bind(&app.name)
        .bind(&app.plan)
        .bind(repo.map(|r| r.provider.to_string()))
        .bind(repo.map(|r| r.owner.clone()))
        .bind(repo.map(|r| r.name.clone()))
        .bind(repo.and_then(|r| r.installation_id))
        .bind(build_config)
        .bind(app.created_at)
        .bind(app.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DbError::Duplicate(format!("app {}", app.id))
            }
            _ => DbError::Database(e),
        })?;

        for var in &app.env {
            sqlx::query(
                "INSERT INTO app_env_vars (app_id, key, value, target) VALUES ($1, $2, $3, $4)",
            )
            .bind(app.id.as_uuid())
            .bind(&var.key)
            .bind(&var.value)
            .bind(var.target.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn swap_active(
        &self,
        app_id: AppId,
        kind: DeploymentKind,
        deployment_id: DeploymentId,
    ) -> DbResult<Option<DeploymentId>> {
        let column = pointer_column(kind);
        // The locked subquery reads the old value inside the same statement
        // that writes the new one.
        let sql = format!(
            r#"
            UPDATE apps a
            SET {column} = $2, updated_at = NOW()
            FROM (SELECT id, {column} AS previous FROM apps WHERE id = $1 FOR UPDATE) old
            WHERE a.id = old.id
            RETURNING old.previous
            "#
        );

        let previous: Option<Option<uuid::Uuid>> = sqlx::query_scalar(&sql)
            .bind(app_id.as_uuid())
            .bind(deployment_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        previous
            .map(|p| p.map(DeploymentId::from_uuid))
            .ok_or_else(|| DbError::NotFound(format!("app {}", app_id)))
    }
}
