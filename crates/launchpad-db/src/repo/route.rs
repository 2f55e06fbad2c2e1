//! Live route configuration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_core::route::Route;
use launchpad_core::{AppId, RouteId};
use sqlx::PgPool;

use crate::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct RouteRow {
    id: uuid::Uuid,
    app_id: uuid::Uuid,
    matcher: serde_json::Value,
    target: serde_json::Value,
    priority: i32,
    enabled: bool,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RouteRow> for Route {
    type Error = DbError;

    fn try_from(row: RouteRow) -> DbResult<Self> {
        Ok(Route {
            id: RouteId::from_uuid(row.id),
            app_id: AppId::from_uuid(row.app_id),
            matcher: serde_json::from_value(row.matcher)?,
            target: serde_json::from_value(row.target)?,
            priority: row.priority,
            enabled: row.enabled,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
pub trait RouteRepo: Send + Sync {
    /// All routes of an app in insertion order.
    async fn list(&self, app_id: AppId) -> DbResult<Vec<Route>>;

    /// Enabled routes of an app in insertion order.
    async fn list_enabled(&self, app_id: AppId) -> DbResult<Vec<Route>>;

    /// Insert a route or replace the one with the same id.
    async fn upsert(&self, route: &Route) -> DbResult<()>;
}

/// PostgreSQL implementation of RouteRepo.
pub struct PgRouteRepo {
    pool: PgPool,
}

impl PgRouteRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RouteRepo for PgRouteRepo {
    async fn list(&self, app_id: AppId) -> DbResult<Vec<Route>> {
        sqlx::query_as::<_, RouteRow>(
            r#"
            SELECT id, app_id, matcher, target, priority, enabled, updated_at
            FROM routes WHERE app_id = $1 ORDER BY position
            "#,
        )
        .bind(app_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Route::try_from)
        .collect()
    }

    async fn list_enabled(&self, app_id: AppId) -> DbResult<Vec<Route>> {
        sqlx::query_as::<_, RouteRow>(
            r#"
            SELECT id, app_id, matcher, target, priority, enabled, updated_at
            FROM routes WHERE app_id = $1 AND enabled ORDER BY position
            "#,
        )
        .bind(app_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Route::try_from)
        .collect()
    }

    async fn upsert(&self, route: &Route) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO routes (id, app_id, matcher, target, priority, enabled, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET matcher = EXCLUDED.matcher,
                target = EXCLUDED.target,
                priority = EXCLUDED.priority,
                enabled = EXCLUDED.enabled,
                updated_at = EXCLUDED.updated_at
            WHERE routes.app_id = EXCLUDED.app_id
            "#,
        )
        .bind(route.id.as_uuid())
        .bind(route.app_id.as_uuid())
        .bind(serde_json::to_value(&route.matcher)?)
        .bind(serde_json::to_value(&route.target)?)
        .bind(route.priority)
        .bind(route.enabled)
        .bind(route.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::Conflict(format!(
                "route {} belongs to another app",
                route.id
            )));
        }
        Ok(())
    }
}
