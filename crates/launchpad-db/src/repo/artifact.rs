//! Artifact repository - content-addressed artifacts and build links.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_core::artifact::{Artifact, ArtifactRole, BlobKey, BuildArtifact, ContentHash};
use launchpad_core::{AppId, ArtifactId, BuildId};
use sqlx::PgPool;

use crate::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct ArtifactRow {
    id: uuid::Uuid,
    app_id: uuid::Uuid,
    content_hash: String,
    size_bytes: i64,
    storage_key: String,
    compression_format: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ArtifactRow> for Artifact {
    type Error = DbError;

    fn try_from(row: ArtifactRow) -> DbResult<Self> {
        Ok(Artifact {
            id: ArtifactId::from_uuid(row.id),
            app_id: AppId::from_uuid(row.app_id),
            content_hash: ContentHash::parse(&row.content_hash)
                .map_err(|e| DbError::InvalidData(e.to_string()))?,
            size_bytes: u64::try_from(row.size_bytes)
                .map_err(|_| DbError::InvalidData(format!("negative size {}", row.size_bytes)))?,
            storage_key: BlobKey::new(row.storage_key),
            compression_format: row
                .compression_format
                .parse()
                .map_err(DbError::InvalidData)?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BuildArtifactRow {
    build_id: uuid::Uuid,
    artifact_id: uuid::Uuid,
    role: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<BuildArtifactRow> for BuildArtifact {
    type Error = DbError;

    fn try_from(row: BuildArtifactRow) -> DbResult<Self> {
        Ok(BuildArtifact {
            build_id: BuildId::from_uuid(row.build_id),
            artifact_id: ArtifactId::from_uuid(row.artifact_id),
            role: row.role.parse().map_err(DbError::InvalidData)?,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
pub trait ArtifactRepo: Send + Sync {
    async fn get(&self, id: ArtifactId) -> DbResult<Artifact>;

    async fn find_by_hash(&self, app_id: AppId, hash: &ContentHash)
    -> DbResult<Option<Artifact>>;

    /// Insert an artifact unless one with the same (app, hash) exists.
    ///
    /// Returns whichever row holds the (app, hash) slot afterwards; callers
    /// compare ids to learn whether theirs won.
    async fn insert(&self, artifact: &Artifact) -> DbResult<Artifact>;

    /// Link a build to an artifact. Re-linking the same pair is a no-op;
    /// linking the build to a different artifact for the same role is a
    /// conflict.
    async fn link(&self, link: &BuildArtifact) -> DbResult<BuildArtifact>;

    async fn find_for_build(
        &self,
        build_id: BuildId,
        role: ArtifactRole,
    ) -> DbResult<Option<Artifact>>;

    async fn links_for_artifact(&self, artifact_id: ArtifactId) -> DbResult<Vec<BuildArtifact>>;

    /// Delete an artifact row no build links to. Returns whether it was
    /// removed.
    async fn delete_unlinked(&self, id: ArtifactId) -> DbResult<bool>;
}

/// PostgreSQL implementation of ArtifactRepo.
pub struct PgArtifactRepo {
    pool: PgPool,
}

impl PgArtifactRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtifactRepo for PgArtifactRepo {
    async fn get(&self, id: ArtifactId) -> DbResult<Artifact> {
        sqlx::query_as::<_, ArtifactRow>("SELECT * FROM artifacts WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("artifact {}", id)))?
            .try_into()
    }

    async fn find_by_hash(
        &self,
        app_id: AppId,
        hash: &ContentHash,
    ) -> DbResult<Option<Artifact>> {
        sqlx::query_as::<_, ArtifactRow>(
            "SELECT * FROM artifacts WHERE app_id = $1 AND content_hash = $2",
        )
        .bind(app_id.as_uuid())
        .bind(hash.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(Artifact::try_from)
        .transpose()
    }

    async fn insert(&self, artifact: &Artifact) -> DbResult<Artifact> {
        let size = i64::try_from(artifact.size_bytes)
            .map_err(|_| DbError::InvalidData(format!("size {} too large", artifact.size_bytes)))?;

        let inserted = sqlx::query_as::<_, ArtifactRow>(
            r#"
            INSERT INTO artifacts (id, app_id, content_hash, size_bytes, storage_key,
                                   compression_format, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (app_id, content_hash) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(artifact.id.as_uuid())
        .bind(artifact.app_id.as_uuid())
        .bind(artifact.content_hash.as_str())
        .bind(size)
        .bind(artifact.storage_key.as_str())
        .bind(artifact.compression_format.as_str())
        .bind(artifact.created_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => row.try_into(),
            None => self
                .find_by_hash(artifact.app_id, &artifact.content_hash)
                .await?
                .ok_or_else(|| {
                    DbError::NotFound(format!("artifact {}", artifact.content_hash))
                }),
        }
    }

    async fn link(&self, link: &BuildArtifact) -> DbResult<BuildArtifact> {
        sqlx::query(
            r#"
            INSERT INTO build_artifacts (build_id, artifact_id, role, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (build_id, role) DO NOTHING
            "#,
        )
        .bind(link.build_id.as_uuid())
        .bind(link.artifact_id.as_uuid())
        .bind(link.role.as_str())
        .bind(link.created_at)
        .execute(&self.pool)
        .await?;

        let stored: BuildArtifact = sqlx::query_as::<_, BuildArtifactRow>(
            "SELECT * FROM build_artifacts WHERE build_id = $1 AND role = $2",
        )
        .bind(link.build_id.as_uuid())
        .bind(link.role.as_str())
        .fetch_one(&self.pool)
        .await?
        .try_into()?;

        if stored.artifact_id != link.artifact_id {
            return Err(DbError::Conflict(format!(
                "build {} already produced artifact {}",
                link.build_id, stored.artifact_id
            )));
        }
        Ok(stored)
    }

    async fn find_for_build(
        &self,
        build_id: BuildId,
        role: ArtifactRole,
    ) -> DbResult<Option<Artifact>> {
        sqlx::query_as::<_, ArtifactRow>(
            r#"
            SELECT a.* FROM artifacts a
            JOIN build_artifacts ba ON ba.artifact_id = a.id
            WHERE ba.build_id = $1 AND ba.role = $2
            "#,
        )
        .bind(build_id.as_uuid())
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(Artifact::try_from)
        .transpose()
    }

    async fn links_for_artifact(&self, artifact_id: ArtifactId) -> DbResult<Vec<BuildArtifact>> {
        sqlx::query_as::<_, BuildArtifactRow>(
            "SELECT * FROM build_artifacts WHERE artifact_id = $1 ORDER BY created_at",
        )
        .bind(artifact_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(BuildArtifact::try_from)
        .collect()
    }

    async fn delete_unlinked(&self, id: ArtifactId) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM artifacts
            WHERE id = $1
              AND NOT EXISTS (SELECT 1 FROM build_artifacts WHERE artifact_id = $1)
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
