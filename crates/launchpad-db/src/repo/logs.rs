//! Settled build log index.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_core::BuildId;
use launchpad_core::logs::{LogEntry, LogOrigin};
use sqlx::PgPool;

use crate::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct LogRow {
    build_id: uuid::Uuid,
    entry_id: String,
    timestamp: Option<DateTime<Utc>>,
    stream: String,
    content: String,
}

impl TryFrom<LogRow> for LogEntry {
    type Error = DbError;

    fn try_from(row: LogRow) -> DbResult<Self> {
        Ok(LogEntry {
            id: row.entry_id,
            build_id: BuildId::from_uuid(row.build_id),
            timestamp: row.timestamp,
            stream: row.stream.parse().map_err(DbError::InvalidData)?,
            content: row.content,
            origin: LogOrigin::History,
        })
    }
}

#[async_trait]
pub trait LogRepo: Send + Sync {
    /// Store entries. An entry re-sent with an id already stored replaces it.
    async fn append(&self, entries: &[LogEntry]) -> DbResult<()>;

    /// Every stored entry of a build, marked as history.
    async fn history(&self, build_id: BuildId) -> DbResult<Vec<LogEntry>>;
}

/// PostgreSQL implementation of LogRepo.
pub struct PgLogRepo {
    pool: PgPool,
}

impl PgLogRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LogRepo for PgLogRepo {
    async fn append(&self, entries: &[LogEntry]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO build_logs (build_id, entry_id, timestamp, stream, content)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (build_id, entry_id) DO UPDATE
                SET timestamp = EXCLUDED.timestamp,
                    stream = EXCLUDED.stream,
                    content = EXCLUDED.content
                "#,
            )
            .bind(entry.build_id.as_uuid())
            .bind(&entry.id)
            .bind(entry.timestamp)
            .bind(entry.stream.as_str())
            .bind(&entry.content)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn history(&self, build_id: BuildId) -> DbResult<Vec<LogEntry>> {
        sqlx::query_as::<_, LogRow>(
            r#"
            SELECT build_id, entry_id, timestamp, stream, content
            FROM build_logs WHERE build_id = $1
            ORDER BY timestamp ASC NULLS LAST, entry_id
            "#,
        )
        .bind(build_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(LogEntry::try_from)
        .collect()
    }
}
