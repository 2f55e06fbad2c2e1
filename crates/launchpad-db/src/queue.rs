//! Work queue implementation using PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_core::queue::{QueueMessage, WorkQueue};
use sqlx::PgPool;

use crate::DbError;

#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: uuid::Uuid,
    topic: String,
    payload: serde_json::Value,
    claimed_by: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<QueueRow> for QueueMessage {
    fn from(row: QueueRow) -> Self {
        QueueMessage {
            id: row.id,
            topic: row.topic,
            payload: row.payload,
            claimed_by: row.claimed_by,
            created_at: row.created_at,
        }
    }
}

fn queue_error(err: sqlx::Error) -> launchpad_core::Error {
    launchpad_core::Error::Queue(DbError::from(err).to_string())
}

/// Work queue backed by PostgreSQL.
pub struct PgWorkQueue {
    pool: PgPool,
}

impl PgWorkQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkQueue for PgWorkQueue {
    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> launchpad_core::Result<uuid::Uuid> {
        let id = uuid::Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO work_queue (id, topic, payload, status, created_at)
            VALUES ($1, $2, $3, 'pending', NOW())
            "#,
        )
        .bind(id)
        .bind(topic)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(queue_error)?;

        tracing::debug!(message_id = %id, topic, "Published queue message");
        Ok(id)
    }

    /// Uses SKIP LOCKED so concurrent workers never claim the same message.
    async fn claim(
        &self,
        topic: &str,
        worker_id: &str,
    ) -> launchpad_core::Result<Option<QueueMessage>> {
        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            UPDATE work_queue
            SET status = 'claimed', claimed_by = $2, claimed_at = NOW()
            WHERE id = (
                SELECT id FROM work_queue
                WHERE topic = $1 AND status = 'pending'
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, topic, payload, claimed_by, created_at
            "#,
        )
        .bind(topic)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(queue_error)?;
        Ok(row.map(QueueMessage::from))
    }

    async fn complete(&self, id: uuid::Uuid) -> launchpad_core::Result<()> {
        sqlx::query("UPDATE work_queue SET status = 'completed' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(queue_error)?;
        Ok(())
    }

    async fn release(&self, id: uuid::Uuid) -> launchpad_core::Result<()> {
        sqlx::query(
            "UPDATE work_queue SET status = 'pending', claimed_by = NULL, claimed_at = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(queue_error)?;
        Ok(())
    }
}
