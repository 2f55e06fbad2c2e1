//! Durable work queue contract.
//!
//! The build worker lives outside this process. Everything it is asked to do
//! goes through a [`WorkQueue`] topic; it claims messages, works them, and
//! acknowledges them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// A message on a queue topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub claimed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Durably append a message to `topic`.
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<Uuid>;

    /// Claim the oldest unclaimed message on `topic`.
    async fn claim(&self, topic: &str, worker_id: &str) -> Result<Option<QueueMessage>>;

    /// Acknowledge a claimed message.
    async fn complete(&self, id: Uuid) -> Result<()>;

    /// Hand a claimed message back to the topic.
    async fn release(&self, id: Uuid) -> Result<()>;
}
