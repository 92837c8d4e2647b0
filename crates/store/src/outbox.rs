//! Transactional outbox.
//!
//! Messages are written in the same atomic operation as the state change they
//! describe and delivered later by [`crate::OutboxRelay`], at least once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// Delivery status of an outbox message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OutboxStatus {
    #[default]
    Pending,
    Delivered,
    /// Gave up after the relay's maximum attempts.
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Delivered => "delivered",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxStatus::Pending),
            "delivered" => Some(OutboxStatus::Delivered),
            "failed" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

/// A message waiting to be published on the messaging bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OutboxMessage {
    /// Creates a pending message with a JSON payload.
    pub fn new(topic: impl Into<String>, payload: &impl Serialize) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload: serde_json::to_value(payload)?,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
        })
    }
}

/// Storage side of the outbox.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Enqueues a message on its own, outside any other state change.
    async fn enqueue(&self, message: OutboxMessage) -> Result<()>;

    /// Oldest pending messages, at most `limit`.
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxMessage>>;

    async fn mark_delivered(&self, id: Uuid) -> Result<()>;

    /// Records a failed delivery attempt.
    ///
    /// Once `attempts` reaches `max_attempts` the message becomes `Failed`.
    /// Returns the status after the update.
    async fn record_failure(&self, id: Uuid, error: &str, max_attempts: u32)
    -> Result<OutboxStatus>;
}
