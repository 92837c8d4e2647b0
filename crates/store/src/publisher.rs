//! Messaging-bus capability.
//!
//! The relay publishes every outbox message through an [`EventPublisher`].
//! The concrete publisher is chosen once at startup: NATS when a broker URL
//! is configured, otherwise a no-op that drops messages.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::outbox::OutboxMessage;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The wire form of a published message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub id: Uuid,
    pub topic: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl From<&OutboxMessage> for EventEnvelope {
    fn from(message: &OutboxMessage) -> Self {
        Self {
            id: message.id,
            topic: message.topic.clone(),
            occurred_at: message.created_at,
            payload: message.payload.clone(),
        }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError>;
}

/// Drops every message. Used when no broker is configured.
#[derive(Debug, Default, Clone)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError> {
        tracing::debug!(topic = %envelope.topic, id = %envelope.id, "No broker configured, dropping message");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryPublisherState {
    published: Vec<EventEnvelope>,
    fail: bool,
}

/// Records published envelopes in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPublisher {
    state: Arc<RwLock<InMemoryPublisherState>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent publish fail (for testing).
    pub async fn set_fail(&self, fail: bool) {
        self.state.write().await.fail = fail;
    }

    pub async fn published(&self) -> Vec<EventEnvelope> {
        self.state.read().await.published.clone()
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError> {
        let mut state = self.state.write().await;
        if state.fail {
            return Err(PublishError::Unavailable("simulated broker failure".to_string()));
        }
        state.published.push(envelope.clone());
        Ok(())
    }
}

/// Publishes envelopes as JSON on a NATS subject named after the topic.
#[derive(Clone)]
pub struct NatsPublisher {
    client: async_nats::Client,
}

impl NatsPublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }

    pub async fn connect(url: &str) -> Result<Self, PublishError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| PublishError::Unavailable(e.to_string()))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    #[tracing::instrument(skip(self, envelope), fields(topic = %envelope.topic))]
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError> {
        let body = serde_json::to_vec(envelope)?;
        self.client
            .publish(envelope.topic.clone(), body.into())
            .await
            .map_err(|e| PublishError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
