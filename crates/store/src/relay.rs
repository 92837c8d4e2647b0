//! Outbox relay: delivers pending outbox messages to the messaging bus.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::Result;
use crate::outbox::{OutboxStatus, OutboxStore};
use crate::publisher::{EventEnvelope, EventPublisher};

/// Outcome of one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub delivered: usize,
    /// Failed this pass but still pending.
    pub retried: usize,
    /// Failed for the last time and dead-lettered.
    pub failed: usize,
}

pub struct OutboxRelay<S: OutboxStore> {
    store: Arc<S>,
    publisher: Arc<dyn EventPublisher>,
    batch_size: usize,
    max_attempts: u32,
}

impl<S: OutboxStore + 'static> OutboxRelay<S> {
    pub fn new(store: Arc<S>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            publisher,
            batch_size: 100,
            max_attempts: 5,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Publishes up to one batch of pending messages, oldest first.
    ///
    /// A publish failure never stops the batch; the message stays pending
    /// until it has failed `max_attempts` times.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<RelayReport> {
        let mut report = RelayReport::default();

        for message in self.store.pending(self.batch_size).await? {
            let envelope = EventEnvelope::from(&message);
            match self.publisher.publish(&envelope).await {
                Ok(()) => {
                    self.store.mark_delivered(message.id).await?;
                    metrics::counter!("outbox_delivered_total", "topic" => message.topic.clone())
                        .increment(1);
                    report.delivered += 1;
                }
                Err(e) => {
                    let status = self
                        .store
                        .record_failure(message.id, &e.to_string(), self.max_attempts)
                        .await?;
                    if status == OutboxStatus::Failed {
                        tracing::error!(id = %message.id, topic = %message.topic, error = %e, "Outbox message dead-lettered");
                        metrics::counter!("outbox_failed_total").increment(1);
                        report.failed += 1;
                    } else {
                        tracing::warn!(id = %message.id, topic = %message.topic, error = %e, "Outbox publish failed, will retry");
                        report.retried += 1;
                    }
                }
            }
        }

        if report.delivered + report.retried + report.failed > 0 {
            tracing::debug!(?report, "Outbox relay pass finished");
        }
        Ok(report)
    }

    /// Runs [`Self::run_once`] every `every` until `shutdown` flips to true.
    pub fn spawn(self, every: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            tracing::error!(error = %e, "Outbox relay pass failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            tracing::info!("Outbox relay stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::outbox::OutboxMessage;
    use crate::publisher::InMemoryPublisher;

    async fn seeded_store(count: usize) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..count {
            let message =
                OutboxMessage::new("checkout.started", &serde_json::json!({ "n": i })).unwrap();
            store.enqueue(message).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn delivers_pending_messages_once() {
        let store = seeded_store(3).await;
        let publisher = Arc::new(InMemoryPublisher::new());
        let relay = OutboxRelay::new(store.clone(), publisher.clone());

        let report = relay.run_once().await.unwrap();
        assert_eq!(report.delivered, 3);

        let second = relay.run_once().await.unwrap();
        assert_eq!(second, RelayReport::default());
        assert_eq!(publisher.published().await.len(), 3);
        assert!(store.pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn respects_batch_size() {
        let store = seeded_store(5).await;
        let publisher = Arc::new(InMemoryPublisher::new());
        let relay = OutboxRelay::new(store.clone(), publisher).with_batch_size(2);

        assert_eq!(relay.run_once().await.unwrap().delivered, 2);
        assert_eq!(store.pending(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn dead_letters_after_max_attempts() {
        let store = seeded_store(1).await;
        let publisher = Arc::new(InMemoryPublisher::new());
        publisher.set_fail(true).await;
        let relay = OutboxRelay::new(store.clone(), publisher.clone()).with_max_attempts(2);

        let first = relay.run_once().await.unwrap();
        assert_eq!(first.retried, 1);
        assert_eq!(store.pending(10).await.unwrap().len(), 1);

        let second = relay.run_once().await.unwrap();
        assert_eq!(second.failed, 1);
        assert!(store.pending(10).await.unwrap().is_empty());

        // Recovery of the broker does not resurrect dead letters.
        publisher.set_fail(false).await;
        assert_eq!(relay.run_once().await.unwrap(), RelayReport::default());
    }

    #[tokio::test]
    async fn spawned_relay_stops_on_shutdown() {
        let store = seeded_store(1).await;
        let publisher = Arc::new(InMemoryPublisher::new());
        let (tx, rx) = watch::channel(false);

        let handle = OutboxRelay::new(store, publisher.clone()).spawn(Duration::from_millis(10), rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(publisher.published().await.len(), 1);
    }
}
