use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CheckoutId, ReservationId, SkuKey};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::outbox::{OutboxMessage, OutboxStatus, OutboxStore};
use crate::reservation::{Reservation, ReservationStatus, ReservationStore, StockLevels};
use crate::saga_log::{SagaLog, SagaLogEntry, Version};
use crate::{Result, StoreError};

#[derive(Default)]
struct State {
    reservations: HashMap<ReservationId, Reservation>,
    counters: HashMap<SkuKey, i64>,
    outbox: Vec<OutboxMessage>,
    checkouts: HashMap<CheckoutId, Vec<SagaLogEntry>>,
}

impl State {
    /// Subtracts each quantity from its counter, clamping at zero and
    /// dropping keys that end up at zero or below.
    fn release_counters(&mut self, reservation: &Reservation) {
        for (sku, quantity) in reservation.quantities_by_sku() {
            if let Some(counter) = self.counters.get_mut(&sku) {
                *counter = (*counter - quantity).max(0);
                if *counter <= 0 {
                    self.counters.remove(&sku);
                }
            }
        }
    }
}

/// In-memory store implementation for tests and the demo server.
///
/// All state sits behind one lock, so each trait method is atomic with
/// respect to every other.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored reservation records, expired ones included.
    pub async fn reservation_count(&self) -> usize {
        self.state.read().await.reservations.len()
    }

    /// Overwrites a counter value, bypassing the reservation bookkeeping.
    pub async fn set_counter(&self, sku: SkuKey, value: i64) {
        self.state.write().await.counters.insert(sku, value);
    }

    /// Raw counter lookup; `None` when the key does not exist.
    pub async fn counter(&self, sku: &SkuKey) -> Option<i64> {
        self.state.read().await.counters.get(sku).copied()
    }

    /// Every outbox message in enqueue order, whatever its status.
    pub async fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.state.read().await.outbox.clone()
    }

    /// Ids of every checkout stream, in no particular order.
    pub async fn checkout_ids(&self) -> Vec<CheckoutId> {
        self.state.read().await.checkouts.keys().copied().collect()
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn insert_reservation(
        &self,
        reservation: &Reservation,
        stock: &StockLevels,
        outbox: Vec<OutboxMessage>,
    ) -> Result<()> {
        let mut state = self.state.write().await;

        if state.reservations.contains_key(&reservation.id) {
            return Err(StoreError::DuplicateReservation(reservation.id.to_string()));
        }

        let quantities = reservation.quantities_by_sku();
        for (sku, requested) in &quantities {
            let held = state.counters.get(sku).copied().unwrap_or(0);
            let available = stock.get(sku).copied().unwrap_or(0) - held;
            if available < *requested {
                return Err(StoreError::InsufficientStock {
                    sku: sku.clone(),
                    requested: *requested,
                    available: available.max(0),
                });
            }
        }

        for (sku, requested) in quantities {
            *state.counters.entry(sku).or_insert(0) += requested;
        }
        state
            .reservations
            .insert(reservation.id, reservation.clone());
        state.outbox.extend(outbox);

        Ok(())
    }

    async fn get_reservation(
        &self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        let state = self.state.read().await;
        Ok(state
            .reservations
            .get(&id)
            .filter(|r| r.is_live(now))
            .cloned())
    }

    async fn claim_reservation(
        &self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        let mut state = self.state.write().await;
        match state.reservations.get_mut(&id) {
            Some(r) if r.status == ReservationStatus::Held && r.is_live(now) => {
                r.status = ReservationStatus::Committing;
                Ok(Some(r.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn remove_reservation(
        &self,
        id: ReservationId,
        expected: ReservationStatus,
        now: DateTime<Utc>,
        outbox: Vec<OutboxMessage>,
    ) -> Result<Option<Reservation>> {
        let mut state = self.state.write().await;

        let removable = match state.reservations.get(&id) {
            Some(r) if r.status == expected => match expected {
                ReservationStatus::Held => r.is_live(now),
                ReservationStatus::Committing => true,
            },
            _ => false,
        };
        if !removable {
            return Ok(None);
        }

        let Some(reservation) = state.reservations.remove(&id) else {
            return Ok(None);
        };
        state.release_counters(&reservation);
        state.outbox.extend(outbox);

        Ok(Some(reservation))
    }

    async fn reserved_quantity(&self, sku: &SkuKey) -> Result<i64> {
        Ok(self
            .state
            .read()
            .await
            .counters
            .get(sku)
            .copied()
            .unwrap_or(0))
    }

    async fn counters(&self) -> Result<Vec<(SkuKey, i64)>> {
        let state = self.state.read().await;
        let mut counters: Vec<_> = state
            .counters
            .iter()
            .map(|(sku, value)| (sku.clone(), *value))
            .collect();
        counters.sort();
        Ok(counters)
    }

    async fn delete_counter_if_non_positive(&self, sku: &SkuKey) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.counters.get(sku) {
            Some(value) if *value <= 0 => {
                state.counters.remove(sku);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reclaim_expired(
        &self,
        now: DateTime<Utc>,
        notice: &(dyn for<'r> Fn(&'r Reservation) -> Result<OutboxMessage> + Send + Sync),
    ) -> Result<Vec<Reservation>> {
        let mut state = self.state.write().await;

        let mut expired: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.is_reclaimable(now))
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.expires_at);

        // Build every notice before mutating so a failure leaves state intact.
        let notices = expired
            .iter()
            .map(|r| notice(r))
            .collect::<Result<Vec<_>>>()?;

        for reservation in &expired {
            state.reservations.remove(&reservation.id);
            state.release_counters(reservation);
        }
        state.outbox.extend(notices);

        Ok(expired)
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn enqueue(&self, message: OutboxMessage) -> Result<()> {
        self.state.write().await.outbox.push(message);
        Ok(())
    }

    async fn pending(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|m| m.status == OutboxStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(message) = state.outbox.iter_mut().find(|m| m.id == id) {
            message.status = OutboxStatus::Delivered;
            message.attempts += 1;
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        max_attempts: u32,
    ) -> Result<OutboxStatus> {
        let mut state = self.state.write().await;
        let Some(message) = state.outbox.iter_mut().find(|m| m.id == id) else {
            return Err(StoreError::Corrupt(format!("unknown outbox message {id}")));
        };
        message.attempts += 1;
        message.last_error = Some(error.to_string());
        if message.attempts >= max_attempts {
            message.status = OutboxStatus::Failed;
        }
        Ok(message.status)
    }
}

#[async_trait]
impl SagaLog for InMemoryStore {
    async fn append(&self, entry: SagaLogEntry, expected: Version) -> Result<Version> {
        let mut state = self.state.write().await;
        let checkout_id = entry.checkout_id;
        let stream = state.checkouts.entry(checkout_id).or_default();

        let actual = stream
            .last()
            .map(|e| e.version)
            .unwrap_or(Version::initial());
        if actual != expected || entry.version != expected.next() {
            return Err(StoreError::ConcurrencyConflict {
                checkout_id,
                expected,
                actual,
            });
        }

        let version = entry.version;
        stream.push(entry);
        Ok(version)
    }

    async fn load(&self, checkout_id: CheckoutId) -> Result<Vec<SagaLogEntry>> {
        Ok(self
            .state
            .read()
            .await
            .checkouts
            .get(&checkout_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn open_checkouts(&self, idle_since: DateTime<Utc>) -> Result<Vec<CheckoutId>> {
        let state = self.state.read().await;
        let mut open: Vec<(DateTime<Utc>, CheckoutId)> = state
            .checkouts
            .iter()
            .filter_map(|(id, stream)| {
                let last = stream.last()?;
                (!last.terminal && last.recorded_at <= idle_since).then_some((last.recorded_at, *id))
            })
            .collect();
        open.sort();
        Ok(open.into_iter().map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use common::VariantId;

    use super::*;
    use crate::reservation::ReservationItem;

    fn sku(product: &str) -> SkuKey {
        SkuKey::new(product, None)
    }

    fn hold(product: &str, quantity: u32, ttl_secs: i64) -> Reservation {
        Reservation::new(
            vec![ReservationItem::new(product, None, quantity)],
            Utc::now(),
            Duration::seconds(ttl_secs),
        )
    }

    fn stock(entries: &[(&str, i64)]) -> StockLevels {
        entries.iter().map(|(p, s)| (sku(p), *s)).collect()
    }

    fn notice(r: &Reservation) -> Result<OutboxMessage> {
        OutboxMessage::new("inventory.expired", &r.id)
    }

    #[tokio::test]
    async fn test_insert_increments_counters() {
        let store = InMemoryStore::new();
        let r = hold("p1", 4, 60);

        store
            .insert_reservation(&r, &stock(&[("p1", 10)]), vec![])
            .await
            .unwrap();

        assert_eq!(store.reserved_quantity(&sku("p1")).await.unwrap(), 4);
        assert_eq!(store.reservation_count().await, 1);
    }

    #[tokio::test]
    async fn test_insert_is_all_or_nothing() {
        let store = InMemoryStore::new();
        let r = Reservation::new(
            vec![
                ReservationItem::new("p1", None, 1),
                ReservationItem::new("p2", Some(VariantId::new("xl")), 5),
            ],
            Utc::now(),
            Duration::seconds(60),
        );
        let levels: StockLevels = [
            (sku("p1"), 10),
            (SkuKey::new("p2", Some(VariantId::new("xl"))), 4),
        ]
        .into_iter()
        .collect();

        let err = store
            .insert_reservation(&r, &levels, vec![])
            .await
            .unwrap_err();

        match err {
            StoreError::InsufficientStock {
                sku,
                requested,
                available,
            } => {
                assert_eq!(sku.counter_key(), "p2:xl");
                assert_eq!(requested, 5);
                assert_eq!(available, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.counter(&sku("p1")).await, None);
        assert_eq!(store.reservation_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_stock_entry_reads_as_zero() {
        let store = InMemoryStore::new();
        let err = store
            .insert_reservation(&hold("ghost", 1, 60), &StockLevels::new(), vec![])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientStock { available: 0, .. }
        ));
    }

    #[tokio::test]
    async fn test_remove_releases_and_deletes_counter() {
        let store = InMemoryStore::new();
        let r = hold("p1", 3, 60);
        store
            .insert_reservation(&r, &stock(&[("p1", 5)]), vec![])
            .await
            .unwrap();

        let outbox = vec![OutboxMessage::new("inventory.released", &r.id).unwrap()];
        let removed = store
            .remove_reservation(r.id, ReservationStatus::Held, Utc::now(), outbox)
            .await
            .unwrap();

        assert_eq!(removed.map(|r| r.id), Some(r.id));
        assert_eq!(store.counter(&sku("p1")).await, None);
        assert_eq!(store.outbox_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_clamps_drifted_counter() {
        let store = InMemoryStore::new();
        let r = hold("p1", 3, 60);
        store
            .insert_reservation(&r, &stock(&[("p1", 5)]), vec![])
            .await
            .unwrap();
        store.set_counter(sku("p1"), 1).await;

        store
            .remove_reservation(r.id, ReservationStatus::Held, Utc::now(), vec![])
            .await
            .unwrap();

        assert_eq!(store.counter(&sku("p1")).await, None);
    }

    #[tokio::test]
    async fn test_remove_requires_expected_status() {
        let store = InMemoryStore::new();
        let r = hold("p1", 1, 60);
        store
            .insert_reservation(&r, &stock(&[("p1", 5)]), vec![])
            .await
            .unwrap();

        let claimed = store.claim_reservation(r.id, Utc::now()).await.unwrap();
        assert!(claimed.is_some());
        assert!(
            store
                .claim_reservation(r.id, Utc::now())
                .await
                .unwrap()
                .is_none()
        );

        let as_held = store
            .remove_reservation(r.id, ReservationStatus::Held, Utc::now(), vec![])
            .await
            .unwrap();
        assert!(as_held.is_none());

        let as_committing = store
            .remove_reservation(r.id, ReservationStatus::Committing, Utc::now(), vec![])
            .await
            .unwrap();
        assert!(as_committing.is_some());
    }

    #[tokio::test]
    async fn test_expired_reservation_is_invisible_but_holds_counter() {
        let store = InMemoryStore::new();
        let r = hold("p1", 2, 0);
        store
            .insert_reservation(&r, &stock(&[("p1", 5)]), vec![])
            .await
            .unwrap();

        assert!(
            store
                .get_reservation(r.id, Utc::now())
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.reserved_quantity(&sku("p1")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reclaim_expired_releases_counters() {
        let store = InMemoryStore::new();
        let expired = hold("p1", 2, 0);
        let live = hold("p1", 1, 600);
        let levels = stock(&[("p1", 5)]);
        store
            .insert_reservation(&expired, &levels, vec![])
            .await
            .unwrap();
        store
            .insert_reservation(&live, &levels, vec![])
            .await
            .unwrap();

        let reclaimed = store.reclaim_expired(Utc::now(), &notice).await.unwrap();

        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, expired.id);
        assert_eq!(store.reserved_quantity(&sku("p1")).await.unwrap(), 1);
        let messages = store.outbox_messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "inventory.expired");
    }

    #[tokio::test]
    async fn test_delete_counter_only_when_non_positive() {
        let store = InMemoryStore::new();
        store.set_counter(sku("a"), 0).await;
        store.set_counter(sku("c"), 5).await;

        assert!(store.delete_counter_if_non_positive(&sku("a")).await.unwrap());
        assert!(!store.delete_counter_if_non_positive(&sku("c")).await.unwrap());
        assert!(!store.delete_counter_if_non_positive(&sku("zz")).await.unwrap());
        assert_eq!(store.counter(&sku("c")).await, Some(5));
    }

    #[tokio::test]
    async fn test_outbox_failure_dead_letters_after_max_attempts() {
        let store = InMemoryStore::new();
        let message = OutboxMessage::new("checkout.started", &"x").unwrap();
        let id = message.id;
        store.enqueue(message).await.unwrap();

        assert_eq!(
            store.record_failure(id, "bus down", 2).await.unwrap(),
            OutboxStatus::Pending
        );
        assert_eq!(store.pending(10).await.unwrap().len(), 1);
        assert_eq!(
            store.record_failure(id, "bus down", 2).await.unwrap(),
            OutboxStatus::Failed
        );
        assert!(store.pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_saga_log_optimistic_append() {
        let store = InMemoryStore::new();
        let id = CheckoutId::new();
        let first = SagaLogEntry::new(id, Version::new(1), "Started", &(), false).unwrap();

        let v = store.append(first, Version::initial()).await.unwrap();
        assert_eq!(v, Version::new(1));

        let stale = SagaLogEntry::new(id, Version::new(1), "Started", &(), false).unwrap();
        let err = store.append(stale, Version::initial()).await.unwrap_err();
        assert!(matches!(err, StoreError::ConcurrencyConflict { .. }));

        assert_eq!(store.load(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_checkouts_skips_terminal_streams() {
        let store = InMemoryStore::new();
        let open = CheckoutId::new();
        let done = CheckoutId::new();

        store
            .append(
                SagaLogEntry::new(open, Version::new(1), "Started", &(), false).unwrap(),
                Version::initial(),
            )
            .await
            .unwrap();
        store
            .append(
                SagaLogEntry::new(done, Version::new(1), "Started", &(), false).unwrap(),
                Version::initial(),
            )
            .await
            .unwrap();
        store
            .append(
                SagaLogEntry::new(done, Version::new(2), "Completed", &(), true).unwrap(),
                Version::new(1),
            )
            .await
            .unwrap();

        let found = store.open_checkouts(Utc::now()).await.unwrap();
        assert_eq!(found, vec![open]);

        let none_yet = store
            .open_checkouts(Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert!(none_yet.is_empty());
    }
}
