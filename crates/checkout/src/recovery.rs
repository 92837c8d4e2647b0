//! Recovery sweep for checkouts interrupted mid-flight.
//!
//! A checkout whose last log entry is non-terminal and older than the grace
//! period was abandoned (the process died or the request was dropped). The
//! sweep finishes it from whatever the log shows.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::CheckoutId;
use inventory::{LedgerError, ProductCatalog, ReservationLedger};
use store::{OutboxStore, ReservationStore, SagaLog, StoreError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{CheckoutError, Result};
use crate::events::CheckoutEvent;
use crate::saga::CheckoutSaga;
use crate::services::OrderService;
use crate::state::CheckoutState;

/// Default age of the last entry before a checkout counts as abandoned.
pub const DEFAULT_RECOVERY_GRACE: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Reservation released.
    pub compensated: usize,
    /// Order found and the checkout marked completed.
    pub completed: usize,
    /// Abandoned before any reservation.
    pub aborted: usize,
    /// Releasing the reservation failed.
    pub compensation_failed: usize,
    /// Left alone because another writer moved the checkout on.
    pub skipped: usize,
}

enum Outcome {
    Compensated,
    Completed,
    Aborted,
    CompensationFailed,
    Skipped,
}

pub struct CheckoutRecovery<S, C>
where
    S: ReservationStore + OutboxStore + SagaLog,
    C: ProductCatalog,
{
    ledger: ReservationLedger<S, C>,
    store: Arc<S>,
    orders: Arc<dyn OrderService>,
    grace: chrono::Duration,
}

impl<S, C> CheckoutRecovery<S, C>
where
    S: ReservationStore + OutboxStore + SagaLog + 'static,
    C: ProductCatalog + 'static,
{
    pub fn new(
        ledger: ReservationLedger<S, C>,
        orders: Arc<dyn OrderService>,
        grace: Duration,
    ) -> Self {
        let store = ledger.store().clone();
        Self {
            ledger,
            store,
            orders,
            grace: chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::seconds(120)),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<RecoveryReport> {
        let idle_since = Utc::now() - self.grace;
        let mut report = RecoveryReport::default();

        for checkout_id in self.store.open_checkouts(idle_since).await? {
            let outcome = match self.recover(checkout_id).await {
                Ok(outcome) => outcome,
                Err(CheckoutError::Store(StoreError::ConcurrencyConflict { .. })) => {
                    tracing::debug!(%checkout_id, "Checkout moved on during recovery");
                    Outcome::Skipped
                }
                Err(e) => {
                    tracing::error!(%checkout_id, error = %e, "Checkout recovery failed");
                    continue;
                }
            };
            match outcome {
                Outcome::Compensated => report.compensated += 1,
                Outcome::Completed => report.completed += 1,
                Outcome::Aborted => report.aborted += 1,
                Outcome::CompensationFailed => report.compensation_failed += 1,
                Outcome::Skipped => report.skipped += 1,
            }
        }

        if report != RecoveryReport::default() {
            tracing::info!(?report, "Checkout recovery pass finished");
        }
        metrics::counter!("checkouts_recovered_total")
            .increment((report.compensated + report.completed + report.aborted) as u64);
        Ok(report)
    }

    async fn recover(&self, checkout_id: CheckoutId) -> Result<Outcome> {
        let entries = self.store.load(checkout_id).await?;
        let mut saga = CheckoutSaga::from_entries(checkout_id, &entries)?;
        let log = self.store.as_ref();

        match saga.state() {
            CheckoutState::Started => {
                saga.record(log, CheckoutEvent::aborted("abandoned before reservation"))
                    .await?;
                tracing::info!(%checkout_id, "Recovered checkout: aborted");
                Ok(Outcome::Aborted)
            }
            CheckoutState::OrderCreated => {
                saga.record(log, CheckoutEvent::completed()).await?;
                tracing::info!(%checkout_id, "Recovered checkout: completed");
                Ok(Outcome::Completed)
            }
            state if state.holds_reservation() => {
                // The order may exist even though its log entry was lost.
                if let Some(order) = self.orders.find_by_checkout(checkout_id).await? {
                    if state == CheckoutState::Reserved {
                        saga.record(
                            log,
                            CheckoutEvent::order_created(&order.id, &order.order_number, order.total),
                        )
                        .await?;
                        saga.record(log, CheckoutEvent::completed()).await?;
                        tracing::info!(%checkout_id, "Recovered checkout: completed");
                        return Ok(Outcome::Completed);
                    }
                    tracing::warn!(%checkout_id, order_id = %order.id, "Order exists for a compensating checkout");
                }
                self.release(&mut saga).await
            }
            _ => Ok(Outcome::Skipped),
        }
    }

    async fn release(&self, saga: &mut CheckoutSaga) -> Result<Outcome> {
        let checkout_id = saga.checkout_id();
        let log = self.store.as_ref();

        if saga.state() == CheckoutState::Reserved {
            saga.record(
                log,
                CheckoutEvent::compensation_started("abandoned after reservation"),
            )
            .await?;
        }

        let Some(reservation_id) = saga.reservation_id() else {
            saga.record(log, CheckoutEvent::compensation_failed("no reservation id recorded"))
                .await?;
            return Ok(Outcome::CompensationFailed);
        };

        match self.ledger.cancel(reservation_id).await {
            // Already gone: it expired or was reclaimed.
            Ok(_) | Err(LedgerError::ReservationNotFound(_)) => {
                saga.record(log, CheckoutEvent::compensated(reservation_id))
                    .await?;
                tracing::info!(%checkout_id, %reservation_id, "Recovered checkout: compensated");
                Ok(Outcome::Compensated)
            }
            Err(e) => {
                tracing::error!(%checkout_id, %reservation_id, error = %e, "Recovery could not release reservation");
                saga.record(log, CheckoutEvent::compensation_failed(e.to_string()))
                    .await?;
                Ok(Outcome::CompensationFailed)
            }
        }
    }

    /// Runs [`Self::run_once`] every `every` until `shutdown` flips to true.
    pub fn spawn(self, every: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            tracing::error!(error = %e, "Checkout recovery pass failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            tracing::info!("Checkout recovery stopping");
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
    use common::{Money, ProductId};
    use inventory::{InMemoryCatalog, LedgerConfig, ReservationHandle};
    use store::{InMemoryStore, ReservationItem};

    use crate::services::{InMemoryOrderService, OrderDraft};

    struct Fixture {
        recovery: CheckoutRecovery<InMemoryStore, InMemoryCatalog>,
        ledger: ReservationLedger<InMemoryStore, InMemoryCatalog>,
        store: Arc<InMemoryStore>,
        orders: InMemoryOrderService,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let catalog = InMemoryCatalog::new();
        catalog.set_stock("p1", None, 10).await;
        let orders = InMemoryOrderService::new();
        let ledger =
            ReservationLedger::new(store.clone(), Arc::new(catalog), LedgerConfig::default());
        // Zero grace: everything already recorded counts as abandoned.
        let recovery =
            CheckoutRecovery::new(ledger.clone(), Arc::new(orders.clone()), Duration::ZERO);

        Fixture {
            recovery,
            ledger,
            store,
            orders,
        }
    }

    async fn started(f: &Fixture) -> CheckoutSaga {
        let id = CheckoutId::new();
        let mut saga = CheckoutSaga::new(id);
        saga.record(
            f.store.as_ref(),
            CheckoutEvent::checkout_started(id, "cart-1", Some("user-1".to_string()), None),
        )
        .await
        .unwrap();
        saga
    }

    async fn reserved(f: &Fixture) -> (CheckoutSaga, ReservationHandle) {
        let mut saga = started(f).await;
        let handle = f
            .ledger
            .reserve(vec![ReservationItem::new("p1", None, 3)])
            .await
            .unwrap();
        saga.record(
            f.store.as_ref(),
            CheckoutEvent::reservation_acquired(handle.reservation_id, handle.expires_at),
        )
        .await
        .unwrap();
        (saga, handle)
    }

    fn draft(checkout_id: CheckoutId, handle: &ReservationHandle) -> OrderDraft {
        OrderDraft {
            checkout_id,
            reservation_id: handle.reservation_id,
            cart_id: "cart-1".to_string(),
            user_id: Some("user-1".to_string()),
            guest_email: None,
            lines: vec![],
            shipping_address: None,
            billing_address: None,
            shipping_method: None,
            payment_method: None,
            coupon_code: None,
            notes: None,
            currency: "USD".to_string(),
            subtotal: Money::from_cents(3000),
            discount: Money::zero(),
            shipping_cost: Money::zero(),
            tax: Money::zero(),
            total: Money::from_cents(3000),
        }
    }

    async fn state(f: &Fixture, checkout_id: CheckoutId) -> CheckoutState {
        let entries = f.store.load(checkout_id).await.unwrap();
        CheckoutSaga::from_entries(checkout_id, &entries)
            .unwrap()
            .state()
    }

    async fn available(f: &Fixture) -> i64 {
        f.ledger
            .get_available_quantity(&ProductId::from("p1"), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_started_checkout_is_aborted() {
        let f = fixture().await;
        let saga = started(&f).await;

        let report = f.recovery.run_once().await.unwrap();

        assert_eq!(report.aborted, 1);
        assert_eq!(state(&f, saga.checkout_id()).await, CheckoutState::Aborted);
    }

    #[tokio::test]
    async fn test_reserved_checkout_without_order_is_compensated() {
        let f = fixture().await;
        let (saga, _) = reserved(&f).await;
        assert_eq!(available(&f).await, 7);

        let report = f.recovery.run_once().await.unwrap();

        assert_eq!(report.compensated, 1);
        assert_eq!(available(&f).await, 10);
        assert_eq!(
            state(&f, saga.checkout_id()).await,
            CheckoutState::Compensated
        );
    }

    #[tokio::test]
    async fn test_reserved_checkout_with_order_is_completed() {
        let f = fixture().await;
        let (saga, handle) = reserved(&f).await;
        f.orders
            .create_order(draft(saga.checkout_id(), &handle))
            .await
            .unwrap();

        let report = f.recovery.run_once().await.unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(state(&f, saga.checkout_id()).await, CheckoutState::Completed);
        // The order keeps its stock held for payment.
        assert_eq!(available(&f).await, 7);
    }

    #[tokio::test]
    async fn test_order_created_checkout_is_completed() {
        let f = fixture().await;
        let (mut saga, _) = reserved(&f).await;
        saga.record(
            f.store.as_ref(),
            CheckoutEvent::order_created("o-1", "ORD-0001", Money::from_cents(3000)),
        )
        .await
        .unwrap();

        let report = f.recovery.run_once().await.unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(state(&f, saga.checkout_id()).await, CheckoutState::Completed);
    }

    #[tokio::test]
    async fn test_expired_reservation_counts_as_compensated() {
        let f = fixture().await;
        let (saga, handle) = reserved(&f).await;
        f.ledger.cancel(handle.reservation_id).await.unwrap();

        let report = f.recovery.run_once().await.unwrap();

        assert_eq!(report.compensated, 1);
        assert_eq!(
            state(&f, saga.checkout_id()).await,
            CheckoutState::Compensated
        );
    }

    #[tokio::test]
    async fn test_finished_checkouts_are_left_alone() {
        let f = fixture().await;
        let mut saga = started(&f).await;
        saga.record(f.store.as_ref(), CheckoutEvent::aborted("out of stock"))
            .await
            .unwrap();

        let report = f.recovery.run_once().await.unwrap();

        assert_eq!(report, RecoveryReport::default());
    }

    #[tokio::test]
    async fn test_grace_period_protects_in_flight_checkouts() {
        let f = fixture().await;
        let recovery = CheckoutRecovery::new(
            f.ledger.clone(),
            Arc::new(f.orders.clone()),
            DEFAULT_RECOVERY_GRACE,
        );
        let saga = started(&f).await;

        let report = recovery.run_once().await.unwrap();

        assert_eq!(report, RecoveryReport::default());
        assert_eq!(state(&f, saga.checkout_id()).await, CheckoutState::Started);
    }
}
