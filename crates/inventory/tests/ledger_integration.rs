//! Integration tests for the reservation ledger and sweeper.
//!
//! These tests drive full reservation lifecycles against the in-memory store
//! and catalog, including expiry and the safety-net counter sweep.

use std::sync::Arc;

use common::{ProductId, SkuKey, VariantId};
use inventory::{
    InMemoryCatalog, LedgerConfig, LedgerError, ReservationLedger, StaleReservationSweeper,
};
use store::{InMemoryStore, ReservationItem};

type Ledger = ReservationLedger<InMemoryStore, InMemoryCatalog>;

async fn create_ledger(ttl_secs: u64, stock: &[(&str, i64)]) -> Ledger {
    let catalog = InMemoryCatalog::new();
    for (product, level) in stock {
        catalog.set_stock(*product, None, *level).await;
    }
    ReservationLedger::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(catalog),
        LedgerConfig::with_ttl_secs(ttl_secs),
    )
}

fn item(product: &str, quantity: u32) -> ReservationItem {
    ReservationItem::new(product, None, quantity)
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn reserve_confirm_cancel_sequence() {
        let ledger = create_ledger(900, &[("widget", 10), ("gadget", 3)]).await;
        let widget = ProductId::new("widget");
        let gadget = ProductId::new("gadget");

        let first = ledger
            .reserve(vec![item("widget", 4), item("gadget", 1)])
            .await
            .unwrap();
        let second = ledger.reserve(vec![item("widget", 2)]).await.unwrap();

        assert_eq!(ledger.get_available_quantity(&widget, None).await.unwrap(), 4);
        assert_eq!(ledger.get_available_quantity(&gadget, None).await.unwrap(), 2);

        ledger.confirm(first.reservation_id).await.unwrap();
        assert_eq!(ledger.catalog().stock(&widget, None).await, Some(6));
        assert_eq!(ledger.catalog().stock(&gadget, None).await, Some(2));
        assert_eq!(ledger.get_reserved_quantity(&widget, None).await.unwrap(), 2);
        assert_eq!(ledger.get_available_quantity(&widget, None).await.unwrap(), 4);

        ledger.cancel(second.reservation_id).await.unwrap();
        assert_eq!(ledger.get_reserved_quantity(&widget, None).await.unwrap(), 0);
        assert_eq!(ledger.get_available_quantity(&widget, None).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn cancel_after_confirm_is_not_found() {
        let ledger = create_ledger(900, &[("widget", 10)]).await;
        let handle = ledger.reserve(vec![item("widget", 1)]).await.unwrap();

        ledger.confirm(handle.reservation_id).await.unwrap();
        let result = ledger.cancel(handle.reservation_id).await;

        assert!(matches!(result, Err(LedgerError::ReservationNotFound(_))));
    }

    #[tokio::test]
    async fn variant_lines_use_variant_stock() {
        let catalog = InMemoryCatalog::new();
        let large = VariantId::new("large");
        catalog.set_stock("shirt", Some(large.clone()), 1).await;
        let ledger = ReservationLedger::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(catalog),
            LedgerConfig::default(),
        );

        let result = ledger
            .reserve(vec![ReservationItem::new("shirt", Some(large.clone()), 2)])
            .await;
        assert!(matches!(result, Err(LedgerError::InsufficientStock { .. })));

        // The base product has no stock of its own.
        let result = ledger.reserve(vec![item("shirt", 1)]).await;
        assert!(matches!(result, Err(LedgerError::InsufficientStock { .. })));
    }
}

mod expiry {
    use super::*;

    #[tokio::test]
    async fn expired_hold_is_reclaimed_by_the_sweeper() {
        let ledger = create_ledger(0, &[("widget", 5)]).await;
        let widget = ProductId::new("widget");
        ledger.reserve(vec![item("widget", 5)]).await.unwrap();

        // The counter still holds stock until the sweep reclaims it.
        assert_eq!(ledger.get_available_quantity(&widget, None).await.unwrap(), 0);

        let sweeper = StaleReservationSweeper::new(ledger.store().clone());
        let report = sweeper.run_once().await.unwrap();

        assert_eq!(report.expired_reservations, 1);
        assert_eq!(ledger.get_reserved_quantity(&widget, None).await.unwrap(), 0);
        assert_eq!(ledger.get_available_quantity(&widget, None).await.unwrap(), 5);
        assert_eq!(ledger.store().reservation_count().await, 0);
    }

    #[tokio::test]
    async fn expired_reservation_is_not_readable() {
        let ledger = create_ledger(0, &[("widget", 5)]).await;
        let handle = ledger.reserve(vec![item("widget", 1)]).await.unwrap();

        let result = ledger.get_reservation(handle.reservation_id).await;

        assert!(matches!(result, Err(LedgerError::ReservationNotFound(_))));
    }

    #[tokio::test]
    async fn sweeper_only_clears_non_positive_counters() {
        let ledger = create_ledger(900, &[("c", 10)]).await;
        let store = ledger.store().clone();
        store.set_counter(SkuKey::new("a", None), 0).await;
        store.set_counter(SkuKey::new("b", None), -1).await;
        ledger.reserve(vec![item("c", 5)]).await.unwrap();

        let report = StaleReservationSweeper::new(store.clone())
            .run_once()
            .await
            .unwrap();

        assert_eq!(report.cleared_counters, 2);
        assert_eq!(store.counter(&SkuKey::new("a", None)).await, None);
        assert_eq!(store.counter(&SkuKey::new("b", None)).await, None);
        assert_eq!(store.counter(&SkuKey::new("c", None)).await, Some(5));
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn competing_multi_item_reserves_never_oversell() {
        let ledger = create_ledger(900, &[("x", 3), ("y", 3)]).await;

        let mut handles = Vec::new();
        for i in 0..12 {
            let ledger = ledger.clone();
            let items = if i % 2 == 0 {
                vec![item("x", 1), item("y", 1)]
            } else {
                vec![item("y", 1), item("x", 1)]
            };
            handles.push(tokio::spawn(async move { ledger.reserve(items).await }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(LedgerError::InsufficientStock { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(succeeded, 3);
        let x = ProductId::new("x");
        let y = ProductId::new("y");
        assert_eq!(ledger.get_reserved_quantity(&x, None).await.unwrap(), 3);
        assert_eq!(ledger.get_reserved_quantity(&y, None).await.unwrap(), 3);
    }
}
