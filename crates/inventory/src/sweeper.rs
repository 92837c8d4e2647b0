//! Periodic cleanup of expired reservations and stale counters.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::SkuKey;
use store::{OutboxMessage, Reservation, ReservationStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::events::{EXPIRED_TOPIC, ReservationNotice};

/// Default pause between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Counter keys that should be deleted: every key reading zero or below.
pub fn stale_counter_keys(counters: &[(SkuKey, i64)]) -> Vec<SkuKey> {
    counters
        .iter()
        .filter(|(_, value)| *value <= 0)
        .map(|(sku, _)| sku.clone())
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_reservations: usize,
    pub cleared_counters: usize,
}

fn expiry_notice(reservation: &Reservation) -> store::Result<OutboxMessage> {
    OutboxMessage::new(EXPIRED_TOPIC, &ReservationNotice::from(reservation))
}

pub struct StaleReservationSweeper<S: ReservationStore> {
    store: Arc<S>,
}

impl<S: ReservationStore + 'static> StaleReservationSweeper<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// One sweep: reclaims expired reservations together with their
    /// counters, then deletes any counter still reading zero or below.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<SweepReport> {
        let reclaimed = self.store.reclaim_expired(Utc::now(), &expiry_notice).await?;
        for reservation in &reclaimed {
            tracing::info!(reservation_id = %reservation.id, expired_at = %reservation.expires_at, "Reclaimed expired reservation");
        }

        let counters = self.store.counters().await?;
        let mut cleared = 0;
        for sku in stale_counter_keys(&counters) {
            // A reserve may have raised the counter since the scan.
            if self.store.delete_counter_if_non_positive(&sku).await? {
                tracing::debug!(%sku, "Cleared stale counter");
                cleared += 1;
            }
        }

        let report = SweepReport {
            expired_reservations: reclaimed.len(),
            cleared_counters: cleared,
        };
        metrics::counter!("reservations_expired_total").increment(report.expired_reservations as u64);
        metrics::counter!("stale_counters_cleared_total").increment(report.cleared_counters as u64);
        if report != SweepReport::default() {
            tracing::info!(
                expired = report.expired_reservations,
                cleared = report.cleared_counters,
                "Sweep finished"
            );
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
                            tracing::error!(error = %e, "Reservation sweep failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            tracing::info!("Reservation sweeper stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
