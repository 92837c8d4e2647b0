//! The reservation ledger.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::{ProductId, ReservationId, SkuKey, VariantId};
use serde::{Deserialize, Serialize};
use store::{
    OutboxMessage, Reservation, ReservationItem, ReservationStatus, ReservationStore, StockLevels,
};

use crate::catalog::{Product, ProductCatalog};
use crate::error::{LedgerError, Result};
use crate::events::{RELEASED_TOPIC, RESERVED_TOPIC, ReservationNotice};

/// Default time a reservation holds stock.
pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 900;

/// How many stock snapshots a reserve takes before giving up.
const RESERVE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    pub ttl: Duration,
}

impl LedgerConfig {
    pub fn with_ttl_secs(secs: u64) -> Self {
        Self {
            ttl: Duration::seconds(i64::try_from(secs).unwrap_or(DEFAULT_RESERVATION_TTL_SECS)),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::seconds(DEFAULT_RESERVATION_TTL_SECS),
        }
    }
}

/// Returned by a successful reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationHandle {
    pub reservation_id: ReservationId,
    pub expires_at: DateTime<Utc>,
}

/// Holds stock for in-flight checkouts.
///
/// Counters and reservation records live in the [`ReservationStore`]; stock
/// lives in the [`ProductCatalog`] and is only decremented on confirm. Every
/// mutation of counters goes through one atomic store operation, so
/// `counter(sku)` always equals the total quantity of live reservations on
/// that SKU.
pub struct ReservationLedger<S, C>
where
    S: ReservationStore,
    C: ProductCatalog,
{
    store: Arc<S>,
    catalog: Arc<C>,
    config: LedgerConfig,
}

impl<S, C> Clone for ReservationLedger<S, C>
where
    S: ReservationStore,
    C: ProductCatalog,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            catalog: self.catalog.clone(),
            config: self.config,
        }
    }
}

impl<S, C> ReservationLedger<S, C>
where
    S: ReservationStore,
    C: ProductCatalog,
{
    pub fn new(store: Arc<S>, catalog: Arc<C>, config: LedgerConfig) -> Self {
        Self {
            store,
            catalog,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<C> {
        &self.catalog
    }

    /// Reserves every item or none of them.
    ///
    /// Duplicate lines for one SKU are summed before the availability check.
    #[tracing::instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn reserve(&self, items: Vec<ReservationItem>) -> Result<ReservationHandle> {
        if items.is_empty() {
            return Err(LedgerError::InvalidRequest(
                "reservation must contain at least one item".to_string(),
            ));
        }
        if let Some(item) = items.iter().find(|i| i.quantity == 0) {
            return Err(LedgerError::InvalidRequest(format!(
                "quantity for {} must be positive",
                item.sku()
            )));
        }

        let mut attempt = 1;
        loop {
            let reservation = Reservation::new(items.clone(), Utc::now(), self.config.ttl);
            let stock = self.stock_levels(&reservation).await?;

            if let Err(e) = self
                .store
                .insert_reservation(&reservation, &stock, Vec::new())
                .await
            {
                return Err(rejected(e.into()));
            }

            let shortfall = match self.shortfall(&reservation).await {
                Ok(shortfall) => shortfall,
                Err(e) => {
                    self.discard(&reservation).await;
                    return Err(e);
                }
            };

            let Some(shortfall) = shortfall else {
                metrics::counter!("reservations_created_total").increment(1);
                tracing::info!(reservation_id = %reservation.id, expires_at = %reservation.expires_at, "Reservation created");
                return Ok(ReservationHandle {
                    reservation_id: reservation.id,
                    expires_at: reservation.expires_at,
                });
            };

            // Stock moved under the snapshot.
            self.discard(&reservation).await;
            if attempt >= RESERVE_ATTEMPTS {
                return Err(rejected(shortfall));
            }
            tracing::debug!(attempt, error = %shortfall, "Stock changed during reserve, retrying");
            attempt += 1;
        }
    }

    /// Commits a reservation: decrements catalog stock and releases the hold.
    ///
    /// If a stock decrement fails the reservation stays claimed and is
    /// released by the expiry sweep.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, reservation_id: ReservationId) -> Result<Reservation> {
        let now = Utc::now();
        let claimed = self
            .store
            .claim_reservation(reservation_id, now)
            .await?
            .ok_or(LedgerError::ReservationNotFound(reservation_id))?;

        for (sku, quantity) in claimed.quantities_by_sku() {
            let quantity = u32::try_from(quantity).map_err(|_| {
                LedgerError::InvalidRequest(format!("quantity for {sku} out of range"))
            })?;
            if let Err(e) = self
                .catalog
                .decrement_inventory(&sku.product_id, sku.variant_id.as_ref(), quantity)
                .await
            {
                tracing::error!(%reservation_id, %sku, error = %e, "Stock decrement failed, claim left for expiry");
                metrics::counter!("reservation_confirm_failures_total").increment(1);
                return Err(e.into());
            }
        }

        let notice = OutboxMessage::new(RESERVED_TOPIC, &ReservationNotice::from(&claimed))?;
        let confirmed = self
            .store
            .remove_reservation(reservation_id, ReservationStatus::Committing, now, vec![notice])
            .await?
            .ok_or(LedgerError::ReservationNotFound(reservation_id))?;

        metrics::counter!("reservations_confirmed_total").increment(1);
        tracing::info!(%reservation_id, "Reservation confirmed");
        Ok(confirmed)
    }

    /// Releases a held reservation without touching stock.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, reservation_id: ReservationId) -> Result<Reservation> {
        let now = Utc::now();
        let held = self
            .store
            .get_reservation(reservation_id, now)
            .await?
            .filter(|r| r.status == ReservationStatus::Held)
            .ok_or(LedgerError::ReservationNotFound(reservation_id))?;

        let notice = OutboxMessage::new(RELEASED_TOPIC, &ReservationNotice::from(&held))?;
        let released = self
            .store
            .remove_reservation(reservation_id, ReservationStatus::Held, now, vec![notice])
            .await?
            .ok_or(LedgerError::ReservationNotFound(reservation_id))?;

        metrics::counter!("reservations_released_total").increment(1);
        tracing::info!(%reservation_id, "Reservation released");
        Ok(released)
    }

    /// `max(0, stock - reserved)` for a SKU.
    pub async fn get_available_quantity(
        &self,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
    ) -> Result<i64> {
        let sku = SkuKey::new(product_id.clone(), variant_id.cloned());
        let stock = self
            .catalog
            .find_by_id(product_id)
            .await?
            .map(|p| p.stock_for(variant_id))
            .unwrap_or(0);
        let reserved = self.store.reserved_quantity(&sku).await?;
        Ok((stock - reserved).max(0))
    }

    pub async fn get_reserved_quantity(
        &self,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
    ) -> Result<i64> {
        let sku = SkuKey::new(product_id.clone(), variant_id.cloned());
        Ok(self.store.reserved_quantity(&sku).await?)
    }

    pub async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.store
            .get_reservation(reservation_id, Utc::now())
            .await?
            .ok_or(LedgerError::ReservationNotFound(reservation_id))
    }

    /// Re-checks an inserted reservation against current stock, returning
    /// the first SKU whose counter now exceeds it.
    ///
    /// Counters are read before stock. A confirm decrements stock before it
    /// releases its counter, so this order can only overstate demand.
    async fn shortfall(&self, reservation: &Reservation) -> Result<Option<LedgerError>> {
        let quantities = reservation.quantities_by_sku();
        let mut reserved = BTreeMap::new();
        for sku in quantities.keys() {
            reserved.insert(sku.clone(), self.store.reserved_quantity(sku).await?);
        }
        let stock = self.stock_levels(reservation).await?;

        for (sku, requested) in quantities {
            let level = stock.get(&sku).copied().unwrap_or(0);
            let total = reserved.get(&sku).copied().unwrap_or(0);
            if total > level {
                let available = (level - (total - requested)).max(0);
                return Ok(Some(LedgerError::InsufficientStock {
                    sku,
                    requested,
                    available,
                }));
            }
        }
        Ok(None)
    }

    /// Removes a reservation that was never handed out.
    async fn discard(&self, reservation: &Reservation) {
        if let Err(e) = self
            .store
            .remove_reservation(reservation.id, ReservationStatus::Held, Utc::now(), Vec::new())
            .await
        {
            tracing::warn!(reservation_id = %reservation.id, error = %e, "Failed to discard reservation, left for expiry");
        }
    }

    /// Reads stock for every SKU of the reservation, one catalog read per
    /// product.
    async fn stock_levels(&self, reservation: &Reservation) -> Result<StockLevels> {
        let mut products: BTreeMap<ProductId, Option<Product>> = BTreeMap::new();
        let mut stock = StockLevels::new();

        for sku in reservation.quantities_by_sku().into_keys() {
            if !products.contains_key(&sku.product_id) {
                let product = self.catalog.find_by_id(&sku.product_id).await?;
                products.insert(sku.product_id.clone(), product);
            }
            let level = products
                .get(&sku.product_id)
                .and_then(|p| p.as_ref())
                .map(|p| p.stock_for(sku.variant_id.as_ref()))
                .unwrap_or(0);
            stock.insert(sku, level);
        }

        Ok(stock)
    }
}

fn rejected(err: LedgerError) -> LedgerError {
    if let LedgerError::InsufficientStock {
        sku,
        requested,
        available,
    } = &err
    {
        tracing::info!(%sku, requested, available, "Reservation rejected");
        metrics::counter!("reservations_rejected_total").increment(1);
    }
    err
}
