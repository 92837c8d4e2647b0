//! Reservation records and the atomic reservation store contract.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{ProductId, ReservationId, SkuKey, VariantId};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::outbox::OutboxMessage;

/// Authoritative stock per SKU, read from the catalog just before a reserve.
pub type StockLevels = BTreeMap<SkuKey, i64>;

/// One line of a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationItem {
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
}

impl ReservationItem {
    pub fn new(
        product_id: impl Into<ProductId>,
        variant_id: Option<VariantId>,
        quantity: u32,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            variant_id,
            quantity,
        }
    }

    /// The SKU this line holds stock against.
    pub fn sku(&self) -> SkuKey {
        SkuKey::new(self.product_id.clone(), self.variant_id.clone())
    }
}

/// Lifecycle of a stored reservation.
///
/// ```text
/// Held ──confirm claim──► Committing ──► (removed: Committed)
///  │
///  ├──cancel──► (removed: Released)
///  └──TTL────► (reclaimed: Expired)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ReservationStatus {
    /// Stock is held and the reservation may be confirmed or cancelled.
    #[default]
    Held,
    /// A confirm has claimed the reservation and is decrementing stock.
    Committing,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Held => "held",
            ReservationStatus::Committing => "committing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "held" => Some(ReservationStatus::Held),
            "committing" => Some(ReservationStatus::Committing),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A time-bounded hold against inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: ReservationId,
    pub items: Vec<ReservationItem>,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Creates a held reservation expiring `ttl` after `created_at`.
    pub fn new(items: Vec<ReservationItem>, created_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: ReservationId::new(),
            items,
            status: ReservationStatus::Held,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    /// A reservation is live strictly before its expiry instant.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Whether the expiry sweep may reclaim this reservation.
    ///
    /// Held reservations are reclaimable as soon as they expire. A
    /// `Committing` claim belongs to an in-flight confirm, so it is only
    /// reclaimed once it has outlived its expiry by one more TTL.
    pub fn is_reclaimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ReservationStatus::Held => !self.is_live(now),
            ReservationStatus::Committing => {
                let ttl = self.expires_at - self.created_at;
                self.expires_at + ttl <= now
            }
        }
    }

    /// Requested quantity per SKU, duplicate lines summed, in key order.
    pub fn quantities_by_sku(&self) -> BTreeMap<SkuKey, i64> {
        let mut quantities = BTreeMap::new();
        for item in &self.items {
            *quantities.entry(item.sku()).or_insert(0) += i64::from(item.quantity);
        }
        quantities
    }
}

/// Storage for reservations and per-SKU reserved counters.
///
/// Every method is a single atomic operation: implementations must never let
/// another caller observe a reservation record without its counter
/// increments, or the other way around.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Atomically checks availability for every SKU of the reservation,
    /// increments the counters, writes the record and enqueues `outbox`.
    ///
    /// For each SKU, `available = stock[sku] - counter(sku)` (a SKU missing
    /// from `stock` has stock 0). If any SKU has less available than
    /// requested, fails with `InsufficientStock` and writes nothing.
    async fn insert_reservation(
        &self,
        reservation: &Reservation,
        stock: &StockLevels,
        outbox: Vec<OutboxMessage>,
    ) -> Result<()>;

    /// Returns the reservation if it exists and is still live at `now`.
    async fn get_reservation(
        &self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>>;

    /// Atomically moves a live `Held` reservation to `Committing`.
    ///
    /// Returns `None` if the reservation is missing, expired or already
    /// claimed.
    async fn claim_reservation(
        &self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>>;

    /// Atomically deletes a reservation in status `expected`, releases its
    /// counters and enqueues `outbox`.
    ///
    /// `Held` reservations must also be live at `now`; a `Committing` claim
    /// is removable until the expiry sweep reclaims it. Counters are clamped
    /// at zero and keys reading zero or below are deleted.
    async fn remove_reservation(
        &self,
        id: ReservationId,
        expected: ReservationStatus,
        now: DateTime<Utc>,
        outbox: Vec<OutboxMessage>,
    ) -> Result<Option<Reservation>>;

    /// Current reserved counter for a SKU (0 when the key is absent).
    async fn reserved_quantity(&self, sku: &SkuKey) -> Result<i64>;

    /// Every counter key with its current value.
    async fn counters(&self) -> Result<Vec<(SkuKey, i64)>>;

    /// Deletes a counter key only if it still reads zero or below.
    ///
    /// Returns whether the key was deleted.
    async fn delete_counter_if_non_positive(&self, sku: &SkuKey) -> Result<bool>;

    /// Atomically removes every reclaimable reservation (see
    /// [`Reservation::is_reclaimable`]), releases its counters and enqueues
    /// the message built by `notice` for it.
    async fn reclaim_expired(
        &self,
        now: DateTime<Utc>,
        notice: &(dyn for<'r> Fn(&'r Reservation) -> Result<OutboxMessage> + Send + Sync),
    ) -> Result<Vec<Reservation>>;
}
