//! Outbox payloads written by the ledger and the sweeper.

use chrono::{DateTime, Utc};
use common::ReservationId;
use serde::{Deserialize, Serialize};
use store::{Reservation, ReservationItem};

/// Stock for a reservation was committed.
pub const RESERVED_TOPIC: &str = "inventory.reserved";
/// A reservation was cancelled and its hold released.
pub const RELEASED_TOPIC: &str = "inventory.released";
/// A reservation outlived its TTL and was reclaimed.
pub const EXPIRED_TOPIC: &str = "inventory.expired";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationNotice {
    pub reservation_id: ReservationId,
    pub items: Vec<ReservationItem>,
    pub expires_at: DateTime<Utc>,
}

impl From<&Reservation> for ReservationNotice {
    fn from(reservation: &Reservation) -> Self {
        Self {
            reservation_id: reservation.id,
            items: reservation.items.clone(),
            expires_at: reservation.expires_at,
        }
    }
}
