//! Inventory reservations for the checkout service.
//!
//! The [`ReservationLedger`] holds stock for a short time while a checkout
//! runs, and the [`StaleReservationSweeper`] reclaims holds nobody confirmed
//! or cancelled.

pub mod catalog;
pub mod error;
pub mod events;
pub mod ledger;
pub mod sweeper;

pub use catalog::{CatalogError, InMemoryCatalog, Product, ProductCatalog, ProductVariant};
pub use error::{LedgerError, Result};
pub use events::{EXPIRED_TOPIC, RELEASED_TOPIC, RESERVED_TOPIC, ReservationNotice};
pub use ledger::{LedgerConfig, ReservationHandle, ReservationLedger};
pub use sweeper::{StaleReservationSweeper, SweepReport, stale_counter_keys};
