//! Ledger error types.

use common::{ReservationId, SkuKey};
use store::StoreError;
use thiserror::Error;

use crate::catalog::CatalogError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid reservation request: {0}")]
    InvalidRequest(String),

    #[error("Insufficient stock for {sku}: requested {requested}, available {available}")]
    InsufficientStock {
        sku: SkuKey,
        requested: i64,
        available: i64,
    },

    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientStock {
                sku,
                requested,
                available,
            } => LedgerError::InsufficientStock {
                sku,
                requested,
                available,
            },
            other => LedgerError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
