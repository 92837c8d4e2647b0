use common::{CheckoutId, SkuKey};
use thiserror::Error;

use crate::saga_log::Version;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A SKU does not have enough unreserved stock for the requested hold.
    /// Nothing was written.
    #[error("Insufficient stock for {sku}: requested {requested}, available {available}")]
    InsufficientStock {
        sku: SkuKey,
        requested: i64,
        available: i64,
    },

    /// A reservation with the same ID already exists.
    #[error("Reservation already exists: {0}")]
    DuplicateReservation(String),

    /// The checkout log was appended to concurrently.
    #[error(
        "Concurrency conflict for checkout {checkout_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        checkout_id: CheckoutId,
        expected: Version,
        actual: Version,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored data could not be decoded into a domain value.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
