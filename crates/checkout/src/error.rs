//! Checkout error types.

use common::CheckoutId;
use inventory::LedgerError;
use store::StoreError;
use thiserror::Error;

/// Errors returned by the checkout orchestrator.
///
/// Compensation failures never show up here; they are logged and the
/// original error is returned.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Exactly one of user id or guest email is required")]
    MissingIdentity,

    #[error("Shipping address is required for physical items")]
    MissingShippingAddress,

    #[error("Cart not found: {0}")]
    CartNotFound(String),

    #[error("Checkout not found: {0}")]
    CheckoutNotFound(CheckoutId),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Cart service error: {0}")]
    Cart(String),

    #[error("Order service error: {0}")]
    Order(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CheckoutError>;
