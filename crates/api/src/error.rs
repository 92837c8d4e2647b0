//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;
use inventory::{CatalogError, LedgerError};

/// API-level error type that maps to HTTP responses.
///
/// Bodies are `{ "error": message, "code": CODE }`.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Checkout saga error.
    Checkout(CheckoutError),
    /// Reservation ledger error.
    Ledger(LedgerError),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Checkout(err) => checkout_error_parts(err),
            ApiError::Ledger(err) => ledger_error_parts(err),
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Checkout(err) => err.to_string(),
            ApiError::Ledger(err) => err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let message = self.message();

        if status.is_server_error() {
            tracing::error!(error = %message, code, "request failed");
        }

        let body = serde_json::json!({ "error": message, "code": code });
        (status, axum::Json(body)).into_response()
    }
}

fn checkout_error_parts(err: &CheckoutError) -> (StatusCode, &'static str) {
    match err {
        CheckoutError::EmptyCart => (StatusCode::BAD_REQUEST, "EMPTY_CART"),
        CheckoutError::MissingIdentity => (StatusCode::BAD_REQUEST, "MISSING_IDENTITY"),
        CheckoutError::MissingShippingAddress => {
            (StatusCode::BAD_REQUEST, "MISSING_SHIPPING_ADDRESS")
        }
        CheckoutError::CartNotFound(_) => (StatusCode::NOT_FOUND, "CART_NOT_FOUND"),
        CheckoutError::CheckoutNotFound(_) => (StatusCode::NOT_FOUND, "CHECKOUT_NOT_FOUND"),
        CheckoutError::Ledger(err) => ledger_error_parts(err),
        CheckoutError::Cart(_) => (StatusCode::BAD_GATEWAY, "CART_SERVICE_ERROR"),
        CheckoutError::Order(_) => (StatusCode::BAD_GATEWAY, "ORDER_SERVICE_ERROR"),
        CheckoutError::Store(_) | CheckoutError::Serialization(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
        }
    }
}

fn ledger_error_parts(err: &LedgerError) -> (StatusCode, &'static str) {
    match err {
        LedgerError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
        LedgerError::InsufficientStock { .. } => (StatusCode::BAD_REQUEST, "INSUFFICIENT_STOCK"),
        LedgerError::ReservationNotFound(_) => (StatusCode::NOT_FOUND, "RESERVATION_NOT_FOUND"),
        LedgerError::Catalog(CatalogError::ProductNotFound(_) | CatalogError::VariantNotFound(_)) => {
            (StatusCode::NOT_FOUND, "PRODUCT_NOT_FOUND")
        }
        LedgerError::Catalog(CatalogError::Unavailable(_)) => {
            (StatusCode::SERVICE_UNAVAILABLE, "CATALOG_UNAVAILABLE")
        }
        LedgerError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

#[cfg(test)]
mod tests {
    use common::{ProductId, ReservationId, SkuKey};

    use super::*;

    #[test]
    fn test_checkout_validation_errors_are_bad_requests() {
        for err in [
            CheckoutError::EmptyCart,
            CheckoutError::MissingIdentity,
            CheckoutError::MissingShippingAddress,
        ] {
            assert_eq!(ApiError::from(err).parts().0, StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn test_insufficient_stock_maps_through_checkout() {
        let err = CheckoutError::Ledger(LedgerError::InsufficientStock {
            sku: SkuKey::new(ProductId::from("p1"), None),
            requested: 3,
            available: 1,
        });
        assert_eq!(
            ApiError::from(err).parts(),
            (StatusCode::BAD_REQUEST, "INSUFFICIENT_STOCK")
        );
    }

    #[test]
    fn test_missing_reservation_is_not_found() {
        let err = LedgerError::ReservationNotFound(ReservationId::new());
        assert_eq!(
            ApiError::from(err).parts(),
            (StatusCode::NOT_FOUND, "RESERVATION_NOT_FOUND")
        );
    }

    #[test]
    fn test_collaborator_failures_are_bad_gateway() {
        let err = CheckoutError::Order("down".to_string());
        assert_eq!(ApiError::from(err).parts().0, StatusCode::BAD_GATEWAY);
    }
}
