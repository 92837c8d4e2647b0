//! HTTP handlers.

pub mod checkout;
pub mod health;
pub mod inventory;
pub mod metrics;

use std::str::FromStr;

use crate::error::ApiError;

/// Parses an id path segment, rejecting malformed values with 400.
pub(crate) fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {what}: {raw}")))
}
