//! Shipping cost.
//!
//! There is no carrier-rate collaborator; every order with physical items
//! pays one flat rate.

use common::Money;

use super::cart::Cart;

/// Default flat shipping rate, in cents.
pub const DEFAULT_FLAT_SHIPPING_CENTS: i64 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatRateShipping {
    rate: Money,
}

impl FlatRateShipping {
    pub fn new(rate: Money) -> Self {
        Self { rate }
    }

    /// Zero when nothing in the cart ships.
    pub fn cost(&self, cart: &Cart) -> Money {
        if cart.has_physical_items {
            self.rate
        } else {
            Money::zero()
        }
    }
}

impl Default for FlatRateShipping {
    fn default() -> Self {
        Self::new(Money::from_cents(DEFAULT_FLAT_SHIPPING_CENTS))
    }
}
