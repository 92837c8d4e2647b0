//! Shared types for the checkout service crates.

pub mod ids;
pub mod money;
pub mod sku;

pub use ids::{CheckoutId, ReservationId};
pub use money::Money;
pub use sku::{DEFAULT_VARIANT, ProductId, SkuKey, VariantId};
