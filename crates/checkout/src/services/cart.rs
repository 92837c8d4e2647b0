//! Cart service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{Money, ProductId, VariantId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::CheckoutError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<VariantId>,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    /// Digital goods need no shipping address.
    #[serde(default = "default_physical")]
    pub is_physical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_code: Option<String>,
}

fn default_physical() -> bool {
    true
}

impl CartItem {
    pub fn new(
        product_id: impl Into<ProductId>,
        name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            variant_id: None,
            name: name.into(),
            quantity,
            unit_price,
            is_physical: true,
            tax_code: None,
        }
    }

    pub fn with_variant(mut self, variant_id: impl Into<VariantId>) -> Self {
        self.variant_id = Some(variant_id.into());
        self
    }

    pub fn digital(mut self) -> Self {
        self.is_physical = false;
        self
    }

    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub id: String,
    pub items: Vec<CartItem>,
    pub subtotal: Money,
    pub discount: Money,
    pub has_physical_items: bool,
    pub currency: String,
}

impl Cart {
    /// Builds a cart, deriving the subtotal and physical flag from its items.
    pub fn new(id: impl Into<String>, items: Vec<CartItem>, discount: Money) -> Self {
        let subtotal = items.iter().map(CartItem::line_total).sum();
        let has_physical_items = items.iter().any(|i| i.is_physical);
        Self {
            id: id.into(),
            items,
            subtotal,
            discount,
            has_physical_items,
            currency: "USD".to_string(),
        }
    }
}

#[async_trait]
pub trait CartService: Send + Sync {
    async fn get_cart(&self, cart_id: &str) -> Result<Option<Cart>, CheckoutError>;
}

#[derive(Debug, Default)]
struct InMemoryCartState {
    carts: HashMap<String, Cart>,
    fail_on_get: bool,
}

/// In-memory cart service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCartService {
    state: Arc<RwLock<InMemoryCartState>>,
}

impl InMemoryCartService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_cart(&self, cart: Cart) {
        self.state.write().await.carts.insert(cart.id.clone(), cart);
    }

    /// Configures the service to fail every lookup.
    pub async fn set_fail_on_get(&self, fail: bool) {
        self.state.write().await.fail_on_get = fail;
    }
}

#[async_trait]
impl CartService for InMemoryCartService {
    async fn get_cart(&self, cart_id: &str) -> Result<Option<Cart>, CheckoutError> {
        let state = self.state.read().await;
        if state.fail_on_get {
            return Err(CheckoutError::Cart("Cart service unavailable".to_string()));
        }
        Ok(state.carts.get(cart_id).cloned())
    }
}
