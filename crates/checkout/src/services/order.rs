//! Order service trait and in-memory implementation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CheckoutId, Money, ProductId, ReservationId, VariantId};
use serde::{Deserialize, Serialize};
use tax::Address;
use tokio::sync::RwLock;

use crate::error::CheckoutError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<VariantId>,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub total: Money,
}

/// Everything the order service needs to create an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    pub checkout_id: CheckoutId,
    pub reservation_id: ReservationId,
    pub cart_id: String,
    pub user_id: Option<String>,
    pub guest_email: Option<String>,
    pub lines: Vec<OrderLine>,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    pub shipping_method: Option<String>,
    pub payment_method: Option<String>,
    pub coupon_code: Option<String>,
    pub notes: Option<String>,
    pub currency: String,
    pub subtotal: Money,
    pub discount: Money,
    pub shipping_cost: Money,
    pub tax: Money,
    pub total: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub order_number: String,
    pub checkout_id: CheckoutId,
    pub reservation_id: ReservationId,
    pub lines: Vec<OrderLine>,
    pub currency: String,
    pub subtotal: Money,
    pub discount: Money,
    pub shipping_cost: Money,
    pub tax: Money,
    pub total: Money,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait OrderService: Send + Sync {
    async fn create_order(&self, draft: OrderDraft) -> Result<Order, CheckoutError>;

    /// The order created by a checkout, if any. Used by recovery.
    async fn find_by_checkout(&self, checkout_id: CheckoutId)
    -> Result<Option<Order>, CheckoutError>;
}

#[derive(Debug, Default)]
struct InMemoryOrderState {
    orders: Vec<Order>,
    next_number: u32,
    fail_on_create: bool,
}

/// In-memory order service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderService {
    state: Arc<RwLock<InMemoryOrderState>>,
}

impl InMemoryOrderService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail every create call.
    pub async fn set_fail_on_create(&self, fail: bool) {
        self.state.write().await.fail_on_create = fail;
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl OrderService for InMemoryOrderService {
    async fn create_order(&self, draft: OrderDraft) -> Result<Order, CheckoutError> {
        let mut state = self.state.write().await;

        if state.fail_on_create {
            return Err(CheckoutError::Order("Order service unavailable".to_string()));
        }

        state.next_number += 1;
        let order = Order {
            id: format!("order-{}", draft.checkout_id),
            order_number: format!("ORD-{:04}", state.next_number),
            checkout_id: draft.checkout_id,
            reservation_id: draft.reservation_id,
            lines: draft.lines,
            currency: draft.currency,
            subtotal: draft.subtotal,
            discount: draft.discount,
            shipping_cost: draft.shipping_cost,
            tax: draft.tax,
            total: draft.total,
            created_at: Utc::now(),
        };
        state.orders.push(order.clone());

        Ok(order)
    }

    async fn find_by_checkout(
        &self,
        checkout_id: CheckoutId,
    ) -> Result<Option<Order>, CheckoutError> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .iter()
            .find(|o| o.checkout_id == checkout_id)
            .cloned())
    }
}
