use chrono::{DateTime, Utc};
use common::{CheckoutId, Money, ReservationId};
use serde::{Deserialize, Serialize};
use tax::{Address, TaxCalculationResult};

use crate::services::Order;

/// Input of a checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub cart_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub guest_email: Option<String>,
    #[serde(default)]
    pub shipping_address: Option<Address>,
    #[serde(default)]
    pub billing_address: Option<Address>,
    #[serde(default)]
    pub shipping_method: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Who is checking out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomerIdentity {
    User(String),
    Guest(String),
}

impl CheckoutRequest {
    pub fn for_user(cart_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            cart_id: cart_id.into(),
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn for_guest(cart_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            cart_id: cart_id.into(),
            guest_email: Some(email.into()),
            ..Self::default()
        }
    }

    pub fn with_shipping_address(mut self, address: Address) -> Self {
        self.shipping_address = Some(address);
        self
    }

    /// Exactly one of user id and guest email, ignoring blank values.
    pub fn identity(&self) -> Option<CustomerIdentity> {
        let non_blank =
            |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from);

        match (non_blank(&self.user_id), non_blank(&self.guest_email)) {
            (Some(user), None) => Some(CustomerIdentity::User(user)),
            (None, Some(email)) => Some(CustomerIdentity::Guest(email)),
            _ => None,
        }
    }
}

/// Output of a successful checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResult {
    pub checkout_id: CheckoutId,
    pub order: Order,
    pub payment_required: bool,
    /// Placeholder until a payment provider is wired in.
    pub payment_client_secret: Option<String>,
    pub reservation_id: ReservationId,
    pub reservation_expires_at: DateTime<Utc>,
    pub subtotal: Money,
    pub discount: Money,
    pub shipping_cost: Money,
    pub tax: Money,
    pub tax_details: TaxCalculationResult,
    pub total: Money,
}
