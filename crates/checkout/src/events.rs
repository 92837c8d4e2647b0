//! Checkout saga log events.

use chrono::{DateTime, Utc};
use common::{CheckoutId, Money, ReservationId};
use serde::{Deserialize, Serialize};

/// Topic of the message enqueued when a checkout has created its order.
pub const CHECKOUT_STARTED_TOPIC: &str = "checkout.started";

/// Events recorded in the durable checkout log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CheckoutEvent {
    /// Validation passed; the saga is open.
    CheckoutStarted(CheckoutStartedData),

    /// Stock is held.
    ReservationAcquired(ReservationAcquiredData),

    /// The order service accepted the order.
    OrderCreated(OrderCreatedData),

    /// The checkout finished successfully (terminal).
    CheckoutCompleted(CompletedData),

    /// The checkout failed before anything needed undoing (terminal).
    CheckoutAborted(FailureData),

    /// A step after the reservation failed; the reservation is being released.
    CompensationStarted(FailureData),

    /// The reservation was released (terminal).
    Compensated(CompensatedData),

    /// Releasing the reservation failed; the expiry sweep reclaims it
    /// (terminal).
    CompensationFailed(FailureData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutStartedData {
    pub checkout_id: CheckoutId,
    pub cart_id: String,
    pub user_id: Option<String>,
    pub guest_email: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationAcquiredData {
    pub reservation_id: ReservationId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order_id: String,
    pub order_number: String,
    pub total: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedData {
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureData {
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensatedData {
    pub reservation_id: ReservationId,
    pub at: DateTime<Utc>,
}

/// Payload of the `checkout.started` outbox message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutStartedMessage {
    pub checkout_id: CheckoutId,
    pub reservation_id: ReservationId,
    pub order_id: String,
    pub order_number: String,
    pub total: Money,
    pub payment_required: bool,
}

impl CheckoutEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            CheckoutEvent::CheckoutStarted(_) => "CheckoutStarted",
            CheckoutEvent::ReservationAcquired(_) => "ReservationAcquired",
            CheckoutEvent::OrderCreated(_) => "OrderCreated",
            CheckoutEvent::CheckoutCompleted(_) => "CheckoutCompleted",
            CheckoutEvent::CheckoutAborted(_) => "CheckoutAborted",
            CheckoutEvent::CompensationStarted(_) => "CompensationStarted",
            CheckoutEvent::Compensated(_) => "Compensated",
            CheckoutEvent::CompensationFailed(_) => "CompensationFailed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckoutEvent::CheckoutCompleted(_)
                | CheckoutEvent::CheckoutAborted(_)
                | CheckoutEvent::Compensated(_)
                | CheckoutEvent::CompensationFailed(_)
        )
    }

    pub fn checkout_started(
        checkout_id: CheckoutId,
        cart_id: impl Into<String>,
        user_id: Option<String>,
        guest_email: Option<String>,
    ) -> Self {
        CheckoutEvent::CheckoutStarted(CheckoutStartedData {
            checkout_id,
            cart_id: cart_id.into(),
            user_id,
            guest_email,
            started_at: Utc::now(),
        })
    }

    pub fn reservation_acquired(reservation_id: ReservationId, expires_at: DateTime<Utc>) -> Self {
        CheckoutEvent::ReservationAcquired(ReservationAcquiredData {
            reservation_id,
            expires_at,
        })
    }

    pub fn order_created(
        order_id: impl Into<String>,
        order_number: impl Into<String>,
        total: Money,
    ) -> Self {
        CheckoutEvent::OrderCreated(OrderCreatedData {
            order_id: order_id.into(),
            order_number: order_number.into(),
            total,
        })
    }

    pub fn completed() -> Self {
        CheckoutEvent::CheckoutCompleted(CompletedData {
            completed_at: Utc::now(),
        })
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        CheckoutEvent::CheckoutAborted(FailureData {
            reason: reason.into(),
            at: Utc::now(),
        })
    }

    pub fn compensation_started(reason: impl Into<String>) -> Self {
        CheckoutEvent::CompensationStarted(FailureData {
            reason: reason.into(),
            at: Utc::now(),
        })
    }

    pub fn compensated(reservation_id: ReservationId) -> Self {
        CheckoutEvent::Compensated(CompensatedData {
            reservation_id,
            at: Utc::now(),
        })
    }

    pub fn compensation_failed(reason: impl Into<String>) -> Self {
        CheckoutEvent::CompensationFailed(FailureData {
            reason: reason.into(),
            at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = CheckoutEvent::aborted("out of stock");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "CheckoutAborted");
        assert_eq!(json["data"]["reason"], "out of stock");

        let back: CheckoutEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_terminal_events() {
        assert!(CheckoutEvent::completed().is_terminal());
        assert!(CheckoutEvent::aborted("x").is_terminal());
        assert!(CheckoutEvent::compensated(ReservationId::new()).is_terminal());
        assert!(CheckoutEvent::compensation_failed("x").is_terminal());
        assert!(!CheckoutEvent::compensation_started("x").is_terminal());
        assert!(
            !CheckoutEvent::reservation_acquired(ReservationId::new(), Utc::now()).is_terminal()
        );
    }
}
