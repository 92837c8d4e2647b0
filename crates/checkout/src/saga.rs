//! A checkout instance folded from its log.

use chrono::{DateTime, Utc};
use common::{CheckoutId, ReservationId};
use serde::Serialize;
use store::{SagaLog, SagaLogEntry, Version};

use crate::events::CheckoutEvent;
use crate::state::CheckoutState;

/// Current view of one checkout attempt.
///
/// Built by replaying the checkout log; the orchestrator keeps it in step
/// with every entry it appends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSaga {
    checkout_id: CheckoutId,
    version: Version,
    state: CheckoutState,
    cart_id: Option<String>,
    reservation_id: Option<ReservationId>,
    reservation_expires_at: Option<DateTime<Utc>>,
    order_id: Option<String>,
    order_number: Option<String>,
    failure_reason: Option<String>,
    started_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl CheckoutSaga {
    pub fn new(checkout_id: CheckoutId) -> Self {
        Self {
            checkout_id,
            version: Version::initial(),
            state: CheckoutState::NotStarted,
            cart_id: None,
            reservation_id: None,
            reservation_expires_at: None,
            order_id: None,
            order_number: None,
            failure_reason: None,
            started_at: None,
            updated_at: None,
        }
    }

    /// Replays log entries in version order.
    pub fn from_entries(
        checkout_id: CheckoutId,
        entries: &[SagaLogEntry],
    ) -> Result<Self, serde_json::Error> {
        let mut saga = Self::new(checkout_id);
        for entry in entries {
            let event: CheckoutEvent = serde_json::from_value(entry.payload.clone())?;
            saga.apply(&event);
            saga.version = entry.version;
            saga.updated_at = Some(entry.recorded_at);
        }
        Ok(saga)
    }

    pub fn apply(&mut self, event: &CheckoutEvent) {
        match event {
            CheckoutEvent::CheckoutStarted(data) => {
                self.state = CheckoutState::Started;
                self.cart_id = Some(data.cart_id.clone());
                self.started_at = Some(data.started_at);
            }
            CheckoutEvent::ReservationAcquired(data) => {
                self.state = CheckoutState::Reserved;
                self.reservation_id = Some(data.reservation_id);
                self.reservation_expires_at = Some(data.expires_at);
            }
            CheckoutEvent::OrderCreated(data) => {
                self.state = CheckoutState::OrderCreated;
                self.order_id = Some(data.order_id.clone());
                self.order_number = Some(data.order_number.clone());
            }
            CheckoutEvent::CheckoutCompleted(_) => {
                self.state = CheckoutState::Completed;
            }
            CheckoutEvent::CheckoutAborted(data) => {
                self.state = CheckoutState::Aborted;
                self.failure_reason = Some(data.reason.clone());
            }
            CheckoutEvent::CompensationStarted(data) => {
                self.state = CheckoutState::Compensating;
                self.failure_reason = Some(data.reason.clone());
            }
            CheckoutEvent::Compensated(_) => {
                self.state = CheckoutState::Compensated;
            }
            CheckoutEvent::CompensationFailed(_) => {
                // The original failure reason is kept.
                self.state = CheckoutState::CompensationFailed;
            }
        }
    }

    /// Appends `event` at the next version and applies it.
    pub async fn record<L>(&mut self, log: &L, event: CheckoutEvent) -> store::Result<()>
    where
        L: SagaLog + ?Sized,
    {
        let next = self.version.next();
        let entry = SagaLogEntry::new(
            self.checkout_id,
            next,
            event.event_type(),
            &event,
            event.is_terminal(),
        )?;
        let recorded_at = entry.recorded_at;

        log.append(entry, self.version).await?;

        self.apply(&event);
        self.version = next;
        self.updated_at = Some(recorded_at);
        Ok(())
    }
}

// Query methods
impl CheckoutSaga {
    pub fn checkout_id(&self) -> CheckoutId {
        self.checkout_id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn state(&self) -> CheckoutState {
        self.state
    }

    pub fn cart_id(&self) -> Option<&str> {
        self.cart_id.as_deref()
    }

    pub fn reservation_id(&self) -> Option<ReservationId> {
        self.reservation_id
    }

    pub fn order_id(&self) -> Option<&str> {
        self.order_id.as_deref()
    }

    pub fn order_number(&self) -> Option<&str> {
        self.order_number.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}
