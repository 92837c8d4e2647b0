//! Checkout state machine.

use serde::{Deserialize, Serialize};

/// The state of a checkout in its lifecycle.
///
/// State transitions:
/// ```text
/// NotStarted ──► Started ──┬──► Reserved ──┬──► OrderCreated ──► Completed
///                          │               └──► Compensating ──┬──► Compensated
///                          └──► Aborted                        └──► CompensationFailed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CheckoutState {
    #[default]
    NotStarted,

    /// Validated, no stock held yet.
    Started,

    /// Stock held; a failure from here on must release it.
    Reserved,

    /// The order exists; only the completion record is missing.
    OrderCreated,

    /// Terminal.
    Completed,

    /// Failed before stock was held (terminal).
    Aborted,

    /// Releasing the reservation after a failure.
    Compensating,

    /// Terminal.
    Compensated,

    /// Terminal; the expiry sweep releases the stock.
    CompensationFailed,
}

impl CheckoutState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckoutState::Completed
                | CheckoutState::Aborted
                | CheckoutState::Compensated
                | CheckoutState::CompensationFailed
        )
    }

    /// Whether a failure in this state requires releasing the reservation.
    pub fn holds_reservation(&self) -> bool {
        matches!(self, CheckoutState::Reserved | CheckoutState::Compensating)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutState::NotStarted => "NotStarted",
            CheckoutState::Started => "Started",
            CheckoutState::Reserved => "Reserved",
            CheckoutState::OrderCreated => "OrderCreated",
            CheckoutState::Completed => "Completed",
            CheckoutState::Aborted => "Aborted",
            CheckoutState::Compensating => "Compensating",
            CheckoutState::Compensated => "Compensated",
            CheckoutState::CompensationFailed => "CompensationFailed",
        }
    }
}

impl std::fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_not_started() {
        assert_eq!(CheckoutState::default(), CheckoutState::NotStarted);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!CheckoutState::Started.is_terminal());
        assert!(!CheckoutState::Reserved.is_terminal());
        assert!(!CheckoutState::OrderCreated.is_terminal());
        assert!(!CheckoutState::Compensating.is_terminal());
        assert!(CheckoutState::Completed.is_terminal());
        assert!(CheckoutState::Aborted.is_terminal());
        assert!(CheckoutState::Compensated.is_terminal());
        assert!(CheckoutState::CompensationFailed.is_terminal());
    }

    #[test]
    fn test_holds_reservation() {
        assert!(CheckoutState::Reserved.holds_reservation());
        assert!(CheckoutState::Compensating.holds_reservation());
        assert!(!CheckoutState::OrderCreated.holds_reservation());
        assert!(!CheckoutState::Started.holds_reservation());
    }

    #[test]
    fn test_display() {
        assert_eq!(CheckoutState::Compensated.to_string(), "Compensated");
        assert_eq!(CheckoutState::OrderCreated.to_string(), "OrderCreated");
    }
}
