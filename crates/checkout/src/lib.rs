//! Checkout saga.
//!
//! A checkout validates the cart, reserves stock, prices the order and asks
//! the order service to create it. Each step lands in the durable checkout
//! log first, so an interrupted checkout can be finished or undone by
//! [`CheckoutRecovery`].

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod recovery;
pub mod request;
pub mod saga;
pub mod services;
pub mod state;

pub use error::{CheckoutError, Result};
pub use events::{CHECKOUT_STARTED_TOPIC, CheckoutEvent, CheckoutStartedMessage};
pub use orchestrator::{CheckoutCollaborators, CheckoutOrchestrator};
pub use recovery::{CheckoutRecovery, DEFAULT_RECOVERY_GRACE, RecoveryReport};
pub use request::{CheckoutRequest, CheckoutResult, CustomerIdentity};
pub use saga::CheckoutSaga;
pub use services::{
    Cart, CartItem, CartService, FlatRateShipping, InMemoryCartService, InMemoryOrderService,
    Order, OrderDraft, OrderLine, OrderService,
};
pub use state::CheckoutState;
