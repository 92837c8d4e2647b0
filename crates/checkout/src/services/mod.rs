//! Collaborator traits and in-memory implementations.

pub mod cart;
pub mod order;
pub mod shipping;

pub use cart::{Cart, CartItem, CartService, InMemoryCartService};
pub use order::{InMemoryOrderService, Order, OrderDraft, OrderLine, OrderService};
pub use shipping::FlatRateShipping;
