//! Shared state behind the checkout service.
//!
//! Reservations and their per-SKU reserved counters, the transactional
//! outbox and the durable checkout log all live behind the traits in this
//! crate. Every trait method is one atomic operation against the backing
//! store, which is what lets the inventory ledger close the check-then-act
//! window on reservations.

pub mod error;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod publisher;
pub mod relay;
pub mod reservation;
pub mod saga_log;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use outbox::{OutboxMessage, OutboxStatus, OutboxStore};
pub use postgres::PostgresStore;
pub use publisher::{
    EventEnvelope, EventPublisher, InMemoryPublisher, NatsPublisher, NoopPublisher, PublishError,
};
pub use relay::{OutboxRelay, RelayReport};
pub use reservation::{
    Reservation, ReservationItem, ReservationStatus, ReservationStore, StockLevels,
};
pub use saga_log::{SagaLog, SagaLogEntry, Version};
