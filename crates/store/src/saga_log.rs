//! Durable, append-only checkout log.
//!
//! Each checkout attempt is a stream of entries versioned from 1. Appends
//! use optimistic concurrency: the caller states the version it expects the
//! stream to be at, and a mismatch fails with `ConcurrencyConflict`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::CheckoutId;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Version number of a checkout stream.
///
/// Versions start at 1 for the first entry; 0 means the stream is empty.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The version of an empty stream.
    pub fn initial() -> Self {
        Self(0)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry of a checkout stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaLogEntry {
    pub checkout_id: CheckoutId,
    pub version: Version,
    pub entry_type: String,
    pub payload: serde_json::Value,
    /// Set on the entry that ends the checkout; the recovery sweep skips
    /// streams whose last entry is terminal.
    pub terminal: bool,
    pub recorded_at: DateTime<Utc>,
}

impl SagaLogEntry {
    pub fn new(
        checkout_id: CheckoutId,
        version: Version,
        entry_type: impl Into<String>,
        payload: &impl Serialize,
        terminal: bool,
    ) -> Result<Self> {
        Ok(Self {
            checkout_id,
            version,
            entry_type: entry_type.into(),
            payload: serde_json::to_value(payload)?,
            terminal,
            recorded_at: Utc::now(),
        })
    }
}

#[async_trait]
pub trait SagaLog: Send + Sync {
    /// Appends one entry, expecting the stream to currently be at `expected`.
    ///
    /// Returns the new stream version.
    async fn append(&self, entry: SagaLogEntry, expected: Version) -> Result<Version>;

    /// All entries of a checkout in version order; empty if unknown.
    async fn load(&self, checkout_id: CheckoutId) -> Result<Vec<SagaLogEntry>>;

    /// Checkouts whose last entry is not terminal and was recorded at or
    /// before `idle_since`.
    async fn open_checkouts(&self, idle_since: DateTime<Utc>) -> Result<Vec<CheckoutId>>;
}
