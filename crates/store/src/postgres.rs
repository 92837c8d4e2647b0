use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CheckoutId, ProductId, ReservationId, SkuKey, VariantId};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::outbox::{OutboxMessage, OutboxStatus, OutboxStore};
use crate::reservation::{
    Reservation, ReservationItem, ReservationStatus, ReservationStore, StockLevels,
};
use crate::saga_log::{SagaLog, SagaLogEntry, Version};
use crate::{Result, StoreError};

const RESERVATION_COLUMNS: &str = "id, items, status, created_at, expires_at";

/// PostgreSQL-backed store.
///
/// Each trait method runs in one transaction. Counter rows are locked with
/// `SELECT ... FOR UPDATE` in SKU key order so concurrent multi-SKU
/// reservations cannot deadlock.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_reservation(row: PgRow) -> Result<Reservation> {
        let items: serde_json::Value = row.try_get("items")?;
        let status: String = row.try_get("status")?;

        Ok(Reservation {
            id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            items: serde_json::from_value::<Vec<ReservationItem>>(items)?,
            status: ReservationStatus::parse(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("reservation status {status}")))?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    fn row_to_message(row: PgRow) -> Result<OutboxMessage> {
        let status: String = row.try_get("status")?;
        let attempts: i32 = row.try_get("attempts")?;

        Ok(OutboxMessage {
            id: row.try_get("id")?,
            topic: row.try_get("topic")?,
            payload: row.try_get("payload")?,
            status: OutboxStatus::parse(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("outbox status {status}")))?,
            attempts: u32::try_from(attempts).unwrap_or(0),
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_entry(row: PgRow) -> Result<SagaLogEntry> {
        Ok(SagaLogEntry {
            checkout_id: CheckoutId::from_uuid(row.try_get::<Uuid, _>("checkout_id")?),
            version: Version::new(row.try_get("version")?),
            entry_type: row.try_get("entry_type")?,
            payload: row.try_get("payload")?,
            terminal: row.try_get("terminal")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    fn sku_from_row(row: &PgRow) -> Result<SkuKey> {
        let product_id: String = row.try_get("product_id")?;
        let variant_id: Option<String> = row.try_get("variant_id")?;
        Ok(SkuKey::new(
            ProductId::new(product_id),
            variant_id.map(VariantId::new),
        ))
    }
}

async fn insert_outbox(conn: &mut PgConnection, messages: &[OutboxMessage]) -> Result<()> {
    for message in messages {
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (id, topic, payload, status, attempts, last_error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(message.id)
        .bind(&message.topic)
        .bind(&message.payload)
        .bind(message.status.as_str())
        .bind(i32::try_from(message.attempts).unwrap_or(i32::MAX))
        .bind(&message.last_error)
        .bind(message.created_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Subtracts quantities from counters, clamping at zero and deleting rows
/// that end at zero or below. `quantities` is iterated in key order.
async fn release_counters(conn: &mut PgConnection, quantities: &BTreeMap<SkuKey, i64>) -> Result<()> {
    for (sku, quantity) in quantities {
        let key = sku.counter_key();
        sqlx::query(
            "UPDATE reserved_counters SET reserved = GREATEST(reserved - $2, 0) WHERE sku_key = $1",
        )
        .bind(&key)
        .bind(quantity)
        .execute(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM reserved_counters WHERE sku_key = $1 AND reserved <= 0")
            .bind(&key)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl ReservationStore for PostgresStore {
    async fn insert_reservation(
        &self,
        reservation: &Reservation,
        stock: &StockLevels,
        outbox: Vec<OutboxMessage>,
    ) -> Result<()> {
        let quantities = reservation.quantities_by_sku();
        let mut tx = self.pool.begin().await?;

        // Make sure every counter row exists so it can be locked below.
        for sku in quantities.keys() {
            sqlx::query(
                r#"
                INSERT INTO reserved_counters (sku_key, product_id, variant_id, reserved)
                VALUES ($1, $2, $3, 0)
                ON CONFLICT (sku_key) DO NOTHING
                "#,
            )
            .bind(sku.counter_key())
            .bind(sku.product_id.as_str())
            .bind(sku.variant_id.as_ref().map(VariantId::as_str))
            .execute(&mut *tx)
            .await?;
        }

        for (sku, requested) in &quantities {
            let held: i64 = sqlx::query_scalar(
                "SELECT reserved FROM reserved_counters WHERE sku_key = $1 FOR UPDATE",
            )
            .bind(sku.counter_key())
            .fetch_one(&mut *tx)
            .await?;

            let available = stock.get(sku).copied().unwrap_or(0) - held;
            if available < *requested {
                // Dropping the transaction rolls back the placeholder rows.
                return Err(StoreError::InsufficientStock {
                    sku: sku.clone(),
                    requested: *requested,
                    available: available.max(0),
                });
            }
        }

        for (sku, requested) in &quantities {
            sqlx::query("UPDATE reserved_counters SET reserved = reserved + $2 WHERE sku_key = $1")
                .bind(sku.counter_key())
                .bind(requested)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO reservations (id, items, status, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(serde_json::to_value(&reservation.items)?)
        .bind(reservation.status.as_str())
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("reservations_pkey")
            {
                return StoreError::DuplicateReservation(reservation.id.to_string());
            }
            StoreError::Database(e)
        })?;

        insert_outbox(&mut tx, &outbox).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_reservation(
        &self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1 AND expires_at > $2"
        ))
        .bind(id.as_uuid())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_reservation).transpose()
    }

    async fn claim_reservation(
        &self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE reservations SET status = 'committing'
            WHERE id = $1 AND status = 'held' AND expires_at > $2
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_reservation).transpose()
    }

    async fn remove_reservation(
        &self,
        id: ReservationId,
        expected: ReservationStatus,
        now: DateTime<Utc>,
        outbox: Vec<OutboxMessage>,
    ) -> Result<Option<Reservation>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            DELETE FROM reservations
            WHERE id = $1 AND status = $2 AND ($2 = 'committing' OR expires_at > $3)
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let reservation = Self::row_to_reservation(row)?;

        release_counters(&mut tx, &reservation.quantities_by_sku()).await?;
        insert_outbox(&mut tx, &outbox).await?;

        tx.commit().await?;
        Ok(Some(reservation))
    }

    async fn reserved_quantity(&self, sku: &SkuKey) -> Result<i64> {
        let reserved: Option<i64> =
            sqlx::query_scalar("SELECT reserved FROM reserved_counters WHERE sku_key = $1")
                .bind(sku.counter_key())
                .fetch_optional(&self.pool)
                .await?;

        Ok(reserved.unwrap_or(0))
    }

    async fn counters(&self) -> Result<Vec<(SkuKey, i64)>> {
        let rows = sqlx::query(
            "SELECT product_id, variant_id, reserved FROM reserved_counters ORDER BY sku_key",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok((Self::sku_from_row(row)?, row.try_get("reserved")?)))
            .collect()
    }

    async fn delete_counter_if_non_positive(&self, sku: &SkuKey) -> Result<bool> {
        let result = sqlx::query("DELETE FROM reserved_counters WHERE sku_key = $1 AND reserved <= 0")
            .bind(sku.counter_key())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reclaim_expired(
        &self,
        now: DateTime<Utc>,
        notice: &(dyn for<'r> Fn(&'r Reservation) -> Result<OutboxMessage> + Send + Sync),
    ) -> Result<Vec<Reservation>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS} FROM reservations
            WHERE (status = 'held' AND expires_at <= $1)
               OR (status = 'committing' AND expires_at + (expires_at - created_at) <= $1)
            ORDER BY expires_at ASC
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let expired = rows
            .into_iter()
            .map(Self::row_to_reservation)
            .collect::<Result<Vec<_>>>()?;
        if expired.is_empty() {
            return Ok(expired);
        }

        let notices = expired
            .iter()
            .map(|r| notice(r))
            .collect::<Result<Vec<_>>>()?;

        let mut released: BTreeMap<SkuKey, i64> = BTreeMap::new();
        for reservation in &expired {
            sqlx::query("DELETE FROM reservations WHERE id = $1")
                .bind(reservation.id.as_uuid())
                .execute(&mut *tx)
                .await?;
            for (sku, quantity) in reservation.quantities_by_sku() {
                *released.entry(sku).or_insert(0) += quantity;
            }
        }

        release_counters(&mut tx, &released).await?;
        insert_outbox(&mut tx, &notices).await?;

        tx.commit().await?;
        Ok(expired)
    }
}

#[async_trait]
impl OutboxStore for PostgresStore {
    async fn enqueue(&self, message: OutboxMessage) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_outbox(&mut conn, std::slice::from_ref(&message)).await
    }

    async fn pending(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, topic, payload, status, attempts, last_error, created_at
            FROM outbox_messages
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE outbox_messages SET status = 'delivered', attempts = attempts + 1 WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        max_attempts: u32,
    ) -> Result<OutboxStatus> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE outbox_messages
            SET attempts = attempts + 1,
                last_error = $2,
                status = CASE WHEN attempts + 1 >= $3 THEN 'failed' ELSE 'pending' END
            WHERE id = $1
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
        .fetch_optional(&self.pool)
        .await?;

        let status = status.ok_or_else(|| StoreError::Corrupt(format!("unknown outbox message {id}")))?;
        OutboxStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("outbox status {status}")))
    }
}

#[async_trait]
impl SagaLog for PostgresStore {
    async fn append(&self, entry: SagaLogEntry, expected: Version) -> Result<Version> {
        let checkout_id = entry.checkout_id;
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM checkout_log WHERE checkout_id = $1")
                .bind(checkout_id.as_uuid())
                .fetch_one(&mut *tx)
                .await?;

        let actual = Version::new(current.unwrap_or(0));
        if actual != expected || entry.version != expected.next() {
            return Err(StoreError::ConcurrencyConflict {
                checkout_id,
                expected,
                actual,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO checkout_log (checkout_id, version, entry_type, payload, terminal, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(checkout_id.as_uuid())
        .bind(entry.version.as_i64())
        .bind(&entry.entry_type)
        .bind(&entry.payload)
        .bind(entry.terminal)
        .bind(entry.recorded_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_checkout_version")
            {
                return StoreError::ConcurrencyConflict {
                    checkout_id,
                    expected,
                    actual: entry.version,
                };
            }
            StoreError::Database(e)
        })?;

        tx.commit().await?;
        Ok(entry.version)
    }

    async fn load(&self, checkout_id: CheckoutId) -> Result<Vec<SagaLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT checkout_id, version, entry_type, payload, terminal, recorded_at
            FROM checkout_log
            WHERE checkout_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(checkout_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn open_checkouts(&self, idle_since: DateTime<Utc>) -> Result<Vec<CheckoutId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT checkout_id FROM (
                SELECT DISTINCT ON (checkout_id) checkout_id, terminal, recorded_at
                FROM checkout_log
                ORDER BY checkout_id, version DESC
            ) latest
            WHERE NOT terminal AND recorded_at <= $1
            ORDER BY recorded_at ASC
            "#,
        )
        .bind(idle_since)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(CheckoutId::from_uuid).collect())
    }
}
