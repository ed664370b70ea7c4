//! Durable table of timed signals, cancellable by (from → to) key.

use std::sync::Arc;

use sqlx::{Row, SqliteConnection};

use crate::{SqlCatalog, StoreError};

/// One pending row of the delayed-signal queue.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayedSignal {
    /// Assigned sequence number.
    pub seq: i64,
    /// Target entity class.
    pub class: String,
    /// Target entity id.
    pub id: String,
    /// Event class name.
    pub event_class: String,
    /// Serialized event payload.
    pub event_bytes: Vec<u8>,
    /// Delivery time in epoch milliseconds.
    pub fire_at: i64,
}

/// Access to the delayed-signal queue.
///
/// The cancellation key is `(from_cls, from_id, cls, id)`; at most one live
/// row exists per key, and re-sending replaces the outstanding one.
#[derive(Debug, Clone)]
pub struct DelayedQueue {
    sql: Arc<SqlCatalog>,
}

impl DelayedQueue {
    /// Queue operating with the given catalog.
    pub fn new(sql: Arc<SqlCatalog>) -> Self {
        Self { sql }
    }

    /// Insert a timed signal from `(from_class, from_id)` to `(class, id)`.
    ///
    /// The row for the same cancellation key is deleted first, so the new
    /// row replaces any outstanding one.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        from_class: &str,
        from_id: &str,
        class: &str,
        id: &str,
        event_class: &str,
        event_bytes: &[u8],
        fire_at: i64,
    ) -> Result<i64, StoreError> {
        self.delete_by_key(conn, from_class, from_id, class, id).await?;

        let result = sqlx::query(&self.sql.delayed_insert)
            .bind(from_class)
            .bind(from_id)
            .bind(class)
            .bind(id)
            .bind(event_class)
            .bind(event_bytes)
            .bind(fire_at)
            .execute(&mut *conn)
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// Delete the row for the cancellation key, if any.
    pub async fn delete_by_key(
        &self,
        conn: &mut SqliteConnection,
        from_class: &str,
        from_id: &str,
        class: &str,
        id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(&self.sql.delayed_delete_by_key)
            .bind(from_class)
            .bind(from_id)
            .bind(class)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Whether the row with `seq` is still pending.
    pub async fn exists(&self, conn: &mut SqliteConnection, seq: i64) -> Result<bool, StoreError> {
        let row = sqlx::query(&self.sql.delayed_exists)
            .bind(seq)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.is_some())
    }

    /// Remove the row with `seq`.
    pub async fn delete(&self, conn: &mut SqliteConnection, seq: i64) -> Result<(), StoreError> {
        sqlx::query(&self.sql.delayed_delete).bind(seq).execute(&mut *conn).await?;
        Ok(())
    }

    /// All pending rows in ascending sequence order; used on startup.
    pub async fn select_all(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<Vec<DelayedSignal>, StoreError> {
        let rows = sqlx::query(&self.sql.delayed_select_all).fetch_all(&mut *conn).await?;

        Ok(rows
            .into_iter()
            .map(|row| DelayedSignal {
                seq: row.get("seq"),
                class: row.get("cls"),
                id: row.get("id"),
                event_class: row.get("event_cls"),
                event_bytes: row.get("event_bytes"),
                fire_at: row.get("times"),
            })
            .collect())
    }
}
