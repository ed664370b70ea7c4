//! Durable FIFO of undelivered non-delayed signals.

use std::sync::Arc;

use sqlx::{Row, SqliteConnection};

use crate::{SqlCatalog, StoreError};

/// One undelivered row of the signal queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedSignal {
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
}

/// Append/probe/delete access to the signal queue.
///
/// Sequence numbers are assigned by the store and strictly increase for its
/// whole life; delivery order follows ascending sequence number.
#[derive(Debug, Clone)]
pub struct SignalQueue {
    sql: Arc<SqlCatalog>,
}

impl SignalQueue {
    /// Queue operating with the given catalog.
    pub fn new(sql: Arc<SqlCatalog>) -> Self {
        Self { sql }
    }

    /// Insert one row and return its assigned sequence number.
    pub async fn enqueue(
        &self,
        conn: &mut SqliteConnection,
        class: &str,
        id: &str,
        event_class: &str,
        event_bytes: &[u8],
        ts: i64,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(&self.sql.signal_insert)
            .bind(class)
            .bind(id)
            .bind(event_class)
            .bind(event_bytes)
            .bind(ts)
            .execute(&mut *conn)
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// Whether the row with `seq` is still undelivered.
    pub async fn exists(&self, conn: &mut SqliteConnection, seq: i64) -> Result<bool, StoreError> {
        let row = sqlx::query(&self.sql.signal_exists)
            .bind(seq)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.is_some())
    }

    /// Remove the row with `seq`.
    pub async fn delete(&self, conn: &mut SqliteConnection, seq: i64) -> Result<(), StoreError> {
        sqlx::query(&self.sql.signal_delete).bind(seq).execute(&mut *conn).await?;
        Ok(())
    }

    /// All undelivered rows in ascending sequence order.
    pub async fn select_all(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<Vec<QueuedSignal>, StoreError> {
        let rows = sqlx::query(&self.sql.signal_select_all).fetch_all(&mut *conn).await?;

        Ok(rows
            .into_iter()
            .map(|row| QueuedSignal {
                seq: row.get("seq"),
                class: row.get("cls"),
                id: row.get("id"),
                event_class: row.get("event_cls"),
                event_bytes: row.get("event_bytes"),
            })
            .collect())
    }
}
