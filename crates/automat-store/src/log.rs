//! Append-only log of every event applied to an entity.
//!
//! The runtime writes this inside the apply transaction when signal storage
//! is enabled and never reads it back; it exists for audit and offline
//! replay tooling.

use std::sync::Arc;

use sqlx::SqliteConnection;

use crate::{SqlCatalog, StoreError};

/// Appender for the signal store table.
#[derive(Debug, Clone)]
pub struct SignalLog {
    sql: Arc<SqlCatalog>,
}

impl SignalLog {
    /// Log operating with the given catalog.
    pub fn new(sql: Arc<SqlCatalog>) -> Self {
        Self { sql }
    }

    /// Append one processed event.
    pub async fn append(
        &self,
        conn: &mut SqliteConnection,
        class: &str,
        id: &str,
        event_class: &str,
        event_bytes: &[u8],
        ts: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(&self.sql.log_append)
            .bind(class)
            .bind(id)
            .bind(event_class)
            .bind(event_bytes)
            .bind(ts)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
