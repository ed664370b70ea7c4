#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **automat-store** – SQLite persistence layer for automat.
//!
//! Backed by sqlx over SQLite: the [`Store`] wraps a connection pool (the
//! runtime's connection factory) and hands out the per-table access objects
//! the apply engine composes inside one transaction. All SQL lives in the
//! [`SqlCatalog`], a container of named parameterized statements whose text
//! users may override; the statement names and parameter positions are the
//! contract.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

mod catalog;
mod delayed;
mod entity;
mod log;
mod query;
mod queue;

pub use catalog::SqlCatalog;
pub use delayed::{DelayedQueue, DelayedSignal};
pub use entity::{EntityRecord, EntityStore};
pub use log::SignalLog;
pub use query::EntityQueries;
pub use queue::{QueuedSignal, SignalQueue};

//─────────────────────────────
//  Error type
//─────────────────────────────

/// Errors raised by the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A statement failed while bootstrapping the schema.
    #[error("schema bootstrap failed: {0}")]
    Schema(String),
    /// The underlying database reported an error.
    #[error("storage operation failed: {0}")]
    Database(#[from] sqlx::Error),
}

//─────────────────────────────
//  Store
//─────────────────────────────

/// Connection factory plus catalog: the root of the persistence layer.
///
/// Apply cycles and read queries each acquire a fresh pooled connection; no
/// connection is shared across tasks.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    sql: Arc<SqlCatalog>,
}

impl Store {
    /// Open or create a database file at `path`.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Self::from_pool(pool))
    }

    /// Open an in-memory database.
    ///
    /// The pool is pinned to one never-reaped connection; every pooled
    /// connection of a plain `sqlite::memory:` URL would otherwise see its
    /// own private database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool with the default catalog.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool, sql: Arc::new(SqlCatalog::default()) }
    }

    /// Wrap an existing pool with a custom catalog.
    pub fn with_catalog(pool: SqlitePool, sql: SqlCatalog) -> Self {
        Self { pool, sql: Arc::new(sql) }
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The statement catalog.
    pub fn catalog(&self) -> Arc<SqlCatalog> {
        Arc::clone(&self.sql)
    }

    /// Entity rows and the property index.
    pub fn entities(&self) -> EntityStore {
        EntityStore::new(Arc::clone(&self.sql))
    }

    /// The durable signal queue.
    pub fn signal_queue(&self) -> SignalQueue {
        SignalQueue::new(Arc::clone(&self.sql))
    }

    /// The delayed-signal queue.
    pub fn delayed_queue(&self) -> DelayedQueue {
        DelayedQueue::new(Arc::clone(&self.sql))
    }

    /// The append-only signal log.
    pub fn signal_log(&self) -> SignalLog {
        SignalLog::new(Arc::clone(&self.sql))
    }

    /// Read-side entity and property queries.
    pub fn queries(&self) -> EntityQueries {
        EntityQueries::new(Arc::clone(&self.sql))
    }

    /// Run the catalog's bootstrap script. Idempotent.
    pub async fn create_schema(&self) -> Result<(), StoreError> {
        let script = self.sql.create_schema.clone();
        self.create_schema_from(&script).await
    }

    /// Run a caller-supplied `;`-separated bootstrap script.
    pub async fn create_schema_from(&self, script: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        for statement in script.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&mut *conn).await.map_err(|e| {
                StoreError::Schema(format!("{e} while executing: {statement}"))
            })?;
        }
        debug!("schema bootstrap complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_bootstrap_is_idempotent() {
        let store = Store::in_memory().await.unwrap();
        store.create_schema().await.unwrap();
        store.create_schema().await.unwrap();
    }

    #[tokio::test]
    async fn schema_error_names_the_statement() {
        let store = Store::in_memory().await.unwrap();
        let err = store.create_schema_from("CREATE BOGUS").await.unwrap_err();
        match err {
            StoreError::Schema(msg) => assert!(msg.contains("CREATE BOGUS")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("automat.db");

        {
            let store = Store::open(&path).await.unwrap();
            store.create_schema().await.unwrap();
            let mut conn = store.pool().acquire().await.unwrap();
            store
                .signal_queue()
                .enqueue(&mut conn, "basket", "42", "e", b"{}", 5)
                .await
                .unwrap();
        }

        let store = Store::open(&path).await.unwrap();
        store.create_schema().await.unwrap();
        let mut conn = store.pool().acquire().await.unwrap();
        let rows = store.signal_queue().select_all(&mut conn).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "42");
    }
}
