//! Read-side lookups over entities and the property index.
//!
//! No transaction guarantees beyond a single connection; these are the SQL
//! half of the runtime's query API.

use std::sync::Arc;

use sqlx::{Row, SqliteConnection};

use crate::{EntityRecord, SqlCatalog, StoreError};

/// Read-only queries over entity rows and property rows.
#[derive(Debug, Clone)]
pub struct EntityQueries {
    sql: Arc<SqlCatalog>,
}

impl EntityQueries {
    /// Queries operating with the given catalog.
    pub fn new(sql: Arc<SqlCatalog>) -> Self {
        Self { sql }
    }

    /// The entity row for `(class, id)`.
    pub async fn entity(
        &self,
        conn: &mut SqliteConnection,
        class: &str,
        id: &str,
    ) -> Result<Option<EntityRecord>, StoreError> {
        let row = sqlx::query(&self.sql.entity_select)
            .bind(class)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(|row| EntityRecord { bytes: row.get("bytes"), state: row.get("state") }))
    }

    /// All `(id, bytes)` of a class, ascending by id.
    pub async fn list_class(
        &self,
        conn: &mut SqliteConnection,
        class: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let rows = sqlx::query(&self.sql.entity_list).bind(class).fetch_all(&mut *conn).await?;
        Ok(rows.into_iter().map(|row| (row.get("id"), row.get("bytes"))).collect())
    }

    /// Ids of entities holding the property `name = value`.
    pub async fn ids_by_property(
        &self,
        conn: &mut SqliteConnection,
        class: &str,
        name: &str,
        value: &str,
    ) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(&self.sql.property_ids)
            .bind(class)
            .bind(name)
            .bind(value)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    /// Ranged property lookup with id-cursor pagination.
    ///
    /// Selects entities where `name = value` and the numeric property
    /// `range_name` falls inside the given bounds. Exclusive bounds are
    /// normalized to inclusive by a saturating step, which is exact for the
    /// 64-bit integer domain range properties live in. Results are ordered
    /// by id; `last_id` is the exclusive cursor from the previous page.
    #[allow(clippy::too_many_arguments)]
    pub async fn by_property_range(
        &self,
        conn: &mut SqliteConnection,
        class: &str,
        name: &str,
        value: &str,
        range_name: &str,
        range_start: i64,
        start_inclusive: bool,
        range_end: i64,
        end_inclusive: bool,
        limit: i64,
        last_id: Option<&str>,
    ) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let start = if start_inclusive { range_start } else { range_start.saturating_add(1) };
        let end = if end_inclusive { range_end } else { range_end.saturating_sub(1) };
        if start > end || limit <= 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&self.sql.property_range)
            .bind(class)
            .bind(name)
            .bind(value)
            .bind(range_name)
            .bind(start)
            .bind(end)
            .bind(last_id.unwrap_or(""))
            .bind(limit)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows.into_iter().map(|row| (row.get("id"), row.get("bytes"))).collect())
    }
}
