//! Entity rows and the secondary property index.

use std::collections::BTreeMap;
use std::sync::Arc;

use sqlx::{Row, SqliteConnection};

use crate::{SqlCatalog, StoreError};

/// A persisted entity: opaque serialized bytes plus the current state name.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    /// Serialized entity snapshot.
    pub bytes: Vec<u8>,
    /// Persisted name of the current FSM state.
    pub state: String,
}

/// Read/write access to entity rows and their property index.
#[derive(Debug, Clone)]
pub struct EntityStore {
    sql: Arc<SqlCatalog>,
}

impl EntityStore {
    /// Store operating with the given catalog.
    pub fn new(sql: Arc<SqlCatalog>) -> Self {
        Self { sql }
    }

    /// Read the entity row for `(class, id)`.
    pub async fn read(
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

    /// Write the entity row for `(class, id)`, update-if-exists-else-insert.
    pub async fn save(
        &self,
        conn: &mut SqliteConnection,
        class: &str,
        id: &str,
        bytes: &[u8],
        state: &str,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(&self.sql.entity_update)
            .bind(bytes)
            .bind(state)
            .bind(class)
            .bind(id)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        if updated == 0 {
            sqlx::query(&self.sql.entity_insert)
                .bind(class)
                .bind(id)
                .bind(bytes)
                .bind(state)
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }

    /// Rebuild the property rows of `(class, id)` from `properties`.
    ///
    /// Delete-then-insert: after this call the index rows for the entity
    /// equal the map exactly; an empty map leaves no rows.
    pub async fn save_properties(
        &self,
        conn: &mut SqliteConnection,
        class: &str,
        id: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        sqlx::query(&self.sql.property_delete)
            .bind(class)
            .bind(id)
            .execute(&mut *conn)
            .await?;

        for (name, value) in properties {
            sqlx::query(&self.sql.property_insert)
                .bind(class)
                .bind(id)
                .bind(name)
                .bind(value)
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }
}
