//! Typed read-side lookups.
//!
//! Thin decoding wrappers over the store's query SQL: each call acquires one
//! pooled connection, runs its statements, and decodes entity bytes with the
//! configured entity codec. No transaction guarantees beyond the single
//! connection.

use std::collections::{BTreeMap, BTreeSet};

use automat_store::StoreError;
use automat_types::EntityClass;

use crate::{Runtime, RuntimeError};

/// How multiple property constraints are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combine {
    /// Entities matching every constraint.
    And,
    /// Entities matching at least one constraint.
    Or,
}

/// Parameters of a ranged property lookup.
///
/// Selects entities of one class where the property `name` equals `value`
/// and the numeric property `range_name` lies within the given bounds.
/// Results are ordered by id; `last_id` is the exclusive cursor carried over
/// from the previous page.
#[derive(Debug, Clone)]
pub struct RangeQuery<'a> {
    /// Property name to match exactly.
    pub name: &'a str,
    /// Property value to match exactly.
    pub value: &'a str,
    /// Name of the numeric property the range applies to.
    pub range_name: &'a str,
    /// Lower bound of the range.
    pub start: i64,
    /// Whether `start` itself is included.
    pub start_inclusive: bool,
    /// Upper bound of the range.
    pub end: i64,
    /// Whether `end` itself is included.
    pub end_inclusive: bool,
    /// Maximum number of results.
    pub limit: i64,
    /// Last id seen on the previous page, exclusive.
    pub last_id: Option<&'a str>,
}

impl Runtime {
    /// The entity `(E::NAME, id)`, if present.
    pub async fn get<E: EntityClass>(&self, id: &str) -> Result<Option<E>, RuntimeError> {
        Ok(self.get_with_state::<E>(id).await?.map(|(entity, _)| entity))
    }

    /// The entity together with its persisted state name.
    pub async fn get_with_state<E: EntityClass>(
        &self,
        id: &str,
    ) -> Result<Option<(E, String)>, RuntimeError> {
        let mut conn = self.store().pool().acquire().await.map_err(StoreError::from)?;
        let record = self.store().queries().entity(&mut conn, E::NAME, id).await?;
        match record {
            Some(record) => {
                let entity = self.entity_codec().from_bytes(&record.bytes)?;
                Ok(Some((entity, record.state)))
            }
            None => Ok(None),
        }
    }

    /// Every entity of class `E`, ascending by id.
    pub async fn list_all<E: EntityClass>(&self) -> Result<Vec<(String, E)>, RuntimeError> {
        let mut conn = self.store().pool().acquire().await.map_err(StoreError::from)?;
        let rows = self.store().queries().list_class(&mut conn, E::NAME).await?;
        rows.into_iter()
            .map(|(id, bytes)| Ok((id, self.entity_codec().from_bytes(&bytes)?)))
            .collect()
    }

    /// Entities of class `E` holding the property `name = value`.
    pub async fn get_by_property<E: EntityClass>(
        &self,
        name: &str,
        value: &str,
    ) -> Result<Vec<(String, E)>, RuntimeError> {
        let mut ids = {
            let mut conn = self.store().pool().acquire().await.map_err(StoreError::from)?;
            self.store().queries().ids_by_property(&mut conn, E::NAME, name, value).await?
        };
        ids.sort();
        ids.dedup();
        self.fetch_by_ids(ids).await
    }

    /// Entities matching a set of property constraints.
    ///
    /// Per-constraint id sets are combined in memory; an empty constraint
    /// map matches nothing.
    pub async fn get_by_properties<E: EntityClass>(
        &self,
        properties: &BTreeMap<String, String>,
        combine: Combine,
    ) -> Result<Vec<(String, E)>, RuntimeError> {
        if properties.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.store().pool().acquire().await.map_err(StoreError::from)?;
        let queries = self.store().queries();

        let mut combined: Option<BTreeSet<String>> = None;
        for (name, value) in properties {
            let ids: BTreeSet<String> = queries
                .ids_by_property(&mut conn, E::NAME, name, value)
                .await?
                .into_iter()
                .collect();
            combined = Some(match (combined, combine) {
                (None, _) => ids,
                (Some(acc), Combine::And) => acc.intersection(&ids).cloned().collect(),
                (Some(acc), Combine::Or) => acc.union(&ids).cloned().collect(),
            });
        }
        drop(conn);

        let ids = combined.unwrap_or_default().into_iter().collect();
        self.fetch_by_ids(ids).await
    }

    /// Ranged property lookup with deterministic id-cursor pagination.
    pub async fn get_by_property_range<E: EntityClass>(
        &self,
        query: RangeQuery<'_>,
    ) -> Result<Vec<(String, E)>, RuntimeError> {
        let mut conn = self.store().pool().acquire().await.map_err(StoreError::from)?;
        let rows = self
            .store()
            .queries()
            .by_property_range(
                &mut conn,
                E::NAME,
                query.name,
                query.value,
                query.range_name,
                query.start,
                query.start_inclusive,
                query.end,
                query.end_inclusive,
                query.limit,
                query.last_id,
            )
            .await?;
        rows.into_iter()
            .map(|(id, bytes)| Ok((id, self.entity_codec().from_bytes(&bytes)?)))
            .collect()
    }

    async fn fetch_by_ids<E: EntityClass>(
        &self,
        ids: Vec<String>,
    ) -> Result<Vec<(String, E)>, RuntimeError> {
        let mut conn = self.store().pool().acquire().await.map_err(StoreError::from)?;
        let queries = self.store().queries();
        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = queries.entity(&mut conn, E::NAME, &id).await? {
                entities.push((id, self.entity_codec().from_bytes(&record.bytes)?));
            }
        }
        Ok(entities)
    }
}
