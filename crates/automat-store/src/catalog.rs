//! Named parameterized statements for the persistence schema.
//!
//! Statement names and their positional parameter shapes are the contract;
//! the SQL text is user-replaceable for dialect variations. The defaults
//! target SQLite.

/// Container of the named statements used by the stores.
///
/// Every field is a single parameterized statement except
/// [`SqlCatalog::create_schema`], which is a `;`-separated script executed
/// statement by statement during bootstrap.
#[derive(Debug, Clone)]
pub struct SqlCatalog {
    /// Schema bootstrap script. Must be idempotent.
    pub create_schema: String,

    /// Insert one signal row. Params: `cls, id, event_cls, event_bytes, ts`.
    pub signal_insert: String,
    /// Probe a signal row by sequence number. Params: `seq`.
    pub signal_exists: String,
    /// Delete a signal row. Params: `seq`.
    pub signal_delete: String,
    /// All signal rows in ascending sequence order. No params.
    pub signal_select_all: String,

    /// Insert one delayed row. Params:
    /// `from_cls, from_id, cls, id, event_cls, event_bytes, times`.
    pub delayed_insert: String,
    /// Probe a delayed row by sequence number. Params: `seq`.
    pub delayed_exists: String,
    /// Delete a delayed row. Params: `seq`.
    pub delayed_delete: String,
    /// Delete by cancellation key. Params: `from_cls, from_id, cls, id`.
    pub delayed_delete_by_key: String,
    /// All delayed rows in ascending sequence order. No params.
    pub delayed_select_all: String,

    /// Read entity bytes and state. Params: `cls, id`.
    pub entity_select: String,
    /// Insert a fresh entity row. Params: `cls, id, bytes, state`.
    pub entity_insert: String,
    /// Update an existing entity row. Params: `bytes, state, cls, id`.
    pub entity_update: String,
    /// All `(id, bytes)` of a class in ascending id order. Params: `cls`.
    pub entity_list: String,

    /// Drop all property rows of one entity. Params: `cls, id`.
    pub property_delete: String,
    /// Insert one property row. Params: `cls, id, name, value`.
    pub property_insert: String,
    /// Ids holding a property value. Params: `cls, name, value`.
    pub property_ids: String,
    /// Ranged property lookup with id-cursor pagination. Params:
    /// `cls, name, value, range_name, range_start, range_end, last_id,
    /// limit`; the range bounds are inclusive and compared numerically.
    pub property_range: String,

    /// Append one row to the signal store.
    /// Params: `cls, id, event_cls, event_bytes, ts`.
    pub log_append: String,
}

impl Default for SqlCatalog {
    fn default() -> Self {
        Self {
            create_schema: include_str!("schema.sql").to_string(),

            signal_insert: "INSERT INTO signal_queue (cls, id, event_cls, event_bytes, ts) \
                            VALUES (?, ?, ?, ?, ?)"
                .to_string(),
            signal_exists: "SELECT 1 FROM signal_queue WHERE seq = ?".to_string(),
            signal_delete: "DELETE FROM signal_queue WHERE seq = ?".to_string(),
            signal_select_all: "SELECT seq, cls, id, event_cls, event_bytes FROM signal_queue \
                                ORDER BY seq"
                .to_string(),

            delayed_insert: "INSERT INTO delayed_signal_queue \
                             (from_cls, from_id, cls, id, event_cls, event_bytes, times) \
                             VALUES (?, ?, ?, ?, ?, ?, ?)"
                .to_string(),
            delayed_exists: "SELECT 1 FROM delayed_signal_queue WHERE seq = ?".to_string(),
            delayed_delete: "DELETE FROM delayed_signal_queue WHERE seq = ?".to_string(),
            delayed_delete_by_key: "DELETE FROM delayed_signal_queue \
                                    WHERE from_cls = ? AND from_id = ? AND cls = ? AND id = ?"
                .to_string(),
            delayed_select_all: "SELECT seq, cls, id, event_cls, event_bytes, times \
                                 FROM delayed_signal_queue ORDER BY seq"
                .to_string(),

            entity_select: "SELECT bytes, state FROM entity WHERE cls = ? AND id = ?".to_string(),
            entity_insert: "INSERT INTO entity (cls, id, bytes, state) VALUES (?, ?, ?, ?)"
                .to_string(),
            entity_update: "UPDATE entity SET bytes = ?, state = ? WHERE cls = ? AND id = ?"
                .to_string(),
            entity_list: "SELECT id, bytes FROM entity WHERE cls = ? ORDER BY id".to_string(),

            property_delete: "DELETE FROM entity_property WHERE cls = ? AND id = ?".to_string(),
            property_insert: "INSERT INTO entity_property (cls, id, name, value) \
                              VALUES (?, ?, ?, ?)"
                .to_string(),
            property_ids: "SELECT id FROM entity_property \
                           WHERE cls = ? AND name = ? AND value = ?"
                .to_string(),
            property_range: "SELECT e.id, e.bytes FROM entity e \
                             JOIN entity_property p \
                               ON p.cls = e.cls AND p.id = e.id \
                             JOIN entity_property r \
                               ON r.cls = e.cls AND r.id = e.id \
                             WHERE e.cls = ? AND p.name = ? AND p.value = ? \
                               AND r.name = ? \
                               AND CAST(r.value AS INTEGER) >= ? \
                               AND CAST(r.value AS INTEGER) <= ? \
                               AND e.id > ? \
                             ORDER BY e.id \
                             LIMIT ?"
                .to_string(),

            log_append: "INSERT INTO signal_store (cls, id, event_cls, event_bytes, ts) \
                         VALUES (?, ?, ?, ?, ?)"
                .to_string(),
        }
    }
}
