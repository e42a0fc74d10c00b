//! Dynamic model records.

use crate::error::StorageResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the version assigned by the remote authority.
pub const VERSION_FIELD: &str = "_version";
/// Field holding the remote last-change timestamp (milliseconds).
pub const LAST_CHANGED_AT_FIELD: &str = "_lastChangedAt";
/// Logical tombstone flag.
pub const DELETED_FIELD: &str = "_deleted";

/// All sync bookkeeping fields carried by persisted records.
pub const SYNC_METADATA_FIELDS: [&str; 3] = [VERSION_FIELD, LAST_CHANGED_AT_FIELD, DELETED_FIELD];

/// A model instance as a map of field names to JSON values.
///
/// Records are schema-less; a [`crate::ModelDefinition`] tells the storage
/// layer which fields form the primary key. Business fields and the sync
/// metadata fields (`_version`, `_lastChangedAt`, `_deleted`) live side by side.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use tidesync_storage::Record;
///
/// let record = Record::new()
///     .with_field("id", json!("a1"))
///     .with_field("_version", json!(3));
/// assert_eq!(record.version(), Some(3));
/// assert!(!record.is_deleted());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a record from a field map.
    #[must_use]
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Returns the value of a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns true if the field is present (even when null).
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Sets a field, returning the previous value.
    pub fn set(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Removes a field, returning its value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Returns the record with a field set.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: Value) -> Self {
        self.set(field, value);
        self
    }

    /// Returns a copy of this record with `mutate` applied to the copy.
    #[must_use]
    pub fn copy_of(&self, mutate: impl FnOnce(&mut Record)) -> Self {
        let mut copy = self.clone();
        mutate(&mut copy);
        copy
    }

    /// Copies every field of `other` over this record.
    pub fn extend(&mut self, other: Record) {
        self.0.extend(other.0);
    }

    /// Returns the underlying field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consumes the record, returning its field map.
    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `_version`, if present and a non-negative integer.
    pub fn version(&self) -> Option<u64> {
        self.0.get(VERSION_FIELD).and_then(Value::as_u64)
    }

    /// Returns `_lastChangedAt`, if present.
    pub fn last_changed_at(&self) -> Option<i64> {
        self.0.get(LAST_CHANGED_AT_FIELD).and_then(Value::as_i64)
    }

    /// Returns true if the record is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.0
            .get(DELETED_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Returns a copy holding only business fields.
    #[must_use]
    pub fn without_sync_metadata(&self) -> Self {
        self.copy_of(|record| {
            for field in SYNC_METADATA_FIELDS {
                record.remove(field);
            }
        })
    }

    /// Returns only the sync metadata fields that are present.
    #[must_use]
    pub fn sync_metadata(&self) -> Self {
        SYNC_METADATA_FIELDS
            .iter()
            .filter_map(|field| self.0.get(*field).map(|v| ((*field).to_string(), v.clone())))
            .collect()
    }

    /// Serializes the record to JSON text.
    pub fn to_json(&self) -> StorageResult<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Parses a record from JSON text.
    pub fn from_json(json: &str) -> StorageResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
