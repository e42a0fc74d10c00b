//! Model metadata.

use crate::error::{StorageError, StorageResult};
use crate::predicate::Predicate;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Describes a model type: its name and its primary-key fields.
///
/// Composite keys are supported; the order of `primary_key` is significant
/// and is the order used whenever key values are combined.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDefinition {
    name: String,
    #[serde(default = "default_primary_key")]
    primary_key: Vec<String>,
}

fn default_primary_key() -> Vec<String> {
    vec!["id".to_string()]
}

impl ModelDefinition {
    /// Creates a definition keyed by the single field `id`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: default_primary_key(),
        }
    }

    /// Replaces the primary-key fields.
    ///
    /// An empty list falls back to `id`.
    #[must_use]
    pub fn with_primary_key<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        self.primary_key = if fields.is_empty() {
            default_primary_key()
        } else {
            fields
        };
        self
    }

    /// Model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Primary-key field names, in key order.
    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    /// Returns the record's primary-key values in key order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MissingKey`] if a key field is absent or null.
    pub fn key_values<'a>(&self, record: &'a Record) -> StorageResult<Vec<&'a Value>> {
        self.primary_key
            .iter()
            .map(|field| match record.get(field) {
                Some(value) if !value.is_null() => Ok(value),
                _ => Err(StorageError::MissingKey {
                    model: self.name.clone(),
                    field: field.clone(),
                }),
            })
            .collect()
    }

    /// Builds the equality predicate selecting this record by primary key.
    pub fn key_predicate(&self, record: &Record) -> StorageResult<Predicate> {
        let mut clauses: Vec<Predicate> = self
            .primary_key
            .iter()
            .zip(self.key_values(record)?)
            .map(|(field, value)| Predicate::eq(field.clone(), value.clone()))
            .collect();

        Ok(if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            Predicate::And(clauses)
        })
    }

    /// Encodes the primary key as an unambiguous index key.
    pub(crate) fn index_key(&self, record: &Record) -> StorageResult<String> {
        Ok(serde_json::to_string(&self.key_values(record)?)?)
    }
}
