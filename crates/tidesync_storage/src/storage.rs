//! Storage trait definitions.

use crate::error::StorageResult;
use crate::model::ModelDefinition;
use crate::predicate::Predicate;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of write a storage operation performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpType {
    /// No record with the same primary key existed.
    Insert,
    /// An existing record was replaced.
    Update,
    /// A record was removed.
    Delete,
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpType::Insert => "INSERT",
            OpType::Update => "UPDATE",
            OpType::Delete => "DELETE",
        })
    }
}

/// Which end of a table [`Storage::query_one`] reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOne {
    /// Oldest record by insertion order.
    First,
    /// Newest record by insertion order.
    Last,
}

/// Opaque marker identifying the component that issued a write.
///
/// Every sync component creates its own token and threads it through its
/// storage writes. Change notifications carry the token back, so a component
/// can ignore the echoes of its own writes. Tokens can only be compared; two
/// independently created tokens are never equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerToken(Uuid);

impl OwnerToken {
    /// Creates a new unique token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner:{}", self.0.simple())
    }
}

/// A record store organised in per-model tables.
///
/// Implementations persist [`Record`]s keyed by the primary key described by
/// a [`ModelDefinition`], and keep each table in insertion order.
///
/// # Invariants
///
/// - `save` reports [`OpType::Insert`] when no record with the same primary
///   key exists, otherwise [`OpType::Update`]; an update keeps the record's
///   original insertion position
/// - `query` returns records in insertion order
/// - Absence is never an error: missing records yield empty results
/// - Implementations must be `Send + Sync`
pub trait Storage: Send + Sync {
    /// Returns all records of `model` matching `predicate` (all when `None`).
    fn query(
        &self,
        model: &ModelDefinition,
        predicate: Option<&Predicate>,
    ) -> StorageResult<Vec<Record>>;

    /// Returns the first or last record of `model` by insertion order.
    fn query_one(
        &self,
        model: &ModelDefinition,
        position: QueryOne,
    ) -> StorageResult<Option<Record>>;

    /// Inserts or replaces a record.
    ///
    /// When `condition` is given and a record with the same key already
    /// exists, the stored record must match it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ConditionFailed`] if the condition
    /// rejects the write, or [`crate::StorageError::MissingKey`] if the record
    /// has no primary key.
    fn save(
        &self,
        model: &ModelDefinition,
        record: Record,
        condition: Option<&Predicate>,
        owner: Option<&OwnerToken>,
    ) -> StorageResult<(Record, OpType)>;

    /// Deletes the record with the same primary key as `record`.
    ///
    /// Returns the deleted records (empty when nothing was stored).
    fn delete(
        &self,
        model: &ModelDefinition,
        record: &Record,
        owner: Option<&OwnerToken>,
    ) -> StorageResult<Vec<Record>>;

    /// Deletes every record of `model` matching `predicate`.
    fn delete_where(
        &self,
        model: &ModelDefinition,
        predicate: &Predicate,
        owner: Option<&OwnerToken>,
    ) -> StorageResult<Vec<Record>>;

    /// Applies a batch of records: tombstones (`_deleted == true`) are
    /// deleted, everything else is upserted.
    ///
    /// Returns one entry per input record, in input order.
    fn batch_save(
        &self,
        model: &ModelDefinition,
        records: Vec<Record>,
        owner: Option<&OwnerToken>,
    ) -> StorageResult<Vec<(Record, OpType)>>;
}

/// A storage that can run a closure with serialized, exclusive access.
pub trait ExclusiveStorage: Storage {
    /// Runs `f` with a transaction-scoped handle.
    ///
    /// Exclusive scopes never overlap. A scope opened on a thread that
    /// already holds one joins the outer scope instead of blocking.
    fn run_exclusive<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn Storage) -> Result<T, E>;
}
