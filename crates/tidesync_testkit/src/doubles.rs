//! Storage test doubles.
//!
//! Both doubles delegate to an [`InMemoryStorage`] and implement
//! [`ExclusiveStorage`], handing themselves (not the inner storage) to
//! exclusive scopes so that calls made inside a scope are observed too.

use parking_lot::Mutex;
use std::collections::HashSet;
use tidesync_storage::{
    ExclusiveStorage, InMemoryStorage, ModelDefinition, OpType, OwnerToken, Predicate, QueryOne,
    Record, Storage, StorageError, StorageResult,
};

/// A storage call observed by [`RecordingStorage`].
#[derive(Debug, Clone, PartialEq)]
pub enum StorageCall {
    /// `query`
    Query {
        /// Model name.
        model: String,
    },
    /// `query_one`
    QueryOne {
        /// Model name.
        model: String,
    },
    /// `save`
    Save {
        /// Model name.
        model: String,
        /// Record passed in.
        record: Record,
        /// Owner token passed in.
        owner: Option<OwnerToken>,
    },
    /// `delete`
    Delete {
        /// Model name.
        model: String,
        /// Record passed in.
        record: Record,
    },
    /// `delete_where`
    DeleteWhere {
        /// Model name.
        model: String,
    },
    /// `batch_save`
    BatchSave {
        /// Model name.
        model: String,
        /// Records passed in, in order.
        records: Vec<Record>,
        /// Owner token passed in.
        owner: Option<OwnerToken>,
    },
}

/// Storage that records every call before delegating.
#[derive(Default)]
pub struct RecordingStorage {
    inner: InMemoryStorage,
    calls: Mutex<Vec<StorageCall>>,
}

impl RecordingStorage {
    /// Creates an empty recording storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped storage.
    pub fn inner(&self) -> &InMemoryStorage {
        &self.inner
    }

    /// All calls so far.
    pub fn calls(&self) -> Vec<StorageCall> {
        self.calls.lock().clone()
    }

    /// Records passed to `save`, in call order.
    pub fn saved(&self) -> Vec<Record> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                StorageCall::Save { record, .. } => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    /// Record lists passed to `batch_save`, in call order.
    pub fn batches(&self) -> Vec<Vec<Record>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                StorageCall::BatchSave { records, .. } => Some(records.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of calls that write to `model`.
    pub fn writes_to(&self, model: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| match call {
                StorageCall::Save { model: m, .. }
                | StorageCall::Delete { model: m, .. }
                | StorageCall::DeleteWhere { model: m }
                | StorageCall::BatchSave { model: m, .. } => m == model,
                StorageCall::Query { .. } | StorageCall::QueryOne { .. } => false,
            })
            .count()
    }

    /// Forgets recorded calls.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: StorageCall) {
        self.calls.lock().push(call);
    }
}

impl Storage for RecordingStorage {
    fn query(
        &self,
        model: &ModelDefinition,
        predicate: Option<&Predicate>,
    ) -> StorageResult<Vec<Record>> {
        self.record(StorageCall::Query {
            model: model.name().to_string(),
        });
        self.inner.query(model, predicate)
    }

    fn query_one(
        &self,
        model: &ModelDefinition,
        position: QueryOne,
    ) -> StorageResult<Option<Record>> {
        self.record(StorageCall::QueryOne {
            model: model.name().to_string(),
        });
        self.inner.query_one(model, position)
    }

    fn save(
        &self,
        model: &ModelDefinition,
        record: Record,
        condition: Option<&Predicate>,
        owner: Option<&OwnerToken>,
    ) -> StorageResult<(Record, OpType)> {
        self.record(StorageCall::Save {
            model: model.name().to_string(),
            record: record.clone(),
            owner: owner.cloned(),
        });
        self.inner.save(model, record, condition, owner)
    }

    fn delete(
        &self,
        model: &ModelDefinition,
        record: &Record,
        owner: Option<&OwnerToken>,
    ) -> StorageResult<Vec<Record>> {
        self.record(StorageCall::Delete {
            model: model.name().to_string(),
            record: record.clone(),
        });
        self.inner.delete(model, record, owner)
    }

    fn delete_where(
        &self,
        model: &ModelDefinition,
        predicate: &Predicate,
        owner: Option<&OwnerToken>,
    ) -> StorageResult<Vec<Record>> {
        self.record(StorageCall::DeleteWhere {
            model: model.name().to_string(),
        });
        self.inner.delete_where(model, predicate, owner)
    }

    fn batch_save(
        &self,
        model: &ModelDefinition,
        records: Vec<Record>,
        owner: Option<&OwnerToken>,
    ) -> StorageResult<Vec<(Record, OpType)>> {
        self.record(StorageCall::BatchSave {
            model: model.name().to_string(),
            records: records.clone(),
            owner: owner.cloned(),
        });
        self.inner.batch_save(model, records, owner)
    }
}

impl ExclusiveStorage for RecordingStorage {
    fn run_exclusive<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn Storage) -> Result<T, E>,
    {
        self.inner.run_exclusive(|_| f(self))
    }
}

/// Storage operation kinds a [`FailingStorage`] can be told to reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `query` and `query_one`
    Read,
    /// `save`
    Save,
    /// `delete` and `delete_where`
    Delete,
    /// `batch_save`
    BatchSave,
}

/// Storage that rejects selected operations with [`StorageError::Backend`].
#[derive(Default)]
pub struct FailingStorage {
    inner: InMemoryStorage,
    failing: Mutex<HashSet<FailPoint>>,
}

impl FailingStorage {
    /// Creates a storage that fails nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped storage.
    pub fn inner(&self) -> &InMemoryStorage {
        &self.inner
    }

    /// Starts rejecting `point`.
    pub fn fail(&self, point: FailPoint) {
        self.failing.lock().insert(point);
    }

    /// Stops rejecting anything.
    pub fn heal(&self) {
        self.failing.lock().clear();
    }

    fn check(&self, point: FailPoint) -> StorageResult<()> {
        if self.failing.lock().contains(&point) {
            return Err(StorageError::backend(format!("injected {point:?} failure")));
        }
        Ok(())
    }
}

impl Storage for FailingStorage {
    fn query(
        &self,
        model: &ModelDefinition,
        predicate: Option<&Predicate>,
    ) -> StorageResult<Vec<Record>> {
        self.check(FailPoint::Read)?;
        self.inner.query(model, predicate)
    }

    fn query_one(
        &self,
        model: &ModelDefinition,
        position: QueryOne,
    ) -> StorageResult<Option<Record>> {
        self.check(FailPoint::Read)?;
        self.inner.query_one(model, position)
    }

    fn save(
        &self,
        model: &ModelDefinition,
        record: Record,
        condition: Option<&Predicate>,
        owner: Option<&OwnerToken>,
    ) -> StorageResult<(Record, OpType)> {
        self.check(FailPoint::Save)?;
        self.inner.save(model, record, condition, owner)
    }

    fn delete(
        &self,
        model: &ModelDefinition,
        record: &Record,
        owner: Option<&OwnerToken>,
    ) -> StorageResult<Vec<Record>> {
        self.check(FailPoint::Delete)?;
        self.inner.delete(model, record, owner)
    }

    fn delete_where(
        &self,
        model: &ModelDefinition,
        predicate: &Predicate,
        owner: Option<&OwnerToken>,
    ) -> StorageResult<Vec<Record>> {
        self.check(FailPoint::Delete)?;
        self.inner.delete_where(model, predicate, owner)
    }

    fn batch_save(
        &self,
        model: &ModelDefinition,
        records: Vec<Record>,
        owner: Option<&OwnerToken>,
    ) -> StorageResult<Vec<(Record, OpType)>> {
        self.check(FailPoint::BatchSave)?;
        self.inner.batch_save(model, records, owner)
    }
}

impl ExclusiveStorage for FailingStorage {
    fn run_exclusive<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn Storage) -> Result<T, E>,
    {
        self.inner.run_exclusive(|_| f(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{todo, todo_model};

    #[test]
    fn recording_sees_calls_inside_exclusive_scope() {
        let storage = RecordingStorage::new();
        storage
            .run_exclusive(|txn| txn.save(&todo_model(), todo("a", 1), None, None).map(|_| ()))
            .unwrap();
        assert_eq!(storage.saved(), vec![todo("a", 1)]);
        assert_eq!(storage.writes_to("Todo"), 1);
        assert_eq!(storage.inner().count(&todo_model()), 1);
    }

    #[test]
    fn failing_storage_rejects_selected_points() {
        let storage = FailingStorage::new();
        storage.fail(FailPoint::Save);
        assert!(matches!(
            storage.save(&todo_model(), todo("a", 1), None, None),
            Err(StorageError::Backend(_))
        ));
        assert!(storage.query(&todo_model(), None).unwrap().is_empty());

        storage.heal();
        assert!(storage.save(&todo_model(), todo("a", 1), None, None).is_ok());
    }
}
