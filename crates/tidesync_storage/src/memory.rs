//! In-memory storage engine.

use crate::change_feed::{ChangeFeed, StorageChange};
use crate::error::{StorageError, StorageResult};
use crate::model::ModelDefinition;
use crate::predicate::Predicate;
use crate::record::Record;
use crate::storage::{ExclusiveStorage, OpType, OwnerToken, QueryOne, Storage};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::{BTreeMap, HashMap};

/// One model's rows, ordered by insertion position.
#[derive(Debug, Default)]
struct Table {
    next_position: u64,
    /// position -> (index key, record)
    rows: BTreeMap<u64, (String, Record)>,
    /// index key -> position
    index: HashMap<String, u64>,
}

impl Table {
    fn upsert(
        &mut self,
        model: &ModelDefinition,
        key: String,
        record: Record,
        condition: Option<&Predicate>,
    ) -> StorageResult<OpType> {
        if let Some(position) = self.index.get(&key).copied() {
            if let (Some(condition), Some((_, existing))) = (condition, self.rows.get(&position)) {
                if !condition.matches(existing) {
                    return Err(StorageError::ConditionFailed {
                        model: model.name().to_string(),
                        key,
                    });
                }
            }
            self.rows.insert(position, (key, record));
            return Ok(OpType::Update);
        }

        let position = self.next_position;
        self.next_position += 1;
        self.index.insert(key.clone(), position);
        self.rows.insert(position, (key, record));
        Ok(OpType::Insert)
    }

    fn remove(&mut self, key: &str) -> Option<Record> {
        let position = self.index.remove(key)?;
        self.rows.remove(&position).map(|(_, record)| record)
    }
}

/// An in-memory [`ExclusiveStorage`].
///
/// Suitable for:
/// - Unit and integration tests
/// - Ephemeral stores and scenario replay
///
/// # Thread Safety
///
/// Individual operations are atomic. [`ExclusiveStorage::run_exclusive`]
/// serializes whole scopes against each other using a re-entrant lock, so a
/// thread that already holds a scope may open a nested one.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use tidesync_storage::{InMemoryStorage, ModelDefinition, OpType, Record, Storage};
///
/// let storage = InMemoryStorage::new();
/// let todo = ModelDefinition::new("Todo");
/// let record = Record::new().with_field("id", json!("t1"));
///
/// let (_, op) = storage.save(&todo, record.clone(), None, None).unwrap();
/// assert_eq!(op, OpType::Insert);
/// let (_, op) = storage.save(&todo, record, None, None).unwrap();
/// assert_eq!(op, OpType::Update);
/// ```
pub struct InMemoryStorage {
    tables: RwLock<HashMap<String, Table>>,
    exclusive: ReentrantMutex<()>,
    next_sequence: Mutex<u64>,
    changes: ChangeFeed,
}

impl InMemoryStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            exclusive: ReentrantMutex::new(()),
            next_sequence: Mutex::new(1),
            changes: ChangeFeed::new(),
        }
    }

    /// The feed of committed writes.
    pub fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    /// Number of records stored for `model`.
    pub fn count(&self, model: &ModelDefinition) -> usize {
        self.tables
            .read()
            .get(model.name())
            .map_or(0, |table| table.rows.len())
    }

    /// Returns every table's records in insertion order, keyed by model name.
    pub fn dump(&self) -> BTreeMap<String, Vec<Record>> {
        self.tables
            .read()
            .iter()
            .map(|(name, table)| {
                let rows = table.rows.values().map(|(_, r)| r.clone()).collect();
                (name.clone(), rows)
            })
            .collect()
    }

    fn publish(
        &self,
        model: &ModelDefinition,
        change_type: OpType,
        record: Record,
        owner: Option<&OwnerToken>,
    ) {
        let sequence = {
            let mut next = self.next_sequence.lock();
            let current = *next;
            *next += 1;
            current
        };
        self.changes.emit(StorageChange {
            sequence,
            model: model.name().to_string(),
            change_type,
            record,
            owner: owner.cloned(),
        });
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for InMemoryStorage {
    fn query(
        &self,
        model: &ModelDefinition,
        predicate: Option<&Predicate>,
    ) -> StorageResult<Vec<Record>> {
        let tables = self.tables.read();
        let Some(table) = tables.get(model.name()) else {
            return Ok(Vec::new());
        };

        Ok(table
            .rows
            .values()
            .map(|(_, record)| record)
            .filter(|record| predicate.map_or(true, |p| p.matches(record)))
            .cloned()
            .collect())
    }

    fn query_one(
        &self,
        model: &ModelDefinition,
        position: QueryOne,
    ) -> StorageResult<Option<Record>> {
        let tables = self.tables.read();
        let Some(table) = tables.get(model.name()) else {
            return Ok(None);
        };

        let row = match position {
            QueryOne::First => table.rows.values().next(),
            QueryOne::Last => table.rows.values().next_back(),
        };
        Ok(row.map(|(_, record)| record.clone()))
    }

    fn save(
        &self,
        model: &ModelDefinition,
        record: Record,
        condition: Option<&Predicate>,
        owner: Option<&OwnerToken>,
    ) -> StorageResult<(Record, OpType)> {
        let key = model.index_key(&record)?;
        let mut tables = self.tables.write();
        let table = tables.entry(model.name().to_string()).or_default();
        let op = table.upsert(model, key, record.clone(), condition)?;
        self.publish(model, op, record.clone(), owner);
        Ok((record, op))
    }

    fn delete(
        &self,
        model: &ModelDefinition,
        record: &Record,
        owner: Option<&OwnerToken>,
    ) -> StorageResult<Vec<Record>> {
        let key = model.index_key(record)?;
        let mut tables = self.tables.write();
        let removed = tables
            .get_mut(model.name())
            .and_then(|table| table.remove(&key));

        Ok(match removed {
            Some(removed) => {
                self.publish(model, OpType::Delete, removed.clone(), owner);
                vec![removed]
            }
            None => Vec::new(),
        })
    }

    fn delete_where(
        &self,
        model: &ModelDefinition,
        predicate: &Predicate,
        owner: Option<&OwnerToken>,
    ) -> StorageResult<Vec<Record>> {
        let mut tables = self.tables.write();
        let Some(table) = tables.get_mut(model.name()) else {
            return Ok(Vec::new());
        };

        let keys: Vec<String> = table
            .rows
            .values()
            .filter(|(_, record)| predicate.matches(record))
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = table.remove(&key) {
                self.publish(model, OpType::Delete, record.clone(), owner);
                removed.push(record);
            }
        }
        Ok(removed)
    }

    fn batch_save(
        &self,
        model: &ModelDefinition,
        records: Vec<Record>,
        owner: Option<&OwnerToken>,
    ) -> StorageResult<Vec<(Record, OpType)>> {
        let keys = records
            .iter()
            .map(|record| model.index_key(record))
            .collect::<StorageResult<Vec<_>>>()?;

        let mut tables = self.tables.write();
        let table = tables.entry(model.name().to_string()).or_default();

        let mut results = Vec::with_capacity(records.len());
        for (key, record) in keys.into_iter().zip(records) {
            let op = if record.is_deleted() {
                table.remove(&key);
                OpType::Delete
            } else {
                table.upsert(model, key, record.clone(), None)?
            };
            self.publish(model, op, record.clone(), owner);
            results.push((record, op));
        }
        Ok(results)
    }
}

impl ExclusiveStorage for InMemoryStorage {
    fn run_exclusive<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&dyn Storage) -> Result<T, E>,
    {
        let _scope = self.exclusive.lock();
        f(self)
    }
}
