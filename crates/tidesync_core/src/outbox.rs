//! Mutation outbox.
//!
//! The outbox is a FIFO queue of local mutations waiting to be sent to the
//! remote authority, plus a side table of pending mutation versions.
//!
//! ## Coalescing
//!
//! At rest the queue holds at most one live entry per record, a record being
//! identified by its model name and model id. A new mutation for a record that
//! already has a queued entry (other than the one currently being transmitted)
//! is folded into it. A condition on a mutation merged into a queued create is
//! ignored:
//!
//! | Queued | Incoming | Result |
//! |--------|----------|--------|
//! | none | any | incoming is appended |
//! | `CREATE` | `DELETE` | queued create is dropped, nothing is appended |
//! | `CREATE` | `CREATE`/`UPDATE` | fields merged into the queued create in place |
//! | `UPDATE`/`DELETE` | any, no condition | merged, old entries dropped, merged appended |
//! | `UPDATE`/`DELETE` | any, with condition | incoming is appended, nothing dropped |

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::identifier::identifier_value_with;
use crate::mutation::{merge_user_fields, MutationEvent, MutationOperation, PendingMutationVersion};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tidesync_storage::{
    ExclusiveStorage, ModelDefinition, OwnerToken, Predicate, QueryOne, Record, Storage,
};
use tracing::{debug, trace};

/// Durable queue of pending local mutations.
///
/// # Concurrency
///
/// [`enqueue`](Self::enqueue) runs inside an exclusive scope of the outbox's
/// own storage, so concurrent producers cannot both append an entry for the
/// same model id.
///
/// The in-progress marker names the entry a transmitter has read via
/// [`peek`](Self::peek) and will remove via [`dequeue`](Self::dequeue).
/// `enqueue` never merges into that entry. The marker lives in memory only and
/// is guarded by a lock that `enqueue` holds for its whole exclusive scope and
/// that `peek`/`dequeue` hold while reading and deleting the head, so no
/// caller observes a torn marker.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use std::sync::Arc;
/// use tidesync_core::{MutationEvent, MutationOperation, MutationOutbox};
/// use tidesync_storage::{InMemoryStorage, ModelDefinition, Record};
///
/// let storage = Arc::new(InMemoryStorage::new());
/// let outbox = MutationOutbox::new(Arc::clone(&storage));
/// let todo = ModelDefinition::new("Todo");
/// let record = Record::new().with_field("id", json!("t1"));
///
/// let create =
///     MutationEvent::for_record(&todo, &record, MutationOperation::Create, None).unwrap();
/// outbox.enqueue(create).unwrap();
/// let head = outbox.dequeue(storage.as_ref()).unwrap().unwrap();
/// assert_eq!(head.model_id, "t1");
/// assert!(outbox.dequeue(storage.as_ref()).unwrap().is_none());
/// ```
pub struct MutationOutbox<S: ExclusiveStorage> {
    storage: Arc<S>,
    config: SyncConfig,
    mutation_events: ModelDefinition,
    pending_versions: ModelDefinition,
    owner: OwnerToken,
    in_progress: Mutex<Option<String>>,
}

impl<S: ExclusiveStorage> MutationOutbox<S> {
    /// Creates an outbox over `storage` with the default configuration.
    pub fn new(storage: Arc<S>) -> Self {
        Self::with_config(storage, SyncConfig::default())
    }

    /// Creates an outbox over `storage` with a custom configuration.
    pub fn with_config(storage: Arc<S>, config: SyncConfig) -> Self {
        Self {
            storage,
            mutation_events: config.mutation_event_definition(),
            pending_versions: config.pending_version_definition(),
            config,
            owner: OwnerToken::new(),
            in_progress: Mutex::new(None),
        }
    }

    /// The outbox's own storage.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// The configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Token tagging every write the outbox issues.
    pub fn owner(&self) -> &OwnerToken {
        &self.owner
    }

    /// Id of the entry currently marked in progress.
    pub fn in_progress(&self) -> Option<String> {
        self.in_progress.lock().clone()
    }

    /// Derives a model id using the configured separator.
    pub fn model_id(&self, definition: &ModelDefinition, model: &Record) -> SyncResult<String> {
        identifier_value_with(definition, model, &self.config.identifier_separator)
    }

    /// Builds a mutation event for `model`, keyed with the configured separator.
    pub fn mutation_for(
        &self,
        definition: &ModelDefinition,
        model: &Record,
        operation: MutationOperation,
        condition: Option<&Predicate>,
    ) -> SyncResult<MutationEvent> {
        let model_id = self.model_id(definition, model)?;
        MutationEvent::new(definition.name(), model_id, operation, model, condition)
    }

    /// Queues a mutation, coalescing it with any queued entry for the same
    /// model id that is not in progress.
    ///
    /// # Errors
    ///
    /// Propagates storage failures, and fails with
    /// [`crate::SyncError::MalformedCondition`] if the incoming condition is
    /// not a JSON object.
    pub fn enqueue(&self, mutation: MutationEvent) -> SyncResult<()> {
        self.storage.run_exclusive(|txn| -> SyncResult<()> {
            let in_progress = self.in_progress.lock();

            let mut same_record = queued_record(&mutation.model, &mutation.model_id);
            if let Some(id) = in_progress.as_deref() {
                same_record = same_record.and(Predicate::ne("id", id));
            }

            let existing = txn.query(&self.mutation_events, Some(&same_record))?;
            let Some(first) = existing.into_iter().next() else {
                trace!(
                    model = %mutation.model,
                    model_id = %mutation.model_id,
                    op = ?mutation.operation,
                    "appending mutation"
                );
                return self.insert(txn, &mutation);
            };
            let first = MutationEvent::from_record(first, self.mutation_events.name())?;

            if first.operation == MutationOperation::Create {
                if mutation.operation == MutationOperation::Delete {
                    debug!(model_id = %mutation.model_id, "delete cancels queued create");
                    txn.delete(&self.mutation_events, &first.to_record()?, Some(&self.owner))?;
                    return Ok(());
                }

                debug!(
                    model_id = %mutation.model_id,
                    op = ?mutation.operation,
                    "merging into queued create"
                );
                let merged = merge_user_fields(&first, &mutation)?;
                let updated = MutationEvent {
                    data: merged.data,
                    ..first
                };
                return self.insert(txn, &updated);
            }

            let replacement = if mutation.has_condition()? {
                debug!(
                    model_id = %mutation.model_id,
                    "conditional mutation queued without collapsing"
                );
                mutation
            } else {
                debug!(
                    model_id = %mutation.model_id,
                    op = ?mutation.operation,
                    "collapsing queued mutations"
                );
                let merged = merge_user_fields(&first, &mutation)?;
                txn.delete_where(&self.mutation_events, &same_record, Some(&self.owner))?;
                merged
            };
            self.insert(txn, &replacement)
        })
    }

    /// Returns the head of the queue without removing it and marks it in
    /// progress.
    pub fn peek(&self, storage: &dyn Storage) -> SyncResult<Option<MutationEvent>> {
        let mut in_progress = self.in_progress.lock();
        self.peek_marked(storage, &mut in_progress)
    }

    /// Removes and returns the head of the queue, then clears the in-progress
    /// marker. Returns `None` when the queue is empty.
    pub fn dequeue(&self, storage: &dyn Storage) -> SyncResult<Option<MutationEvent>> {
        let mut in_progress = self.in_progress.lock();
        let head = self.peek_marked(storage, &mut in_progress)?;

        if let Some(head) = &head {
            storage.delete(&self.mutation_events, &head.to_record()?, Some(&self.owner))?;
            debug!(id = %head.id, model_id = %head.model_id, "dequeued mutation");
        }
        *in_progress = None;
        Ok(head)
    }

    /// Returns every queued entry for `model`.
    pub fn get_for_model(
        &self,
        storage: &dyn Storage,
        model: &Record,
        definition: &ModelDefinition,
    ) -> SyncResult<Vec<MutationEvent>> {
        let model_id = self.model_id(definition, model)?;
        storage
            .query(
                &self.mutation_events,
                Some(&queued_record(definition.name(), &model_id)),
            )?
            .into_iter()
            .map(|row| MutationEvent::from_record(row, self.mutation_events.name()))
            .collect()
    }

    /// Returns the distinct model ids with at least one queued entry.
    pub fn get_model_ids(&self, storage: &dyn Storage) -> SyncResult<HashSet<String>> {
        storage
            .query(&self.mutation_events, None)?
            .into_iter()
            .map(|row| {
                MutationEvent::from_record(row, self.mutation_events.name()).map(|e| e.model_id)
            })
            .collect()
    }

    /// Records `version` as the last known version of `model`, creating the
    /// row if absent.
    pub fn update_model_version(
        &self,
        storage: &dyn Storage,
        model: &Record,
        definition: &ModelDefinition,
        version: u64,
    ) -> SyncResult<()> {
        let id = self.model_id(definition, model)?;
        let row = match self.find_version(storage, definition, &id)? {
            Some(existing) => PendingMutationVersion {
                version,
                ..existing
            },
            None => PendingMutationVersion {
                id,
                model: definition.name().to_string(),
                version,
            },
        };
        trace!(model_id = %row.id, version, "pending version refreshed");
        storage.save(&self.pending_versions, row.to_record()?, None, Some(&self.owner))?;
        Ok(())
    }

    /// Returns the last known version recorded for `model`.
    pub fn get_model_version(
        &self,
        storage: &dyn Storage,
        model: &Record,
        definition: &ModelDefinition,
    ) -> SyncResult<Option<u64>> {
        let id = self.model_id(definition, model)?;
        Ok(self
            .find_version(storage, definition, &id)?
            .map(|row| row.version))
    }

    /// Removes the pending version row for `model`, if any.
    pub fn delete_model_version(
        &self,
        storage: &dyn Storage,
        model: &Record,
        definition: &ModelDefinition,
    ) -> SyncResult<()> {
        let id = self.model_id(definition, model)?;
        storage.delete_where(
            &self.pending_versions,
            &pending_version(definition.name(), &id),
            Some(&self.owner),
        )?;
        Ok(())
    }

    fn insert(&self, storage: &dyn Storage, mutation: &MutationEvent) -> SyncResult<()> {
        storage.save(&self.mutation_events, mutation.to_record()?, None, Some(&self.owner))?;
        Ok(())
    }

    fn peek_marked(
        &self,
        storage: &dyn Storage,
        in_progress: &mut Option<String>,
    ) -> SyncResult<Option<MutationEvent>> {
        let head = storage
            .query_one(&self.mutation_events, QueryOne::First)?
            .map(|row| MutationEvent::from_record(row, self.mutation_events.name()))
            .transpose()?;
        *in_progress = head.as_ref().map(|h| h.id.clone());
        Ok(head)
    }

    fn find_version(
        &self,
        storage: &dyn Storage,
        definition: &ModelDefinition,
        id: &str,
    ) -> SyncResult<Option<PendingMutationVersion>> {
        storage
            .query(
                &self.pending_versions,
                Some(&pending_version(definition.name(), id)),
            )?
            .into_iter()
            .next()
            .map(|row| PendingMutationVersion::from_record(row, self.pending_versions.name()))
            .transpose()
    }
}

/// Queue entries of one record.
fn queued_record(model: &str, model_id: &str) -> Predicate {
    Predicate::eq("model", model).and(Predicate::eq("modelId", model_id))
}

/// Pending version row of one record.
fn pending_version(model: &str, id: &str) -> Predicate {
    Predicate::eq("model", model).and(Predicate::eq("id", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use serde_json::{json, Value};
    use tidesync_storage::InMemoryStorage;

    fn todo_def() -> ModelDefinition {
        ModelDefinition::new("Todo")
    }

    fn record(data: Value) -> Record {
        Record::from_fields(data.as_object().cloned().unwrap())
    }

    fn setup() -> (Arc<InMemoryStorage>, MutationOutbox<InMemoryStorage>) {
        let storage = Arc::new(InMemoryStorage::new());
        let outbox = MutationOutbox::new(Arc::clone(&storage));
        (storage, outbox)
    }

    fn mutation(
        outbox: &MutationOutbox<InMemoryStorage>,
        op: MutationOperation,
        data: Value,
    ) -> MutationEvent {
        outbox.mutation_for(&todo_def(), &record(data), op, None).unwrap()
    }

    fn queued(
        storage: &InMemoryStorage,
        outbox: &MutationOutbox<InMemoryStorage>,
    ) -> Vec<MutationEvent> {
        storage
            .query(&outbox.config().mutation_event_definition(), None)
            .unwrap()
            .into_iter()
            .map(|r| MutationEvent::from_record(r, "MutationEvent").unwrap())
            .collect()
    }

    #[test]
    fn create_then_update_merges_into_create() {
        let (storage, outbox) = setup();
        let create = mutation(
            &outbox,
            MutationOperation::Create,
            json!({"id": "1", "title": "milk", "done": false}),
        );
        let create_id = create.id.clone();
        outbox.enqueue(create).unwrap();
        outbox
            .enqueue(mutation(&outbox, MutationOperation::Update, json!({"id": "1", "done": true})))
            .unwrap();

        let queue = queued(&storage, &outbox);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, create_id);
        assert_eq!(queue[0].operation, MutationOperation::Create);
        let data = queue[0].payload().unwrap();
        assert_eq!(data.get("title"), Some(&json!("milk")));
        assert_eq!(data.get("done"), Some(&json!(true)));
    }

    #[test]
    fn create_then_delete_leaves_nothing() {
        let (storage, outbox) = setup();
        outbox
            .enqueue(mutation(&outbox, MutationOperation::Create, json!({"id": "1"})))
            .unwrap();
        outbox
            .enqueue(mutation(
                &outbox,
                MutationOperation::Delete,
                json!({"id": "1", "_deleted": true}),
            ))
            .unwrap();

        assert!(queued(&storage, &outbox).is_empty());
        assert!(outbox.get_model_ids(storage.as_ref()).unwrap().is_empty());
    }

    #[test]
    fn update_then_update_collapses_to_tail() {
        let (storage, outbox) = setup();
        outbox
            .enqueue(mutation(
                &outbox,
                MutationOperation::Update,
                json!({"id": "1", "title": "a", "_version": 2}),
            ))
            .unwrap();
        outbox
            .enqueue(mutation(&outbox, MutationOperation::Update, json!({"id": "2"})))
            .unwrap();
        let second = mutation(&outbox, MutationOperation::Update, json!({"id": "1", "done": true}));
        let second_id = second.id.clone();
        outbox.enqueue(second).unwrap();

        let queue = queued(&storage, &outbox);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].model_id, "2");
        assert_eq!(queue[1].id, second_id);
        let data = queue[1].payload().unwrap();
        assert_eq!(data.get("title"), Some(&json!("a")));
        assert_eq!(data.get("done"), Some(&json!(true)));
        assert_eq!(data.version(), Some(2));
    }

    #[test]
    fn condition_is_ignored_when_merging_into_create() {
        let (storage, outbox) = setup();
        let create = mutation(
            &outbox,
            MutationOperation::Create,
            json!({"id": "1", "title": "milk", "done": false}),
        );
        let create_id = create.id.clone();
        outbox.enqueue(create).unwrap();

        let guarded = outbox
            .mutation_for(
                &todo_def(),
                &record(json!({"id": "1", "done": true})),
                MutationOperation::Update,
                Some(&Predicate::eq("done", false)),
            )
            .unwrap();
        outbox.enqueue(guarded).unwrap();

        let queue = queued(&storage, &outbox);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, create_id);
        assert_eq!(queue[0].operation, MutationOperation::Create);
        assert!(!queue[0].has_condition().unwrap());
        let data = queue[0].payload().unwrap();
        assert_eq!(data.get("title"), Some(&json!("milk")));
        assert_eq!(data.get("done"), Some(&json!(true)));
    }

    #[test]
    fn models_sharing_an_id_are_queued_separately() {
        let (storage, outbox) = setup();
        let note = ModelDefinition::new("Note");
        let shared = record(json!({"id": "1", "title": "milk"}));
        let note_row = record(json!({"id": "1", "body": "hello"}));

        outbox
            .enqueue(mutation(
                &outbox,
                MutationOperation::Create,
                json!({"id": "1", "title": "milk"}),
            ))
            .unwrap();
        let note_create = outbox
            .mutation_for(&note, &note_row, MutationOperation::Create, None)
            .unwrap();
        outbox.enqueue(note_create).unwrap();

        let queue = queued(&storage, &outbox);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].model, "Todo");
        assert!(!queue[0].payload().unwrap().contains("body"));
        assert_eq!(queue[1].model, "Note");
        assert!(!queue[1].payload().unwrap().contains("title"));

        let for_note = outbox.get_for_model(storage.as_ref(), &note_row, &note).unwrap();
        assert_eq!(for_note.len(), 1);
        assert_eq!(for_note[0].model, "Note");

        let note_delete = outbox
            .mutation_for(&note, &note_row, MutationOperation::Delete, None)
            .unwrap();
        outbox.enqueue(note_delete).unwrap();
        let queue = queued(&storage, &outbox);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].model, "Todo");
        assert_eq!(
            outbox
                .get_for_model(storage.as_ref(), &shared, &todo_def())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn pending_versions_are_kept_per_model() {
        let (storage, outbox) = setup();
        let note = ModelDefinition::new("Note");
        let model = record(json!({"id": "a"}));

        outbox.update_model_version(storage.as_ref(), &model, &todo_def(), 3).unwrap();
        outbox.update_model_version(storage.as_ref(), &model, &note, 8).unwrap();
        assert_eq!(
            outbox.get_model_version(storage.as_ref(), &model, &todo_def()).unwrap(),
            Some(3)
        );
        assert_eq!(outbox.get_model_version(storage.as_ref(), &model, &note).unwrap(), Some(8));

        outbox.delete_model_version(storage.as_ref(), &model, &note).unwrap();
        assert_eq!(outbox.get_model_version(storage.as_ref(), &model, &note).unwrap(), None);
        assert_eq!(
            outbox.get_model_version(storage.as_ref(), &model, &todo_def()).unwrap(),
            Some(3)
        );
    }

    #[test]
    fn conditional_mutation_does_not_collapse() {
        let (storage, outbox) = setup();
        outbox
            .enqueue(mutation(&outbox, MutationOperation::Update, json!({"id": "1", "title": "a"})))
            .unwrap();
        let guarded = outbox
            .mutation_for(
                &todo_def(),
                &record(json!({"id": "1", "title": "b"})),
                MutationOperation::Update,
                Some(&Predicate::eq("title", "a")),
            )
            .unwrap();
        outbox.enqueue(guarded).unwrap();

        let queue = queued(&storage, &outbox);
        assert_eq!(queue.len(), 2);
        assert!(queue.iter().all(|m| m.model_id == "1"));
    }

    #[test]
    fn malformed_condition_is_rejected() {
        let (storage, outbox) = setup();
        outbox
            .enqueue(mutation(&outbox, MutationOperation::Update, json!({"id": "1"})))
            .unwrap();
        let mut bad = mutation(&outbox, MutationOperation::Update, json!({"id": "1"}));
        bad.condition = "[not an object".into();

        assert!(matches!(outbox.enqueue(bad), Err(SyncError::MalformedCondition(_))));
        assert_eq!(queued(&storage, &outbox).len(), 1);
    }

    #[test]
    fn in_progress_entry_is_not_merged_into() {
        let (storage, outbox) = setup();
        outbox
            .enqueue(mutation(&outbox, MutationOperation::Create, json!({"id": "1", "title": "a"})))
            .unwrap();

        let head = outbox.peek(storage.as_ref()).unwrap().unwrap();
        assert_eq!(outbox.in_progress(), Some(head.id.clone()));

        outbox
            .enqueue(mutation(&outbox, MutationOperation::Update, json!({"id": "1", "title": "b"})))
            .unwrap();

        let queue = queued(&storage, &outbox);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0], head);
        assert_eq!(queue[1].operation, MutationOperation::Update);

        let removed = outbox.dequeue(storage.as_ref()).unwrap().unwrap();
        assert_eq!(removed.id, head.id);
        assert_eq!(outbox.in_progress(), None);
        assert_eq!(queued(&storage, &outbox).len(), 1);
    }

    #[test]
    fn dequeue_is_fifo_and_idempotent_when_empty() {
        let (storage, outbox) = setup();
        for id in ["a", "b"] {
            outbox
                .enqueue(mutation(&outbox, MutationOperation::Create, json!({ "id": id })))
                .unwrap();
        }
        assert_eq!(outbox.dequeue(storage.as_ref()).unwrap().unwrap().model_id, "a");
        assert_eq!(outbox.dequeue(storage.as_ref()).unwrap().unwrap().model_id, "b");
        assert!(outbox.dequeue(storage.as_ref()).unwrap().is_none());
        assert!(outbox.dequeue(storage.as_ref()).unwrap().is_none());
        assert!(outbox.peek(storage.as_ref()).unwrap().is_none());
        assert_eq!(outbox.in_progress(), None);
    }

    #[test]
    fn get_for_model_and_model_ids() {
        let (storage, outbox) = setup();
        outbox
            .enqueue(mutation(&outbox, MutationOperation::Create, json!({"id": "a"})))
            .unwrap();
        outbox
            .enqueue(mutation(&outbox, MutationOperation::Update, json!({"id": "b"})))
            .unwrap();

        let for_a = outbox
            .get_for_model(storage.as_ref(), &record(json!({"id": "a"})), &todo_def())
            .unwrap();
        assert_eq!(for_a.len(), 1);
        assert!(outbox
            .get_for_model(storage.as_ref(), &record(json!({"id": "zzz"})), &todo_def())
            .unwrap()
            .is_empty());

        let ids = outbox.get_model_ids(storage.as_ref()).unwrap();
        assert_eq!(ids, HashSet::from(["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn model_version_crud() {
        let (storage, outbox) = setup();
        let def = todo_def();
        let model = record(json!({"id": "a"}));

        assert_eq!(outbox.get_model_version(storage.as_ref(), &model, &def).unwrap(), None);
        outbox.update_model_version(storage.as_ref(), &model, &def, 3).unwrap();
        outbox.update_model_version(storage.as_ref(), &model, &def, 5).unwrap();
        assert_eq!(outbox.get_model_version(storage.as_ref(), &model, &def).unwrap(), Some(5));
        assert_eq!(storage.count(&outbox.config().pending_version_definition()), 1);

        outbox.delete_model_version(storage.as_ref(), &model, &def).unwrap();
        assert_eq!(outbox.get_model_version(storage.as_ref(), &model, &def).unwrap(), None);
        outbox.delete_model_version(storage.as_ref(), &model, &def).unwrap();
    }

    #[test]
    fn custom_table_names_and_separator() {
        let storage = Arc::new(InMemoryStorage::new());
        let config = SyncConfig::new()
            .with_mutation_event_model("Outbox")
            .with_identifier_separator("#");
        let outbox = MutationOutbox::with_config(Arc::clone(&storage), config);
        let comment = ModelDefinition::new("Comment").with_primary_key(["postId", "seq"]);
        let model = record(json!({"postId": "p", "seq": 1}));

        let create = outbox
            .mutation_for(&comment, &model, MutationOperation::Create, None)
            .unwrap();
        outbox.enqueue(create).unwrap();

        assert_eq!(storage.count(&ModelDefinition::new("Outbox")), 1);
        let ids = outbox.get_model_ids(storage.as_ref()).unwrap();
        assert!(ids.contains("p#1"));
    }

    #[test]
    fn outbox_writes_carry_its_owner_token() {
        let (storage, outbox) = setup();
        let rx = storage.changes().subscribe();
        outbox
            .enqueue(mutation(&outbox, MutationOperation::Create, json!({"id": "a"})))
            .unwrap();
        assert!(rx.recv().unwrap().is_from(outbox.owner()));
    }
}
