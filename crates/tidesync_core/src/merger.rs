//! Model merger.
//!
//! Applies records arriving from the remote authority to local storage.
//! A remote record overwrites local state only when no local mutation is
//! queued for it and it is strictly newer than what is stored:
//!
//! | Queued mutation | Local `_version` | Incoming `_version` | Outcome |
//! |-----------------|------------------|---------------------|---------|
//! | yes | any | any | skipped, pending version refreshed |
//! | no | no local record / none | any | applied |
//! | no | `v` | `> v` | applied |
//! | no | `v` | `<= v` or none | skipped |
//!
//! An applied tombstone (`_deleted: true`) deletes the local record.

use crate::error::SyncResult;
use crate::outbox::MutationOutbox;
use std::collections::HashMap;
use std::sync::Arc;
use tidesync_storage::{ExclusiveStorage, ModelDefinition, OpType, OwnerToken, Record, Storage};
use tracing::{debug, trace};

/// Reconciles remote records against the outbox and local storage.
///
/// [`merge`](Self::merge) runs inside an exclusive scope of the outbox's
/// storage, so the "queued mutation" check and the write cannot interleave
/// with [`MutationOutbox::enqueue`]. Scopes are re-entrant; callers already
/// inside one simply join it.
pub struct ModelMerger<S: ExclusiveStorage> {
    outbox: Arc<MutationOutbox<S>>,
    owner: OwnerToken,
}

impl<S: ExclusiveStorage> ModelMerger<S> {
    /// Creates a merger consulting `outbox`.
    pub fn new(outbox: Arc<MutationOutbox<S>>) -> Self {
        Self {
            outbox,
            owner: OwnerToken::new(),
        }
    }

    /// The outbox this merger consults.
    pub fn outbox(&self) -> &Arc<MutationOutbox<S>> {
        &self.outbox
    }

    /// Token tagging every model write the merger issues.
    pub fn owner(&self) -> &OwnerToken {
        &self.owner
    }

    /// Merges one remote record.
    ///
    /// Returns the storage operation performed, or `None` when the record was
    /// skipped because a local mutation is queued or the record is not newer
    /// than the stored one.
    pub fn merge(
        &self,
        storage: &dyn Storage,
        model: Record,
        definition: &ModelDefinition,
    ) -> SyncResult<Option<OpType>> {
        self.outbox
            .storage()
            .run_exclusive(|_| self.merge_exclusive(storage, model, definition))
    }

    fn merge_exclusive(
        &self,
        storage: &dyn Storage,
        model: Record,
        definition: &ModelDefinition,
    ) -> SyncResult<Option<OpType>> {
        let queued = self.outbox.get_for_model(storage, &model, definition)?;
        if !queued.is_empty() {
            if let Some(version) = model.version() {
                self.outbox
                    .update_model_version(storage, &model, definition, version)?;
            }
            debug!(
                model = definition.name(),
                queued = queued.len(),
                "local mutation in flight, remote record held back"
            );
            return Ok(None);
        }

        let key = definition.key_predicate(&model)?;
        let local = storage.query(definition, Some(&key))?.into_iter().next();
        if !supersedes(local.as_ref(), &model) {
            trace!(
                model = definition.name(),
                local = ?local.as_ref().and_then(Record::version),
                remote = ?model.version(),
                "stale remote record ignored"
            );
            return Ok(None);
        }

        let op = if model.is_deleted() {
            storage.delete(definition, &model, Some(&self.owner))?;
            OpType::Delete
        } else {
            let (_, op) = storage.save(definition, model.clone(), None, Some(&self.owner))?;
            op
        };
        self.outbox.delete_model_version(storage, &model, definition)?;

        debug!(model = definition.name(), ?op, "remote record applied");
        Ok(Some(op))
    }

    /// Bulk-applies a page of remote records.
    ///
    /// Records sharing a model id are deduplicated: the last occurrence wins
    /// and takes the position of the first. The deduplicated page is written
    /// with a single [`Storage::batch_save`]. No outbox or version check is
    /// made, so this is only for hydration while no local mutations exist.
    pub fn merge_page(
        &self,
        storage: &dyn Storage,
        items: Vec<Record>,
        definition: &ModelDefinition,
    ) -> SyncResult<Vec<(Record, OpType)>> {
        let received = items.len();
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(received);
        let mut page: Vec<Record> = Vec::with_capacity(received);

        for item in items {
            let model_id = self.outbox.model_id(definition, &item)?;
            match positions.get(&model_id) {
                Some(&position) => page[position] = item,
                None => {
                    positions.insert(model_id, page.len());
                    page.push(item);
                }
            }
        }

        debug!(
            model = definition.name(),
            received,
            applied = page.len(),
            "merging page"
        );
        Ok(storage.batch_save(definition, page, Some(&self.owner))?)
    }
}

/// The optimistic-concurrency gate.
fn supersedes(local: Option<&Record>, incoming: &Record) -> bool {
    match local.and_then(Record::version) {
        None => true,
        Some(local_version) => incoming
            .version()
            .is_some_and(|remote_version| remote_version > local_version),
    }
}
