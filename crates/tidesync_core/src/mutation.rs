//! Outbox entities: queued mutations and pending versions.

use crate::error::{SyncError, SyncResult};
use crate::identifier::identifier_value;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tidesync_storage::{ModelDefinition, Predicate, Record};
use uuid::Uuid;

/// Serialized form of "no condition".
pub const EMPTY_CONDITION: &str = "{}";

/// Kind of local change a mutation event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MutationOperation {
    /// The record was created locally.
    Create,
    /// The record was modified locally.
    Update,
    /// The record was deleted locally.
    Delete,
}

impl fmt::Display for MutationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MutationOperation::Create => "CREATE",
            MutationOperation::Update => "UPDATE",
            MutationOperation::Delete => "DELETE",
        })
    }
}

/// One queued local change.
///
/// `data` is the serialized record snapshot (business fields plus
/// `_version`, `_lastChangedAt`, `_deleted`). `condition` is a serialized
/// [`Predicate`] to use as a conditional-write guard when the mutation is
/// sent, or `{}` when there is none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationEvent {
    /// Unique id of the queue entry.
    pub id: String,
    /// Name of the affected model.
    pub model: String,
    /// Identifier of the affected record.
    pub model_id: String,
    /// Kind of change.
    pub operation: MutationOperation,
    /// Serialized record snapshot.
    pub data: String,
    /// Serialized condition, `{}` when absent.
    pub condition: String,
}

impl MutationEvent {
    /// Creates a mutation event with a fresh id.
    pub fn new(
        model: impl Into<String>,
        model_id: impl Into<String>,
        operation: MutationOperation,
        data: &Record,
        condition: Option<&Predicate>,
    ) -> SyncResult<Self> {
        let condition = match condition {
            Some(predicate) => predicate.to_condition_json()?,
            None => EMPTY_CONDITION.to_string(),
        };

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            model: model.into(),
            model_id: model_id.into(),
            operation,
            data: data.to_json()?,
            condition,
        })
    }

    /// Creates a mutation event for `record`, deriving its model id with the
    /// default separator.
    pub fn for_record(
        definition: &ModelDefinition,
        record: &Record,
        operation: MutationOperation,
        condition: Option<&Predicate>,
    ) -> SyncResult<Self> {
        let model_id = identifier_value(definition, record)?;
        Self::new(definition.name(), model_id, operation, record, condition)
    }

    /// Parses the record snapshot.
    pub fn payload(&self) -> SyncResult<Record> {
        serde_json::from_str(&self.data).map_err(|source| SyncError::MalformedPayload {
            model_id: self.model_id.clone(),
            source,
        })
    }

    /// Returns true if the mutation carries a non-empty condition.
    ///
    /// A blank condition string counts as empty.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MalformedCondition`] if the condition is not a
    /// JSON object.
    pub fn has_condition(&self) -> SyncResult<bool> {
        if self.condition.trim().is_empty() {
            return Ok(false);
        }
        let parsed: Map<String, Value> =
            serde_json::from_str(&self.condition).map_err(SyncError::MalformedCondition)?;
        Ok(!parsed.is_empty())
    }

    /// Parses the condition predicate, `None` when empty.
    pub fn condition_predicate(&self) -> SyncResult<Option<Predicate>> {
        if !self.has_condition()? {
            return Ok(None);
        }
        serde_json::from_str(&self.condition)
            .map(Some)
            .map_err(SyncError::MalformedCondition)
    }

    pub(crate) fn to_record(&self) -> SyncResult<Record> {
        entity_to_record(self, "MutationEvent")
    }

    pub(crate) fn from_record(record: Record, table: &str) -> SyncResult<Self> {
        entity_from_record(record, table)
    }
}

/// Last known version of a model while a local mutation is outstanding.
///
/// `id` equals the model id of the mutation it shadows and `model` its model
/// name; together they key the row, so models sharing an id never collide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMutationVersion {
    /// Model id.
    pub id: String,
    /// Name of the model.
    pub model: String,
    /// Last observed version.
    pub version: u64,
}

impl PendingMutationVersion {
    pub(crate) fn to_record(&self) -> SyncResult<Record> {
        entity_to_record(self, "PendingMutationVersion")
    }

    pub(crate) fn from_record(record: Record, table: &str) -> SyncResult<Self> {
        entity_from_record(record, table)
    }
}

fn entity_to_record<T: Serialize>(entity: &T, table: &str) -> SyncResult<Record> {
    let corrupt = |source| SyncError::CorruptRow {
        table: table.to_string(),
        source,
    };
    match serde_json::to_value(entity).map_err(corrupt)? {
        Value::Object(fields) => Ok(Record::from_fields(fields)),
        other => Err(corrupt(<serde_json::Error as serde::ser::Error>::custom(
            format!("expected an object, got {other}"),
        ))),
    }
}

fn entity_from_record<T: for<'de> Deserialize<'de>>(record: Record, table: &str) -> SyncResult<T> {
    serde_json::from_value(Value::Object(record.into_fields())).map_err(|source| {
        SyncError::CorruptRow {
            table: table.to_string(),
            source,
        }
    })
}

/// Merges the field data of a newer local mutation into an older one.
///
/// The result starts from `previous`'s business fields, overlays `current`'s
/// business fields, then re-attaches `previous`'s sync metadata as the
/// baseline; sync metadata explicitly present in `current` wins last. The
/// returned event carries `current`'s id, operation and condition.
pub fn merge_user_fields(
    previous: &MutationEvent,
    current: &MutationEvent,
) -> SyncResult<MutationEvent> {
    let previous_data = previous.payload()?;
    let current_data = current.payload()?;

    let mut merged = previous_data.without_sync_metadata();
    merged.extend(current_data.without_sync_metadata());
    merged.extend(previous_data.sync_metadata());
    merged.extend(current_data.sync_metadata());

    Ok(MutationEvent {
        data: merged.to_json()?,
        ..current.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn todo_def() -> ModelDefinition {
        ModelDefinition::new("Todo")
    }

    fn event(op: MutationOperation, data: Value) -> MutationEvent {
        let record = Record::from_fields(data.as_object().cloned().unwrap());
        MutationEvent::for_record(&todo_def(), &record, op, None).unwrap()
    }

    #[test]
    fn for_record_derives_model_id() {
        let e = event(MutationOperation::Create, json!({"id": "t1", "title": "milk"}));
        assert_eq!(e.model, "Todo");
        assert_eq!(e.model_id, "t1");
        assert_eq!(e.condition, EMPTY_CONDITION);
        assert!(!e.has_condition().unwrap());
        assert_eq!(e.payload().unwrap().get("title"), Some(&json!("milk")));
    }

    #[test]
    fn ids_are_unique() {
        let a = event(MutationOperation::Create, json!({"id": "t1"}));
        let b = event(MutationOperation::Create, json!({"id": "t1"}));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn conditions() {
        let record = Record::new().with_field("id", json!("t1"));
        let guard = Predicate::eq("title", "milk");
        let e = MutationEvent::for_record(
            &todo_def(),
            &record,
            MutationOperation::Update,
            Some(&guard),
        )
        .unwrap();
        assert!(e.has_condition().unwrap());
        assert_eq!(e.condition_predicate().unwrap(), Some(guard));

        let blank = MutationEvent {
            condition: "  ".into(),
            ..e.clone()
        };
        assert!(!blank.has_condition().unwrap());
        assert_eq!(blank.condition_predicate().unwrap(), None);

        let malformed = MutationEvent {
            condition: "{oops".into(),
            ..e
        };
        assert!(matches!(
            malformed.has_condition(),
            Err(SyncError::MalformedCondition(_))
        ));
    }

    #[test]
    fn record_round_trip_uses_camel_case() {
        let e = event(MutationOperation::Delete, json!({"id": "t1"}));
        let record = e.to_record().unwrap();
        assert_eq!(record.get("modelId"), Some(&json!("t1")));
        assert_eq!(record.get("operation"), Some(&json!("DELETE")));
        assert_eq!(MutationEvent::from_record(record, "MutationEvent").unwrap(), e);
    }

    #[test]
    fn corrupt_rows_are_reported() {
        let record = Record::new().with_field("id", json!("x"));
        let err = MutationEvent::from_record(record, "MutationEvent").unwrap_err();
        assert!(matches!(err, SyncError::CorruptRow { ref table, .. } if table == "MutationEvent"));
    }

    #[test]
    fn non_object_entities_are_not_written() {
        let err = entity_to_record(&"not a row", "PendingMutationVersion").unwrap_err();
        assert!(matches!(
            err,
            SyncError::CorruptRow { ref table, .. } if table == "PendingMutationVersion"
        ));
    }

    #[test]
    fn pending_version_row_carries_model() {
        let row = PendingMutationVersion {
            id: "t1".into(),
            model: "Todo".into(),
            version: 4,
        };
        let record = row.to_record().unwrap();
        assert_eq!(record.get("model"), Some(&json!("Todo")));
        assert_eq!(
            PendingMutationVersion::from_record(record, "PendingMutationVersion").unwrap(),
            row
        );
    }

    #[test]
    fn operation_display_matches_wire_form() {
        for op in [
            MutationOperation::Create,
            MutationOperation::Update,
            MutationOperation::Delete,
        ] {
            assert_eq!(serde_json::to_string(&op).unwrap(), format!("\"{op}\""));
        }
    }

    #[test]
    fn merge_overlays_business_fields() {
        let previous = event(
            MutationOperation::Create,
            json!({"id": "t1", "title": "milk", "done": false, "_version": 1}),
        );
        let current = event(
            MutationOperation::Update,
            json!({"id": "t1", "done": true}),
        );

        let merged = merge_user_fields(&previous, &current).unwrap();
        assert_eq!(merged.id, current.id);
        assert_eq!(merged.operation, MutationOperation::Update);

        let data = merged.payload().unwrap();
        assert_eq!(data.get("title"), Some(&json!("milk")));
        assert_eq!(data.get("done"), Some(&json!(true)));
        assert_eq!(data.version(), Some(1));
    }

    #[test]
    fn explicit_metadata_in_current_wins() {
        let previous = event(
            MutationOperation::Update,
            json!({"id": "t1", "_version": 3, "_lastChangedAt": 100}),
        );
        let current = event(
            MutationOperation::Delete,
            json!({"id": "t1", "_deleted": true, "_version": 4}),
        );

        let data = merge_user_fields(&previous, &current).unwrap().payload().unwrap();
        assert_eq!(data.version(), Some(4));
        assert_eq!(data.last_changed_at(), Some(100));
        assert!(data.is_deleted());
    }

    #[test]
    fn malformed_payload() {
        let mut broken = event(MutationOperation::Update, json!({"id": "t1"}));
        broken.data = "not json".into();
        let ok = event(MutationOperation::Update, json!({"id": "t1"}));
        assert!(matches!(
            merge_user_fields(&broken, &ok),
            Err(SyncError::MalformedPayload { .. })
        ));
    }
}
