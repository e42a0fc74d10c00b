//! Test models and record builders.

use serde_json::{json, Value};
use tidesync_storage::{ModelDefinition, Record};

/// `Todo` model keyed by `id`.
pub fn todo_model() -> ModelDefinition {
    ModelDefinition::new("Todo")
}

/// `Comment` model keyed by (`postId`, `commentId`).
pub fn comment_model() -> ModelDefinition {
    ModelDefinition::new("Comment").with_primary_key(["postId", "commentId"])
}

/// A `Todo` record at `version`.
pub fn todo(id: &str, version: u64) -> Record {
    Record::new()
        .with_field("id", json!(id))
        .with_field("title", json!(format!("todo {id}")))
        .with_field("done", json!(false))
        .with_field("_version", json!(version))
        .with_field("_lastChangedAt", json!(1_700_000_000_000_i64 + version as i64))
        .with_field("_deleted", json!(false))
}

/// A `Todo` record that has never been synced (no metadata).
pub fn local_todo(id: &str, title: &str) -> Record {
    Record::new()
        .with_field("id", json!(id))
        .with_field("title", json!(title))
        .with_field("done", json!(false))
}

/// A `Todo` tombstone at `version`.
pub fn todo_tombstone(id: &str, version: u64) -> Record {
    todo(id, version).with_field("_deleted", json!(true))
}

/// A `Comment` record.
pub fn comment(post_id: &str, comment_id: u64, body: &str) -> Record {
    Record::new()
        .with_field("postId", json!(post_id))
        .with_field("commentId", json!(comment_id))
        .with_field("body", json!(body))
}

/// Builds a record from a JSON object literal.
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(fields) => Record::from_fields(fields),
        other => panic!("record fixture must be a JSON object, got {other}"),
    }
}
