//! Stable identifiers for model instances.
//!
//! The identifier of a record is the join key between business records,
//! [`crate::MutationEvent::model_id`] and [`crate::PendingMutationVersion::id`].
//! It is derived from the primary-key values in the order the
//! [`ModelDefinition`] declares them.

use crate::config::DEFAULT_IDENTIFIER_SEPARATOR;
use crate::error::{SyncError, SyncResult};
use serde_json::Value;
use tidesync_storage::{ModelDefinition, Record};

/// Derives the identifier of `record` using the default `-` separator.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use tidesync_core::identifier_value;
/// use tidesync_storage::{ModelDefinition, Record};
///
/// let comment = ModelDefinition::new("Comment").with_primary_key(["postId", "seq"]);
/// let record = Record::new()
///     .with_field("postId", json!("p1"))
///     .with_field("seq", json!(4));
/// assert_eq!(identifier_value(&comment, &record).unwrap(), "p1-4");
/// ```
pub fn identifier_value(definition: &ModelDefinition, record: &Record) -> SyncResult<String> {
    identifier_value_with(definition, record, DEFAULT_IDENTIFIER_SEPARATOR)
}

/// Derives the identifier of `record`, joining composite keys with `separator`.
///
/// Strings are used verbatim; other values use their JSON text.
///
/// # Errors
///
/// Returns [`SyncError::MissingIdentifier`] if a key field is absent or null.
pub fn identifier_value_with(
    definition: &ModelDefinition,
    record: &Record,
    separator: &str,
) -> SyncResult<String> {
    let parts = definition
        .primary_key()
        .iter()
        .map(|field| match record.get(field) {
            None | Some(Value::Null) => Err(SyncError::MissingIdentifier {
                model: definition.name().to_string(),
                field: field.clone(),
            }),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
        })
        .collect::<SyncResult<Vec<_>>>()?;

    Ok(parts.join(separator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_key() {
        let def = ModelDefinition::new("Todo");
        let record = Record::new()
            .with_field("id", json!("t-1"))
            .with_field("title", json!("milk"));
        assert_eq!(identifier_value(&def, &record).unwrap(), "t-1");
    }

    #[test]
    fn numeric_and_bool_keys_use_json_text() {
        let def = ModelDefinition::new("Flag").with_primary_key(["n", "on"]);
        let record = Record::new()
            .with_field("n", json!(12))
            .with_field("on", json!(true));
        assert_eq!(identifier_value(&def, &record).unwrap(), "12-true");
    }

    #[test]
    fn composite_key_follows_declared_order() {
        let record = Record::new()
            .with_field("a", json!("x"))
            .with_field("b", json!("y"));
        let ab = ModelDefinition::new("M").with_primary_key(["a", "b"]);
        let ba = ModelDefinition::new("M").with_primary_key(["b", "a"]);
        assert_eq!(identifier_value(&ab, &record).unwrap(), "x-y");
        assert_eq!(identifier_value(&ba, &record).unwrap(), "y-x");
        assert_eq!(identifier_value_with(&ab, &record, "#").unwrap(), "x#y");
    }

    #[test]
    fn missing_key_field() {
        let def = ModelDefinition::new("Todo");
        let err = identifier_value(&def, &Record::new()).unwrap_err();
        assert!(matches!(err, SyncError::MissingIdentifier { ref field, .. } if field == "id"));

        let null_key = Record::new().with_field("id", Value::Null);
        assert!(identifier_value(&def, &null_key).is_err());
    }
}
