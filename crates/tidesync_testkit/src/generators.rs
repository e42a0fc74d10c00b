//! Property-based test generators using proptest.
//!
//! Strategies produce records that always carry a primary key, so they can
//! be fed to the outbox and merger without tripping key validation.

use proptest::prelude::*;
use serde_json::json;
use tidesync_storage::Record;

/// Strategy for short model ids drawn from a small alphabet.
///
/// The narrow range makes collisions likely, which is what dedup and
/// coalescing properties need.
pub fn model_id_strategy() -> impl Strategy<Value = String> {
    (0u8..6).prop_map(|n| format!("t{n}"))
}

/// Strategy for an optional `_version`.
pub fn version_strategy() -> impl Strategy<Value = Option<u64>> {
    prop::option::of(1u64..20)
}

/// Strategy for a `Todo` record with random title, completion and version.
pub fn todo_strategy() -> impl Strategy<Value = Record> {
    (
        model_id_strategy(),
        "[a-z]{1,8}",
        any::<bool>(),
        version_strategy(),
    )
        .prop_map(|(id, title, done, version)| {
            let record = Record::new()
                .with_field("id", json!(id))
                .with_field("title", json!(title))
                .with_field("done", json!(done));
            match version {
                Some(v) => record.with_field("_version", json!(v)),
                None => record,
            }
        })
}

/// Strategy for a page of `Todo` records, usually with repeated ids.
pub fn todo_page_strategy() -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(todo_strategy(), 0..24)
}

/// Strategy for a (local, remote) version pair as seen by the merge gate.
pub fn version_pair_strategy() -> impl Strategy<Value = (Option<u64>, Option<u64>)> {
    (version_strategy(), version_strategy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn generated_todos_are_keyed() {
        let mut runner = TestRunner::default();
        for _ in 0..32 {
            let todo = todo_strategy()
                .new_tree(&mut runner)
                .unwrap()
                .current();
            assert!(todo.get("id").and_then(|v| v.as_str()).is_some());
        }
    }
}
