//! # TideSync Storage
//!
//! Storage collaborator interfaces and an in-memory engine for TideSync.
//!
//! The sync core never talks to a concrete database. It consumes:
//! - [`Record`] - a dynamic field map with sync metadata accessors
//! - [`ModelDefinition`] - model name and primary-key fields
//! - [`Predicate`] - filter expressions and conditional-write guards
//! - [`Storage`] / [`ExclusiveStorage`] - record persistence, query and
//!   exclusive scopes
//! - [`OwnerToken`] - marks writes issued by a sync component
//!
//! [`InMemoryStorage`] implements the traits for tests and scenario replay,
//! and publishes every committed write on a [`ChangeFeed`].
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use tidesync_storage::{ExclusiveStorage, InMemoryStorage, ModelDefinition, Record, Storage};
//!
//! let storage = InMemoryStorage::new();
//! let todo = ModelDefinition::new("Todo");
//!
//! let rows = storage
//!     .run_exclusive(|txn| {
//!         txn.save(&todo, Record::new().with_field("id", json!("t1")), None, None)?;
//!         txn.query(&todo, None)
//!     })
//!     .unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod error;
mod memory;
mod model;
mod predicate;
mod record;
mod storage;

pub use change_feed::{ChangeFeed, StorageChange};
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStorage;
pub use model::ModelDefinition;
pub use predicate::{ComparisonOp, Predicate};
pub use record::{
    Record, DELETED_FIELD, LAST_CHANGED_AT_FIELD, SYNC_METADATA_FIELDS, VERSION_FIELD,
};
pub use storage::{ExclusiveStorage, OpType, OwnerToken, QueryOne, Storage};
