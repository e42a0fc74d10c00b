//! # TideSync Core
//!
//! Synchronization core of an offline-first record store.
//!
//! This crate provides:
//! - [`MutationOutbox`] - a durable FIFO of local mutations that coalesces
//!   redundant entries per model id
//! - [`ModelMerger`] - applies remote records without clobbering in-flight
//!   local changes or newer local versions
//! - Identifier derivation shared by both
//!
//! ## Data flow
//!
//! 1. A local write is turned into a [`MutationEvent`] and queued with
//!    [`MutationOutbox::enqueue`]
//! 2. A transmitter drains the queue with [`MutationOutbox::peek`] and
//!    [`MutationOutbox::dequeue`]
//! 3. Records pushed by the remote authority go through
//!    [`ModelMerger::merge`]; initial hydration pages go through
//!    [`ModelMerger::merge_page`]
//!
//! ## Key Invariants
//!
//! - At most one live queued mutation per model id at rest
//! - The entry being transmitted is never merged into
//! - A remote record never overwrites a record with a queued local mutation
//! - A remote record overwrites local state only if strictly newer
//!
//! Storage is consumed through [`tidesync_storage::Storage`]; transport,
//! retries and conflict UI are left to callers.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod identifier;
mod merger;
mod mutation;
mod outbox;

pub use config::{
    SyncConfig, DEFAULT_IDENTIFIER_SEPARATOR, DEFAULT_MUTATION_EVENT_MODEL,
    DEFAULT_PENDING_VERSION_MODEL,
};
pub use error::{SyncError, SyncResult};
pub use identifier::{identifier_value, identifier_value_with};
pub use merger::ModelMerger;
pub use mutation::{
    merge_user_fields, MutationEvent, MutationOperation, PendingMutationVersion, EMPTY_CONDITION,
};
pub use outbox::MutationOutbox;
