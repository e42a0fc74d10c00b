//! # TideSync Testkit
//!
//! Test utilities for TideSync.
//!
//! This crate provides:
//! - Model definitions and record builders for common test models
//! - Storage doubles that record calls or inject failures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use tidesync_testkit::prelude::*;
//! use tidesync_storage::Storage;
//!
//! let storage = RecordingStorage::new();
//! storage.save(&todo_model(), todo("t1", 1), None, None).unwrap();
//! assert_eq!(storage.saved().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod doubles;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::doubles::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use doubles::*;
pub use fixtures::*;
pub use generators::*;
