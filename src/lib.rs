//! Versioned, write-behind storage of per-session view objects.
//!
//! Objects handed to [`storage::SessionPageStore::store`] are serialized and
//! written to disk by background workers while remaining immediately readable.
//! Navigation recorded through `access` drives back-button rollback and
//! eviction of history that can no longer be reached.

#![warn(missing_docs)]

pub mod admin;
pub mod primitives;
pub mod storage;
pub mod types;

pub use storage::{
    JsonSerializer, PageSerializer, SessionPageStore, StoreOptions, StoreStats, VersionedObject,
};
pub use types::{ObjectId, Result, StoreError, VersionCursor, VersionKey};
