//! Versioned session page storage.
//!
//! Combines the write-behind serialization pipeline with per-namespace version
//! indexes and access stacks behind the [`SessionPageStore`] facade.

mod access_stack;
mod cache;
mod eviction;
mod metrics;
mod options;
mod page_store;
mod pending;
mod pipeline;
mod ser;
mod version_index;

/// Navigation history used for back-button rollback.
pub use access_stack::{AccessEntry, AccessOutcome, AccessStack, RollbackStep};

/// In-memory cache of serialized records.
pub use cache::PendingCache;

/// Eviction policies applied when new objects are tracked.
pub use eviction::{EvictionAction, EvictionStrategy, NoEviction, OldestObjectFirst};

/// Worker counters.
pub use metrics::PipelineStatsSnapshot;

/// Store configuration.
pub use options::{StoreOptions, DEFAULT_IDLE_INTERVAL, DEFAULT_VERSION_INDEX_CAPACITY};

/// The store facade.
pub use page_store::{SessionPageStore, StoreStats};

/// Object and serializer contracts.
pub use ser::{JsonSerializer, PageSerializer, VersionedObject};

pub use version_index::{VersionIndex, VersionIndexEntry};
