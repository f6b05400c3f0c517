#![forbid(unsafe_code)]

//! Core identifiers, errors and checksums shared by every layer.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

mod checksum;
mod key;

pub use checksum::{record_crc32, Checksum, Crc32Fast};
pub use key::{normalize_namespace, ObjectId, VersionKey};

/// Errors surfaced by the page store.
///
/// Most I/O and conversion failures are contained inside the pipeline and
/// degrade to "not found"; the variants below are what still escapes.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying filesystem failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// The serializer could not turn an object into bytes.
    #[error("serialization failed: {0}")]
    Serialization(String),
    /// The serializer could not rebuild an object from bytes.
    #[error("deserialization failed: {0}")]
    Deserialization(String),
    /// Caller supplied an argument the store cannot honour.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Configuration could not be parsed or failed validation.
    #[error("configuration: {0}")]
    Config(String),
    /// A reader waited on an in-flight serialization longer than allowed.
    #[error("stalled waiting {waited:?} for {key} to finish serializing")]
    Stalled {
        /// Key of the entry the reader was blocked on.
        key: VersionKey,
        /// How long the reader waited before giving up.
        waited: Duration,
    },
    /// A rollback would cross more than one full version boundary.
    #[error("rollback of {steps} steps from {from} crosses more than one version")]
    RollbackTooFar {
        /// Cursor the rollback started from.
        from: VersionCursor,
        /// Number of sub-version steps requested.
        steps: u32,
    },
    /// The store has been destroyed.
    #[error("page store is shut down")]
    ShutDown,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Position of an object in its version history, as tracked by the caller's
/// version allocator.
///
/// `previous_last_sub_version` is the highest sub-version the previous full
/// version reached before `version` was allocated; it is what lets a rollback
/// step over exactly one version boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionCursor {
    /// Current full version.
    pub version: u32,
    /// Current sub-version within `version`.
    pub sub_version: u32,
    /// Last sub-version reached by `version - 1`.
    pub previous_last_sub_version: u32,
}

impl VersionCursor {
    /// Creates a cursor.
    pub fn new(version: u32, sub_version: u32, previous_last_sub_version: u32) -> Self {
        Self {
            version,
            sub_version,
            previous_last_sub_version,
        }
    }

    /// Resolves the `(version, sub_version)` pair `steps` sub-versions back.
    ///
    /// Only one full-version crossing is supported: when the steps exhaust the
    /// current version, the remainder is taken from the previous version's last
    /// sub-version, and anything beyond that is rejected.
    pub fn step_back(&self, steps: u32) -> Result<(u32, u32)> {
        if self.sub_version >= steps {
            return Ok((self.version, self.sub_version - steps));
        }
        let remaining = steps - self.sub_version;
        if self.version == 0 || remaining > self.previous_last_sub_version {
            return Err(StoreError::RollbackTooFar { from: *self, steps });
        }
        // Sub-version 0 of a version is derived from the previous version's last
        // sub-version, so that state is not counted twice.
        let sub = self.previous_last_sub_version - remaining;
        Ok((self.version - 1, sub))
    }
}

impl fmt::Display for VersionCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.version, self.sub_version)
    }
}
