#![forbid(unsafe_code)]

//! Offline administration of a store root.
//!
//! These functions work directly on the on-disk layout and never start the
//! background workers, so they are safe to point at a copy of a live root.

mod error;
mod purge;
mod stats;
mod verify;


/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Removal of a single session's records.
pub use purge::{purge_session, PurgeReport};

/// Statistics collection and reporting.
///
/// Counts sessions, records and bytes, broken down per namespace.
pub use stats::{stats, NamespaceStats, SessionStats, StatsReport};

/// Record integrity verification.
pub use verify::{verify, VerifyCounts, VerifyFinding, VerifyReport, VerifySeverity};
