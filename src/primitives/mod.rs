//! Low-level building blocks for the page store.
//!
//! Includes the on-disk record store and the payload slot shared between
//! workers and readers.

/// Claimable payload slots with completion signalling.
///
/// Coordinates the single thread converting an object with readers waiting for it.
pub mod concurrency;

/// Record files on disk.
///
/// Maps version keys to files, frames payloads with a checksummed header and
/// removes records by prefix.
pub mod io;
