use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::admin::error::require_root;
use crate::admin::Result;
use crate::primitives::io::DiskStore;

/// Outcome of [`purge_session`].
#[derive(Clone, Debug, Serialize)]
pub struct PurgeReport {
    /// Session that was targeted.
    pub session_id: String,
    /// Whether a directory existed before the purge.
    pub existed: bool,
    /// Record files it held.
    pub records_removed: usize,
}

/// Deletes everything stored for `session_id` under `root`.
///
/// Must not run against a root a live store is writing to.
pub fn purge_session(root: impl AsRef<Path>, session_id: &str) -> Result<PurgeReport> {
    let root = root.as_ref();
    require_root(root)?;
    let disk = DiskStore::open(root)?;
    let existed = disk.session_dir(session_id).is_dir();
    let records_removed = disk.record_names(session_id)?.len();
    disk.remove_session(session_id)?;
    info!(session = session_id, records_removed, "admin.purge_session");
    Ok(PurgeReport {
        session_id: session_id.to_owned(),
        existed,
        records_removed,
    })
}
