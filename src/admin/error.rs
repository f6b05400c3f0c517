use std::path::{Path, PathBuf};

use crate::types::StoreError;
use thiserror::Error;

/// Error type for administrative operations.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Store root directory not found at the specified path.
    #[error("store root not found: {0}")]
    MissingRoot(PathBuf),
    /// Custom error message.
    #[error("{0}")]
    Message(String),
    /// Core store error.
    #[error(transparent)]
    Core(#[from] StoreError),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for administrative operations.
pub type Result<T> = std::result::Result<T, AdminError>;

impl AdminError {
    pub(crate) fn missing_root(path: impl AsRef<Path>) -> Self {
        AdminError::MissingRoot(path.as_ref().to_path_buf())
    }
}

/// Fails unless `root` is an existing directory.
pub(crate) fn require_root(root: &Path) -> Result<()> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(AdminError::missing_root(root))
    }
}
