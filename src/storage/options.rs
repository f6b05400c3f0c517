use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::types::{Result, StoreError};

/// Default idle wait of the background workers.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(1000);
/// Default number of objects remembered per namespace by the version index.
pub const DEFAULT_VERSION_INDEX_CAPACITY: usize = 100;

/// Configuration supplied when opening a [`super::SessionPageStore`].
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Directory holding one sub-directory per session.
    pub root: PathBuf,
    /// Longest a worker sleeps before re-checking its queue when nobody
    /// signalled new work.
    pub idle_interval: Duration,
    /// Entries kept per (session, namespace) version index.
    pub version_index_capacity: usize,
    /// Upper bound on distinct objects tracked per access stack. `None`
    /// disables eviction.
    pub max_tracked_objects: Option<usize>,
    /// Byte budget for serialized records kept in memory. Only records that
    /// already reached disk are evicted. `None` keeps everything until removal.
    pub pending_cache_max_bytes: Option<usize>,
    /// Longest a reader waits on an in-flight serialization before failing
    /// with [`StoreError::Stalled`]. `None` waits indefinitely.
    pub stall_timeout: Option<Duration>,
    /// Whether `destroy` serializes and saves everything still queued.
    pub flush_on_shutdown: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("pagekeep").join("sessions"),
            idle_interval: DEFAULT_IDLE_INTERVAL,
            version_index_capacity: DEFAULT_VERSION_INDEX_CAPACITY,
            max_tracked_objects: None,
            pending_cache_max_bytes: None,
            stall_timeout: None,
            flush_on_shutdown: true,
        }
    }
}

impl StoreOptions {
    /// Creates options rooted at `root` with default settings.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Sets the worker idle interval.
    pub fn idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    /// Sets the per-namespace version index capacity.
    pub fn version_index_capacity(mut self, capacity: usize) -> Self {
        self.version_index_capacity = capacity;
        self
    }

    /// Bounds the number of objects tracked per access stack.
    pub fn max_tracked_objects(mut self, max: usize) -> Self {
        self.max_tracked_objects = Some(max);
        self
    }

    /// Bounds the in-memory serialized record cache.
    pub fn pending_cache_max_bytes(mut self, bytes: usize) -> Self {
        self.pending_cache_max_bytes = Some(bytes);
        self
    }

    /// Fails readers blocked on a serialization for longer than `timeout`.
    pub fn stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = Some(timeout);
        self
    }

    /// Controls flushing of queued work on shutdown.
    pub fn flush_on_shutdown(mut self, enabled: bool) -> Self {
        self.flush_on_shutdown = enabled;
        self
    }

    /// Rejects settings the store cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.idle_interval.is_zero() {
            return Err(StoreError::Config("idle_interval must be positive".into()));
        }
        if self.version_index_capacity == 0 {
            return Err(StoreError::Config(
                "version_index_capacity must be at least 1".into(),
            ));
        }
        if self.max_tracked_objects == Some(0) {
            return Err(StoreError::Config(
                "max_tracked_objects must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Parses options from TOML.
    ///
    /// ```toml
    /// root = "/var/lib/app/sessions"
    /// idle_interval_ms = 250
    /// version_index_capacity = 50
    /// max_tracked_objects = 20
    /// ```
    pub fn from_toml_str(src: &str) -> Result<Self> {
        let raw: RawStoreOptions =
            toml::from_str(src).map_err(|err| StoreError::Config(err.to_string()))?;
        let options = raw.into_options();
        options.validate()?;
        Ok(options)
    }

    /// Reads options from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let src = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&src)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawStoreOptions {
    root: Option<PathBuf>,
    idle_interval_ms: Option<u64>,
    version_index_capacity: Option<usize>,
    max_tracked_objects: Option<usize>,
    pending_cache_max_bytes: Option<usize>,
    stall_timeout_ms: Option<u64>,
    flush_on_shutdown: Option<bool>,
}

impl RawStoreOptions {
    fn into_options(self) -> StoreOptions {
        let defaults = StoreOptions::default();
        StoreOptions {
            root: self.root.unwrap_or(defaults.root),
            idle_interval: self
                .idle_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.idle_interval),
            version_index_capacity: self
                .version_index_capacity
                .unwrap_or(defaults.version_index_capacity),
            max_tracked_objects: self.max_tracked_objects,
            pending_cache_max_bytes: self.pending_cache_max_bytes,
            stall_timeout: self.stall_timeout_ms.map(Duration::from_millis),
            flush_on_shutdown: self.flush_on_shutdown.unwrap_or(defaults.flush_on_shutdown),
        }
    }
}
