//! In-memory write-behind cache of serialized records.
//!
//! Every record the serialize stage produces lands here before it is handed
//! to the save stage, so reads never depend on the disk write having
//! happened. Records leave only through explicit removal, or, when a byte
//! budget is configured, through LRU eviction of records already on disk.

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::types::{ObjectId, VersionKey};

struct CachedRecord {
    bytes: Bytes,
    seq: u64,
    persisted: bool,
}

struct CacheState {
    records: LruCache<VersionKey, CachedRecord>,
    total_bytes: usize,
}

/// Process-wide `VersionKey → bytes` map shared by all sessions.
pub struct PendingCache {
    state: Mutex<CacheState>,
    max_bytes: Option<usize>,
}

impl PendingCache {
    /// Creates a cache, optionally bounded to `max_bytes` of payload.
    pub fn new(max_bytes: Option<usize>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                records: LruCache::unbounded(),
                total_bytes: 0,
            }),
            max_bytes,
        }
    }

    /// Stores `bytes` as the serialized form of `key` produced by the
    /// enqueue with sequence number `seq`.
    ///
    /// Returns false, leaving the cache untouched, when a record from a later
    /// enqueue is already present.
    pub fn insert(&self, key: VersionKey, bytes: Bytes, seq: u64) -> bool {
        let mut state = self.state.lock();
        if state
            .records
            .peek(&key)
            .is_some_and(|current| current.seq > seq)
        {
            return false;
        }
        state.total_bytes += bytes.len();
        let record = CachedRecord {
            bytes,
            seq,
            persisted: false,
        };
        if let Some(previous) = state.records.put(key, record) {
            state.total_bytes -= previous.bytes.len();
        }
        self.enforce_budget(&mut state);
        true
    }

    /// Latest bytes for `key`.
    pub fn get(&self, key: &VersionKey) -> Option<Bytes> {
        self.state
            .lock()
            .records
            .get(key)
            .map(|record| record.bytes.clone())
    }

    /// Whether a save job carrying `bytes` for `key` still needs writing.
    ///
    /// False when the record was removed, replaced by newer bytes or already
    /// written.
    pub fn needs_persist(&self, key: &VersionKey, bytes: &Bytes) -> bool {
        self.state
            .lock()
            .records
            .peek(key)
            .is_some_and(|record| !record.persisted && same_buffer(&record.bytes, bytes))
    }

    /// Marks the record as durable so it becomes eligible for eviction.
    pub fn mark_persisted(&self, key: &VersionKey, bytes: &Bytes) {
        let mut state = self.state.lock();
        if let Some(record) = state.records.peek_mut(key) {
            if same_buffer(&record.bytes, bytes) {
                record.persisted = true;
            }
        }
        self.enforce_budget(&mut state);
    }

    /// Sub-versions of `(namespace, object_id, version)` held for a session.
    pub fn sub_versions(
        &self,
        session_id: &str,
        namespace: &str,
        object_id: ObjectId,
        version: u32,
    ) -> Vec<u32> {
        let state = self.state.lock();
        let mut subs: Vec<u32> = state
            .records
            .iter()
            .map(|(key, _)| key)
            .filter(|key| {
                key.session_id() == session_id
                    && key.namespace() == namespace
                    && key.object_id() == object_id
                    && key.version() == version
            })
            .map(VersionKey::sub_version)
            .collect();
        subs.sort_unstable();
        subs
    }

    /// Removes every record matching `predicate`, returning how many went.
    pub fn remove_where(&self, predicate: impl Fn(&VersionKey) -> bool) -> usize {
        let mut state = self.state.lock();
        let doomed: Vec<VersionKey> = state
            .records
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            if let Some(record) = state.records.pop(key) {
                state.total_bytes -= record.bytes.len();
            }
        }
        doomed.len()
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// True when no records are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload bytes currently held.
    pub fn total_bytes(&self) -> usize {
        self.state.lock().total_bytes
    }

    fn enforce_budget(&self, state: &mut CacheState) {
        let Some(max_bytes) = self.max_bytes else {
            return;
        };
        while state.total_bytes > max_bytes {
            // Least recently used first; records not yet on disk are pinned.
            let victim = state
                .records
                .iter()
                .rev()
                .find(|(_, record)| record.persisted)
                .map(|(key, _)| key.clone());
            let Some(victim) = victim else {
                break;
            };
            if let Some(record) = state.records.pop(&victim) {
                state.total_bytes -= record.bytes.len();
                trace!(key = %victim, bytes = record.bytes.len(), "cache.evict");
            }
        }
    }
}

fn same_buffer(a: &Bytes, b: &Bytes) -> bool {
    a.as_ptr() == b.as_ptr() && a.len() == b.len()
}
