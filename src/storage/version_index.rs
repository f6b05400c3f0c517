use std::collections::VecDeque;

use crate::types::ObjectId;

/// Latest known revision of one object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionIndexEntry {
    /// Object the entry describes.
    pub object_id: ObjectId,
    /// Full version.
    pub version: u32,
    /// Sub-version within `version`.
    pub sub_version: u32,
}

/// Bounded most-recently-recorded history of object revisions.
///
/// Holds at most one entry per object id; the newest entry sits at the tail
/// and the oldest entries fall off the front once `capacity` is exceeded.
#[derive(Debug)]
pub struct VersionIndex {
    entries: VecDeque<VersionIndexEntry>,
    capacity: usize,
}

impl VersionIndex {
    /// Creates an empty index keeping at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(128)),
            capacity: capacity.max(1),
        }
    }

    /// Records `(object_id, version, sub_version)` as the object's newest revision.
    pub fn record(&mut self, object_id: ObjectId, version: u32, sub_version: u32) {
        self.forget(object_id);
        self.entries.push_back(VersionIndexEntry {
            object_id,
            version,
            sub_version,
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Resolves a revision.
    ///
    /// `None` yields the newest revision of `object_id`; `Some(v)` yields the
    /// recorded sub-version only if the newest revision is exactly version `v`.
    pub fn resolve(&self, object_id: ObjectId, version: Option<u32>) -> Option<(u32, u32)> {
        let entry = self
            .entries
            .iter()
            .rev()
            .find(|entry| entry.object_id == object_id)?;
        match version {
            Some(v) if entry.version != v => None,
            _ => Some((entry.version, entry.sub_version)),
        }
    }

    /// Drops the entry for `object_id`.
    pub fn forget(&mut self, object_id: ObjectId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.object_id != object_id);
        before != self.entries.len()
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
