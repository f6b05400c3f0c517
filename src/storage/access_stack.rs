use crate::types::ObjectId;

/// One navigation event: `version` of `object_id` was shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessEntry {
    /// Object that was accessed.
    pub object_id: ObjectId,
    /// Version that was accessed.
    pub version: u32,
}

/// Cleanup owed for one entry popped by a backward navigation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RollbackStep {
    /// The object is still tracked lower in the stack; drop only this version.
    TrimVersion {
        /// Object to trim.
        object_id: ObjectId,
        /// Version that became unreachable.
        version: u32,
    },
    /// The object is no longer tracked anywhere; drop it entirely.
    RemoveObject {
        /// Object to drop.
        object_id: ObjectId,
    },
}

/// Effect of [`AccessStack::access`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessOutcome {
    /// The entry already was on top.
    Unchanged,
    /// Forward navigation; the entry is the new top.
    Pushed,
    /// Backward navigation; entries above the target were popped.
    Rollback(Vec<RollbackStep>),
}

/// Ordered navigation history of one namespace, oldest at the bottom.
///
/// An `(object_id, version)` pair appears at most once.
#[derive(Debug, Default)]
pub struct AccessStack {
    entries: Vec<AccessEntry>,
}

impl AccessStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an access to `(object_id, version)`.
    pub fn access(&mut self, object_id: ObjectId, version: u32) -> AccessOutcome {
        let target = AccessEntry { object_id, version };
        if self.entries.last() == Some(&target) {
            return AccessOutcome::Unchanged;
        }
        let Some(pos) = self.entries.iter().position(|entry| *entry == target) else {
            self.entries.push(target);
            return AccessOutcome::Pushed;
        };

        let popped = self.entries.split_off(pos + 1);
        let mut steps: Vec<RollbackStep> = Vec::with_capacity(popped.len());
        for entry in popped.iter().rev() {
            let step = if self.tracks(entry.object_id) {
                RollbackStep::TrimVersion {
                    object_id: entry.object_id,
                    version: entry.version,
                }
            } else {
                RollbackStep::RemoveObject {
                    object_id: entry.object_id,
                }
            };
            if !steps.contains(&step) {
                steps.push(step);
            }
        }
        AccessOutcome::Rollback(steps)
    }

    /// True when any version of `object_id` is on the stack.
    pub fn tracks(&self, object_id: ObjectId) -> bool {
        self.entries.iter().any(|entry| entry.object_id == object_id)
    }

    /// Highest version of `object_id` still on the stack.
    pub fn latest_version(&self, object_id: ObjectId) -> Option<u32> {
        self.entries
            .iter()
            .filter(|entry| entry.object_id == object_id)
            .map(|entry| entry.version)
            .max()
    }

    /// Drops every entry of `object_id`.
    pub fn remove_object(&mut self, object_id: ObjectId) {
        self.entries.retain(|entry| entry.object_id != object_id);
    }

    /// Drops the entry for one version of `object_id`.
    pub fn remove_version(&mut self, object_id: ObjectId, version: u32) {
        self.entries
            .retain(|entry| !(entry.object_id == object_id && entry.version == version));
    }

    /// Entries, bottom first.
    pub fn entries(&self) -> &[AccessEntry] {
        &self.entries
    }

    /// Number of distinct objects on the stack.
    pub fn tracked_objects(&self) -> usize {
        let mut ids: Vec<ObjectId> = self.entries.iter().map(|entry| entry.object_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Most recent entry.
    pub fn top(&self) -> Option<AccessEntry> {
        self.entries.last().copied()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was accessed yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
